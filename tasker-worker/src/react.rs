//! Shared JSON-extraction helper for LLM responses (`spec.md` §4.6 step 4:
//! "Extract a JSON block from surrounding text if the model wrapped it").

/// Returns the first top-level JSON object or array found in `text`. Tries
/// the whole trimmed string first (the common case of a clean response),
/// then falls back to scanning for a fenced ` ```json ` block or the widest
/// brace/bracket span, so a model that prefaces its answer with prose still
/// parses.
#[must_use]
pub fn extract_json_block(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            let candidate = after[..end].trim();
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate.to_string());
            }
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                let candidate = &trimmed[start..=end];
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Some(candidate.to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_clean_json() {
        assert_eq!(extract_json_block(r#"{"a": 1}"#).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extracts_fenced_json() {
        let text = "Here is my plan:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_block(text).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extracts_json_with_surrounding_prose() {
        let text = "Sure thing! [{\"id\": \"a\"}] is my answer.";
        assert_eq!(extract_json_block(text).unwrap(), r#"[{"id": "a"}]"#);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json_block("no json here").is_none());
    }
}
