//! Store-local error type, convertible into [`tasker_shared::errors::TaskerError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for tasker_shared::errors::TaskerError {
    fn from(err: StoreError) -> Self {
        tasker_shared::errors::TaskerError::StoreError(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
