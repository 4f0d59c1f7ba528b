use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::ports::StoreError;

pub mod directory;
pub mod request;

pub use directory::SqlDirectory;
pub use request::SqlRequestStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stale write: {0}")]
    Stale(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Stale(message) => StoreError::Conflict(message),
            RepositoryError::Database(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                StoreError::Conflict(error.message().to_owned())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn decode_flag(column: &str, value: i64) -> Result<bool, RepositoryError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected 0 or 1): {other}"
        ))),
    }
}
