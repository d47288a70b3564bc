/// Errors surfaced by the storage layer.
///
/// The split matters to callers: [`StoreError::Unavailable`] is transient
/// (locked database, I/O pressure) and the ingestion persister retries it
/// with backoff, while [`StoreError::Rejected`] means the rows themselves
/// are unstorable and retrying cannot help.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient failure; the operation may succeed if retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The data does not fit the schema; fatal for the affected rows.
    #[error("store rejected row: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                rusqlite::ErrorCode::ConstraintViolation
                | rusqlite::ErrorCode::TypeMismatch
                | rusqlite::ErrorCode::TooBig => StoreError::Rejected(e.to_string()),
                _ => StoreError::Unavailable(e.to_string()),
            },
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::ToSqlConversionFailure(_)
            | rusqlite::Error::FromSqlConversionFailure(..) => {
                StoreError::Rejected(e.to_string())
            }
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        // Metadata that cannot round-trip through JSON is a row problem,
        // not a store problem.
        StoreError::Rejected(format!("metadata JSON: {e}"))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
