use rusqlite::ErrorCode;
use thiserror::Error;

/// Failure while reading from the item store.
///
/// Every variant is terminal for the request. The `Display` output carries
/// driver detail for operators; callers should only ever see
/// [`StoreError::public_message`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("query failed: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("row decode failed: {0}")]
    Decode(#[source] rusqlite::Error),

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error("query worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Short message that is safe to hand back to an HTTP client.
    pub fn public_message(&self) -> &'static str {
        match self {
            StoreError::Decode(_) => "db scan failed",
            _ => "db query failed",
        }
    }

    /// Statements aborted by the progress handler surface as SQLite
    /// interrupts, and lock waits capped at the remaining budget surface as
    /// `SQLITE_BUSY`. Both are deadline overruns.
    pub(crate) fn or_deadline(self) -> Self {
        match &self {
            StoreError::Query(rusqlite::Error::SqliteFailure(cause, _))
            | StoreError::Decode(rusqlite::Error::SqliteFailure(cause, _))
                if matches!(
                    cause.code,
                    ErrorCode::OperationInterrupted | ErrorCode::DatabaseBusy
                ) =>
            {
                StoreError::DeadlineExceeded
            }
            _ => self,
        }
    }
}
