use std::time::Instant;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::sqlite::SqlQuery;
use crate::value::Row;

/// Read-only access to the `items` table.
///
/// The listing path only depends on this trait, so a fake store can stand in
/// for [`crate::SqliteStore`] in tests.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Run `query` and return every row it produces, or fail as a whole.
    ///
    /// Implementations must give up and return
    /// [`StoreError::DeadlineExceeded`] once `deadline` passes.
    async fn fetch(&self, query: SqlQuery, deadline: Instant) -> Result<Vec<Row>, StoreError>;

    /// Liveness check against the backing store.
    async fn ping(&self, deadline: Instant) -> Result<(), StoreError>;
}
