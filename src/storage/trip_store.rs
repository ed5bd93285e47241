use anyhow::Result;
use async_trait::async_trait;

use crate::models::TripRecord;

/// Destination of the load stage.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Makes sure the database exists and recreates an empty trip table.
    async fn provision(&self) -> Result<()>;

    /// Writes all records in one all-or-nothing transaction and returns the
    /// number of rows written.
    async fn bulk_insert(&self, records: &[TripRecord]) -> Result<u64>;

    async fn row_count(&self) -> Result<i64>;
}
