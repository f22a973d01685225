use anyhow::Result;

use super::schema::Database;
use crate::feed::FeedRecord;

/// Persistence used by the import/export orchestrator.
///
/// Implementations must make `insert_all` all-or-nothing.
#[async_trait::async_trait]
pub trait FeedStore: Send + Sync {
    /// Store a decoded batch, returning how many records were stored.
    async fn insert_all(&self, records: &[FeedRecord]) -> Result<usize>;

    /// Every record in store order, groups before their members.
    async fn get_all(&self) -> Result<Vec<FeedRecord>>;
}

#[async_trait::async_trait]
impl FeedStore for Database {
    async fn insert_all(&self, records: &[FeedRecord]) -> Result<usize> {
        Ok(self.insert_feeds(records).await?.len())
    }

    async fn get_all(&self) -> Result<Vec<FeedRecord>> {
        self.get_feeds().await
    }
}
