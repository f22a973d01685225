use anyhow::Result;
use std::collections::HashMap;

use super::schema::Database;
use super::types::FeedDbRow;
use crate::feed::FeedRecord;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a batch of records in a single transaction, returning the new row ids.
    ///
    /// Record ids are treated as batch-local: every row gets a fresh id, and a
    /// `group_id` naming a record earlier in the batch is rewritten to that
    /// record's new id. A `group_id` not found in the batch is kept as-is and
    /// must name an existing group. If any insert fails, nothing is stored.
    pub async fn insert_feeds(&self, records: &[FeedRecord]) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut assigned: HashMap<i64, i64> = HashMap::with_capacity(records.len());
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let group_id = record
                .group_id
                .map(|batch_id| assigned.get(&batch_id).copied().unwrap_or(batch_id));

            let row: (i64,) = sqlx::query_as(
                "INSERT INTO feeds (title, link, is_group, group_id, retrieve_full_text)
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(&record.title)
            .bind(&record.link)
            .bind(record.is_group)
            .bind(group_id)
            .bind(record.retrieve_full_text)
            .fetch_one(&mut *tx)
            .await?;

            assigned.insert(record.id, row.0);
            ids.push(row.0);
        }

        tx.commit().await?;
        tracing::debug!(count = ids.len(), "Inserted feed records");
        Ok(ids)
    }

    /// Get every feed and group, ordered by id
    pub async fn get_feeds(&self) -> Result<Vec<FeedRecord>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            "SELECT id, title, link, is_group, group_id, retrieve_full_text FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_record).collect())
    }
}
