/// Time-series snapshot store over `ge_prices_5m` and `prices`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::debug;

use super::{MarketDatabase, StoreError};

/// Rows per insert transaction.
const BATCH_SIZE: usize = 1_000;

/// One observation of an item inside an upstream window. Primary key is
/// `(item_id, timestamp)`; re-inserting the same key is a no-op overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Snapshot {
    pub item_id: i64,
    pub timestamp: i64,
    pub low: i64,
    pub high: i64,
    pub volume: i64,
}

/// One `prices` row served by the per-item history endpoint.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PricePoint {
    pub timestamp: i64,
    pub low: i64,
    pub high: i64,
    pub volume: i64,
}

/// Mid-price averages over trailing windows plus the most recent prior
/// observation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceHistoricals {
    pub avg_7d: Option<f64>,
    pub avg_24h: Option<f64>,
    pub avg_12h: Option<f64>,
    pub avg_6h: Option<f64>,
    pub avg_1h: Option<f64>,
    pub prev_price: Option<f64>,
    pub prev_timestamp: Option<i64>,
}

impl MarketDatabase {
    /// Transactional bulk insert, chunked at `BATCH_SIZE` rows. Duplicate
    /// `(item_id, timestamp)` keys overwrite in place, so feeding the same
    /// upstream response twice leaves the table unchanged.
    pub async fn put_snapshots(&self, batch: &[Snapshot]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        for chunk in batch.chunks(BATCH_SIZE) {
            let mut tx = self.begin().await?;
            for snap in chunk {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO ge_prices_5m (item_id, timestamp, low, high, volume)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(snap.item_id)
                .bind(snap.timestamp)
                .bind(snap.low)
                .bind(snap.high)
                .bind(snap.volume)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(format!("failed to insert snapshot: {e}")))?;
            }
            tx.commit()
                .await
                .map_err(|e| StoreError::Query(format!("failed to commit snapshot batch: {e}")))?;
        }

        debug!(rows = batch.len(), "snapshot batch stored");
        Ok(())
    }

    /// Last `n` snapshots for an item, newest first.
    pub async fn recent(&self, item_id: i64, n: u32) -> Result<Vec<Snapshot>, StoreError> {
        sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT item_id, timestamp, low, high, volume
            FROM ge_prices_5m
            WHERE item_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(item_id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read recent snapshots: {e}")))
    }

    /// Snapshots with `timestamp >= since_ts`, oldest first.
    pub async fn range(&self, item_id: i64, since_ts: i64) -> Result<Vec<Snapshot>, StoreError> {
        sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT item_id, timestamp, low, high, volume
            FROM ge_prices_5m
            WHERE item_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(item_id)
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read snapshot range: {e}")))
    }

    /// Append one observation to the per-tick `prices` log.
    pub async fn log_price(
        &self,
        item_id: i64,
        low: i64,
        high: i64,
        volume: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO prices (item_id, timestamp, low, high, volume) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(Utc::now().timestamp())
        .bind(low)
        .bind(high)
        .bind(volume)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to log price: {e}")))?;
        Ok(())
    }

    /// Bulk variant of `log_price` used by the ingest tick.
    pub async fn log_prices(&self, rows: &[(i64, i64, i64, i64)]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        for chunk in rows.chunks(BATCH_SIZE) {
            let mut tx = self.begin().await?;
            for (item_id, low, high, volume) in chunk {
                sqlx::query(
                    "INSERT INTO prices (item_id, timestamp, low, high, volume) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(item_id)
                .bind(now)
                .bind(low)
                .bind(high)
                .bind(volume)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(format!("failed to log price: {e}")))?;
            }
            tx.commit()
                .await
                .map_err(|e| StoreError::Query(format!("failed to commit price batch: {e}")))?;
        }
        Ok(())
    }

    /// `prices` rows for the trailing `hours` window, oldest first.
    pub async fn price_history(
        &self,
        item_id: i64,
        hours: i64,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let cutoff = Utc::now().timestamp() - hours * 3_600;
        sqlx::query_as::<_, PricePoint>(
            r#"
            SELECT timestamp, low, high, volume
            FROM prices
            WHERE item_id = ? AND timestamp > ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(item_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read price history: {e}")))
    }

    /// Trailing mid-price averages plus the most recent prior row.
    pub async fn price_historicals(&self, item_id: i64) -> Result<PriceHistoricals, StoreError> {
        let now = Utc::now().timestamp();
        let mut out = PriceHistoricals::default();

        let periods: [(i64, fn(&mut PriceHistoricals) -> &mut Option<f64>); 5] = [
            (7 * 86_400, |h| &mut h.avg_7d),
            (86_400, |h| &mut h.avg_24h),
            (12 * 3_600, |h| &mut h.avg_12h),
            (6 * 3_600, |h| &mut h.avg_6h),
            (3_600, |h| &mut h.avg_1h),
        ];
        for (seconds, slot) in periods {
            let avg: Option<f64> = sqlx::query_scalar(
                r#"
                SELECT AVG((low + high) / 2.0)
                FROM prices
                WHERE item_id = ? AND timestamp > ? AND timestamp < ?
                "#,
            )
            .bind(item_id)
            .bind(now - seconds)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("failed to read historicals: {e}")))?;
            *slot(&mut out) = avg;
        }

        let prev: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT timestamp, low, high
            FROM prices
            WHERE item_id = ?
            ORDER BY timestamp DESC
            LIMIT 1 OFFSET 1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read previous price: {e}")))?;
        if let Some((ts, low, high)) = prev {
            out.prev_price = Some((low + high) as f64 / 2.0);
            out.prev_timestamp = Some(ts);
        }

        Ok(out)
    }

    /// Delete rows older than `now - retention_seconds` from both price
    /// tables. Returns the number of rows removed.
    pub async fn prune(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now().timestamp() - retention_seconds;

        let snapshots = sqlx::query("DELETE FROM ge_prices_5m WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("failed to prune snapshots: {e}")))?
            .rows_affected();

        let prices = sqlx::query("DELETE FROM prices WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("failed to prune prices: {e}")))?
            .rows_affected();

        Ok(snapshots + prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil::temp_db;

    fn snap(item_id: i64, timestamp: i64, low: i64, high: i64, volume: i64) -> Snapshot {
        Snapshot {
            item_id,
            timestamp,
            low,
            high,
            volume,
        }
    }

    #[tokio::test]
    async fn put_then_recent_round_trips() {
        let db = temp_db().await;
        let batch = vec![snap(42, 100, 3_000, 3_100, 500), snap(42, 400, 2_100, 2_200, 500)];
        db.put_snapshots(&batch).await.unwrap();

        let recent = db.recent(42, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].timestamp, 400);
        assert_eq!(recent[1].timestamp, 100);
    }

    #[tokio::test]
    async fn duplicate_key_insert_is_idempotent() {
        let db = temp_db().await;
        let batch = vec![snap(42, 100, 3_000, 3_100, 500)];
        db.put_snapshots(&batch).await.unwrap();
        db.put_snapshots(&batch).await.unwrap();

        let recent = db.recent(42, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].low, 3_000);
    }

    #[tokio::test]
    async fn range_is_inclusive_and_ascending() {
        let db = temp_db().await;
        db.put_snapshots(&[
            snap(7, 100, 10, 20, 1),
            snap(7, 200, 11, 21, 1),
            snap(7, 300, 12, 22, 1),
        ])
        .await
        .unwrap();

        let rows = db.range(7, 200).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 200);
        assert_eq!(rows[1].timestamp, 300);
    }

    #[tokio::test]
    async fn prune_removes_only_expired_rows() {
        let db = temp_db().await;
        let now = Utc::now().timestamp();
        db.put_snapshots(&[
            snap(9, now - 8 * 86_400, 1, 2, 1),
            snap(9, now - 60, 1, 2, 1),
        ])
        .await
        .unwrap();

        let removed = db.prune(7 * 86_400).await.unwrap();
        assert_eq!(removed, 1);
        let rows = db.recent(9, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, now - 60);
    }
}
