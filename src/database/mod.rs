use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

pub mod cleanup;
pub mod guilds;
pub mod migrations;
pub mod snapshots;

pub use cleanup::PruneService;
pub use snapshots::{PricePoint, PriceHistoricals, Snapshot};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("query execution failed: {0}")]
    Query(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Table cardinalities exposed by the health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub price_rows: i64,
    pub snapshot_rows: i64,
    pub watchlist_rows: i64,
    pub tier_rows: i64,
    pub is_connected: bool,
}

/// Pooled SQLite handle shared by the ingest loop (single logical writer)
/// and the read API (concurrent readers).
#[derive(Debug, Clone)]
pub struct MarketDatabase {
    pool: SqlitePool,
}

impl MarketDatabase {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Connection(format!("failed to create data directory: {e}"))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Connection(format!("invalid database URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("cache_size", "-64000")
            .pragma("temp_store", "memory");

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .max_lifetime(Duration::from_secs(3_600))
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect: {e}")))?;

        let db = Self { pool };
        migrations::run(&db).await?;
        info!(url = database_url, "market database connected");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(format!("failed to begin transaction: {e}")))
    }

    pub async fn health(&self) -> Result<StoreHealth, StoreError> {
        let price_rows = self.count("prices").await?;
        let snapshot_rows = self.count("ge_prices_5m").await?;
        let watchlist_rows = self.count("watchlists").await?;
        let tier_rows = self.count("tiers").await?;
        Ok(StoreHealth {
            price_rows,
            snapshot_rows,
            watchlist_rows,
            tier_rows,
            is_connected: true,
        })
    }

    async fn count(&self, table: &str) -> Result<i64, StoreError> {
        // Table names come from the fixed list above, never from input.
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("failed to count {table}: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::MarketDatabase;

    /// Fresh file-backed database in the OS temp dir. File-backed rather
    /// than `:memory:` so every pooled connection sees the same schema.
    pub async fn temp_db() -> MarketDatabase {
        let path = std::env::temp_dir().join(format!("ge-sniper-test-{}.db", uuid::Uuid::new_v4()));
        MarketDatabase::connect(&format!("sqlite:{}", path.display()))
            .await
            .expect("temp database connects")
    }
}
