/// Embedded schema migrations, tracked in `schema_migrations`

use tracing::{debug, info};

use super::{MarketDatabase, StoreError};

/// Migrations ship inside the binary; version order is the array order.
const MIGRATIONS: &[(&str, &str, &str)] = &[
    ("001", "initial schema", include_str!("../../migrations/001_schema.sql")),
    ("002", "seed tiers", include_str!("../../migrations/002_seed_tiers.sql")),
];

pub async fn run(db: &MarketDatabase) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(db.pool())
    .await
    .map_err(|e| StoreError::Migration(format!("failed to create tracking table: {e}")))?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(db.pool())
        .await
        .map_err(|e| StoreError::Migration(format!("failed to read applied versions: {e}")))?;

    let mut applied_count = 0;
    for (version, name, sql) in MIGRATIONS {
        if applied.iter().any(|v| v == version) {
            debug!(version, "migration already applied");
            continue;
        }
        apply(db, version, name, sql).await?;
        applied_count += 1;
    }

    if applied_count > 0 {
        info!(applied = applied_count, "database migrations applied");
    }
    Ok(())
}

async fn apply(db: &MarketDatabase, version: &str, name: &str, sql: &str) -> Result<(), StoreError> {
    let mut tx = db.begin().await?;

    // One statement per semicolon; the embedded SQL carries none inside
    // literals.
    for statement in sql.split(';') {
        let statement = statement.trim();
        if statement.is_empty() || statement.lines().all(|l| l.trim_start().starts_with("--")) {
            continue;
        }
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration(format!("migration {version} failed: {e}")))?;
    }

    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
        .bind(version)
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Migration(format!("failed to record migration {version}: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| StoreError::Migration(format!("failed to commit migration {version}: {e}")))?;

    info!(version, name, "applied migration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::database::testutil::temp_db;

    #[tokio::test]
    async fn rerunning_migrations_is_idempotent() {
        let db = temp_db().await;
        super::run(&db).await.unwrap();
        super::run(&db).await.unwrap();

        let tiers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tiers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(tiers, 10);
    }
}
