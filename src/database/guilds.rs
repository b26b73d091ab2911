/// Relational half of tenant configuration: tier table, per-tenant tier
/// settings, alert settings, and watchlists

use serde::Serialize;
use sqlx::FromRow;

use super::{MarketDatabase, StoreError};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TierRow {
    pub id: i64,
    pub name: String,
    pub emoji: String,
    pub min_score: i64,
    pub max_score: i64,
    pub tier_group: String,
}

#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct GuildConfigRow {
    pub min_tier_name: Option<String>,
    pub alert_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TierSettingRow {
    pub tier_name: String,
    pub role_id: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AlertSettingsRow {
    pub min_margin_gp: i64,
    pub min_score: i64,
    /// JSON array of tier names; empty means every tier is allowed.
    pub enabled_tiers: String,
    pub max_alerts_per_interval: i64,
    /// Tenant override for the spike rise threshold.
    pub spike_rise_pct: Option<f64>,
}

impl Default for AlertSettingsRow {
    fn default() -> Self {
        Self {
            min_margin_gp: 0,
            min_score: 0,
            enabled_tiers: "[]".to_string(),
            max_alerts_per_interval: 1,
            spike_rise_pct: None,
        }
    }
}

impl AlertSettingsRow {
    pub fn enabled_tier_names(&self) -> Vec<String> {
        serde_json::from_str(&self.enabled_tiers).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WatchlistRow {
    pub id: i64,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub item_id: i64,
    pub item_name: String,
}

impl MarketDatabase {
    pub async fn tiers(&self) -> Result<Vec<TierRow>, StoreError> {
        sqlx::query_as::<_, TierRow>(
            "SELECT id, name, emoji, min_score, max_score, tier_group FROM tiers ORDER BY min_score",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read tiers: {e}")))
    }

    pub async fn guild_config(&self, tenant_id: &str) -> Result<GuildConfigRow, StoreError> {
        let row = sqlx::query_as::<_, GuildConfigRow>(
            "SELECT min_tier_name, alert_channel_id FROM guild_config WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read guild config: {e}")))?;
        Ok(row.unwrap_or_default())
    }

    pub async fn set_guild_config(
        &self,
        tenant_id: &str,
        min_tier_name: Option<&str>,
        alert_channel_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guild_config (tenant_id, min_tier_name, alert_channel_id)
            VALUES (?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
                min_tier_name = excluded.min_tier_name,
                alert_channel_id = excluded.alert_channel_id
            "#,
        )
        .bind(tenant_id)
        .bind(min_tier_name)
        .bind(alert_channel_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to write guild config: {e}")))?;
        Ok(())
    }

    pub async fn alert_settings(&self, tenant_id: &str) -> Result<AlertSettingsRow, StoreError> {
        let row = sqlx::query_as::<_, AlertSettingsRow>(
            r#"
            SELECT min_margin_gp, min_score, enabled_tiers, max_alerts_per_interval, spike_rise_pct
            FROM guild_alert_settings WHERE tenant_id = ?
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read alert settings: {e}")))?;
        Ok(row.unwrap_or_default())
    }

    pub async fn set_alert_settings(
        &self,
        tenant_id: &str,
        settings: &AlertSettingsRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guild_alert_settings
                (tenant_id, min_margin_gp, min_score, enabled_tiers, max_alerts_per_interval, spike_rise_pct)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
                min_margin_gp = excluded.min_margin_gp,
                min_score = excluded.min_score,
                enabled_tiers = excluded.enabled_tiers,
                max_alerts_per_interval = excluded.max_alerts_per_interval,
                spike_rise_pct = excluded.spike_rise_pct
            "#,
        )
        .bind(tenant_id)
        .bind(settings.min_margin_gp)
        .bind(settings.min_score)
        .bind(&settings.enabled_tiers)
        .bind(settings.max_alerts_per_interval)
        .bind(settings.spike_rise_pct)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to write alert settings: {e}")))?;
        Ok(())
    }

    pub async fn tier_settings(&self, tenant_id: &str) -> Result<Vec<TierSettingRow>, StoreError> {
        sqlx::query_as::<_, TierSettingRow>(
            "SELECT tier_name, role_id, enabled FROM guild_tier_settings WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to read tier settings: {e}")))
    }

    pub async fn set_tier_setting(
        &self,
        tenant_id: &str,
        tier_name: &str,
        role_id: Option<&str>,
        enabled: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guild_tier_settings (tenant_id, tier_name, role_id, enabled)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tenant_id, tier_name) DO UPDATE SET
                role_id = excluded.role_id,
                enabled = excluded.enabled
            "#,
        )
        .bind(tenant_id)
        .bind(tier_name)
        .bind(role_id)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to write tier setting: {e}")))?;
        Ok(())
    }

    pub async fn delete_tenant_rows(&self, tenant_id: &str) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        for table in [
            "guild_tier_settings",
            "guild_config",
            "guild_alert_settings",
            "watchlists",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE tenant_id = ?"))
                .bind(tenant_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(format!("failed to delete from {table}: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("failed to commit tenant delete: {e}")))?;
        Ok(())
    }

    /// Returns false when the entry already existed.
    pub async fn watchlist_add(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        item_id: i64,
        item_name: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO watchlists (tenant_id, user_id, item_id, item_name)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(item_id)
        .bind(item_name)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to add watchlist entry: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn watchlist_remove(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        item_id: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM watchlists WHERE tenant_id = ? AND user_id IS ? AND item_id = ?",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("failed to remove watchlist entry: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn watchlist(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<WatchlistRow>, StoreError> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query_as::<_, WatchlistRow>(
                    r#"
                    SELECT id, tenant_id, user_id, item_id, item_name
                    FROM watchlists WHERE tenant_id = ? AND user_id = ?
                    ORDER BY item_name
                    "#,
                )
                .bind(tenant_id)
                .bind(user)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, WatchlistRow>(
                    r#"
                    SELECT id, tenant_id, user_id, item_id, item_name
                    FROM watchlists WHERE tenant_id = ?
                    ORDER BY item_name
                    "#,
                )
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await
            }
        };
        rows.map_err(|e| StoreError::Query(format!("failed to read watchlist: {e}")))
    }
}
