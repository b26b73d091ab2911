/// Tenant config store: JSON documents plus relational settings, served
/// through an in-memory cache

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::model::{AlertThresholds, TenantConfig, TenantDocument, TierRoleSetting};
use super::validate::{self, TenantError};
use crate::database::guilds::AlertSettingsRow;
use crate::database::MarketDatabase;

pub struct TenantStore {
    root: PathBuf,
    db: Arc<MarketDatabase>,
    cache: DashMap<String, Arc<TenantConfig>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TenantStore {
    pub async fn new(root: PathBuf, db: Arc<MarketDatabase>) -> Result<Self, TenantError> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| TenantError::Io(format!("failed to create config root: {e}")))?;
        Ok(Self {
            root,
            db,
            cache: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a tenant's unified config. With `create_if_missing`, a first
    /// reference creates the document with secure defaults.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        tenant_id: &str,
        create_if_missing: bool,
    ) -> Result<Arc<TenantConfig>, TenantError> {
        if !validate::is_valid_tenant_id(tenant_id) {
            return Err(TenantError::InvalidTenantId);
        }
        if let Some(cached) = self.cache.get(tenant_id) {
            return Ok(cached.clone());
        }

        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        // Another caller may have populated the cache while we waited.
        if let Some(cached) = self.cache.get(tenant_id) {
            return Ok(cached.clone());
        }

        let path = validate::config_path(&self.root, tenant_id)?;
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<TenantDocument>(&raw)
                .map_err(|e| TenantError::Corrupt(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !create_if_missing {
                    return Err(TenantError::NotFound);
                }
                let doc = TenantDocument::with_defaults(tenant_id);
                self.write_document(&doc).await?;
                info!(tenant = tenant_id, "created tenant config with defaults");
                doc
            }
            Err(e) => return Err(TenantError::Io(e.to_string())),
        };

        let config = Arc::new(self.merge(doc).await?);
        self.cache.insert(tenant_id.to_string(), config.clone());
        Ok(config)
    }

    /// Validated full-document write. The JSON half lands via temp file +
    /// atomic rename; the relational half is upserted row by row. The
    /// cache entry is replaced only after both halves are durable.
    #[instrument(skip(self, config))]
    pub async fn put(&self, tenant_id: &str, config: TenantConfig) -> Result<(), TenantError> {
        if config.tenant_id != tenant_id {
            return Err(TenantError::InvalidTenantId);
        }
        validate::validate_config(&config)?;

        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        self.write_document(&config.document()).await?;

        // Preserve the legacy alert channel column across writes.
        let existing = self
            .db
            .guild_config(tenant_id)
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;
        self.db
            .set_guild_config(
                tenant_id,
                config.min_tier_name.as_deref(),
                existing.alert_channel_id.as_deref(),
            )
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;
        let settings = AlertSettingsRow {
            min_margin_gp: config.alert_thresholds.min_margin_gp,
            min_score: config.alert_thresholds.min_score.round() as i64,
            enabled_tiers: serde_json::to_string(&config.alert_thresholds.enabled_tiers)
                .map_err(|e| TenantError::Corrupt(e.to_string()))?,
            max_alerts_per_interval: config.alert_thresholds.max_alerts_per_interval as i64,
            spike_rise_pct: config.alert_thresholds.spike_rise_pct,
        };
        self.db
            .set_alert_settings(tenant_id, &settings)
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;
        for (tier, setting) in &config.tier_roles {
            self.db
                .set_tier_setting(tenant_id, tier, setting.role_id.as_deref(), setting.enabled)
                .await
                .map_err(|e| TenantError::Store(e.to_string()))?;
        }

        self.cache.insert(tenant_id.to_string(), Arc::new(config));
        debug!(tenant = tenant_id, "tenant config written");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>, TenantError> {
        let mut tenants = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| TenantError::Io(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TenantError::Io(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                if validate::is_valid_tenant_id(id) {
                    tenants.push(id.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    pub async fn ban(&self, tenant_id: &str) -> Result<(), TenantError> {
        self.set_banned(tenant_id, true).await
    }

    pub async fn unban(&self, tenant_id: &str) -> Result<(), TenantError> {
        self.set_banned(tenant_id, false).await
    }

    async fn set_banned(&self, tenant_id: &str, banned: bool) -> Result<(), TenantError> {
        let current = self.get(tenant_id, true).await?;
        let mut updated = (*current).clone();
        updated.banned = banned;
        self.put(tenant_id, updated).await?;
        info!(tenant = tenant_id, banned, "tenant ban state changed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, tenant_id: &str) -> Result<(), TenantError> {
        let path = validate::config_path(&self.root, tenant_id)?;

        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TenantError::NotFound)
            }
            Err(e) => return Err(TenantError::Io(e.to_string())),
        }
        self.db
            .delete_tenant_rows(tenant_id)
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;
        self.cache.remove(tenant_id);
        info!(tenant = tenant_id, "tenant config deleted");
        Ok(())
    }

    /// Drop a cached entry; the next read goes back to disk.
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(tenant_id);
    }

    async fn merge(&self, doc: TenantDocument) -> Result<TenantConfig, TenantError> {
        let guild = self
            .db
            .guild_config(&doc.tenant_id)
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;
        let alert_row = self
            .db
            .alert_settings(&doc.tenant_id)
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;
        let tier_rows = self
            .db
            .tier_settings(&doc.tenant_id)
            .await
            .map_err(|e| TenantError::Store(e.to_string()))?;

        let tier_roles: BTreeMap<String, TierRoleSetting> = tier_rows
            .into_iter()
            .map(|row| {
                (
                    row.tier_name,
                    TierRoleSetting {
                        role_id: row.role_id,
                        enabled: row.enabled,
                    },
                )
            })
            .collect();

        let alert_thresholds = AlertThresholds {
            min_margin_gp: alert_row.min_margin_gp,
            min_score: alert_row.min_score as f64,
            enabled_tiers: alert_row.enabled_tier_names(),
            max_alerts_per_interval: alert_row.max_alerts_per_interval.clamp(1, 10) as u32,
            spike_rise_pct: alert_row.spike_rise_pct,
        };

        Ok(TenantConfig::from_parts(
            doc,
            guild.min_tier_name,
            tier_roles,
            alert_thresholds,
        ))
    }

    async fn write_document(&self, doc: &TenantDocument) -> Result<(), TenantError> {
        let path = validate::config_path(&self.root, &doc.tenant_id)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(doc).map_err(|e| TenantError::Corrupt(e.to_string()))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| TenantError::Io(e.to_string()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            // Leave no partial state behind.
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(error = %cleanup, "failed to remove orphaned temp file");
            }
            return Err(TenantError::Io(e.to_string()));
        }
        Ok(())
    }
}
