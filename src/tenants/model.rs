use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Channel-kind → external channel id (numeric id or channel name).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelMap {
    pub cheap_flips: Option<String>,
    pub medium_flips: Option<String>,
    pub expensive_flips: Option<String>,
    pub billionaire_flips: Option<String>,
    pub recipe_items: Option<String>,
    pub high_alch_margins: Option<String>,
    pub high_limit_items: Option<String>,
    pub dumps: Option<String>,
    pub spikes: Option<String>,
    pub flips: Option<String>,
}

impl ChannelMap {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Option<String>)> {
        [
            ("cheap_flips", &self.cheap_flips),
            ("medium_flips", &self.medium_flips),
            ("expensive_flips", &self.expensive_flips),
            ("billionaire_flips", &self.billionaire_flips),
            ("recipe_items", &self.recipe_items),
            ("high_alch_margins", &self.high_alch_margins),
            ("high_limit_items", &self.high_limit_items),
            ("dumps", &self.dumps),
            ("spikes", &self.spikes),
            ("flips", &self.flips),
        ]
        .into_iter()
    }
}

/// Role-kind → role id for mentions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoleMap {
    pub risk_low: Option<String>,
    pub risk_medium: Option<String>,
    pub risk_high: Option<String>,
    pub risk_very_high: Option<String>,
    pub quality_deal: Option<String>,
    pub quality_good: Option<String>,
    pub quality_premium: Option<String>,
    pub quality_elite: Option<String>,
    pub quality_god_tier: Option<String>,
    pub quality_nuclear: Option<String>,
    pub dumps: Option<String>,
    pub spikes: Option<String>,
    pub flips: Option<String>,
}

impl RoleMap {
    pub fn get(&self, key: &str) -> Option<&String> {
        match key {
            "risk_low" => self.risk_low.as_ref(),
            "risk_medium" => self.risk_medium.as_ref(),
            "risk_high" => self.risk_high.as_ref(),
            "risk_very_high" => self.risk_very_high.as_ref(),
            "quality_deal" => self.quality_deal.as_ref(),
            "quality_good" => self.quality_good.as_ref(),
            "quality_premium" => self.quality_premium.as_ref(),
            "quality_elite" => self.quality_elite.as_ref(),
            "quality_god_tier" => self.quality_god_tier.as_ref(),
            "quality_nuclear" => self.quality_nuclear.as_ref(),
            "dumps" => self.dumps.as_ref(),
            "spikes" => self.spikes.as_ref(),
            "flips" => self.flips.as_ref(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Option<String>)> {
        [
            ("risk_low", &self.risk_low),
            ("risk_medium", &self.risk_medium),
            ("risk_high", &self.risk_high),
            ("risk_very_high", &self.risk_very_high),
            ("quality_deal", &self.quality_deal),
            ("quality_good", &self.quality_good),
            ("quality_premium", &self.quality_premium),
            ("quality_elite", &self.quality_elite),
            ("quality_god_tier", &self.quality_god_tier),
            ("quality_nuclear", &self.quality_nuclear),
            ("dumps", &self.dumps),
            ("spikes", &self.spikes),
            ("flips", &self.flips),
        ]
        .into_iter()
    }
}

/// Price boundaries classifying flip alerts into channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriceBrackets {
    pub cheap_max: i64,
    pub medium_max: i64,
    pub expensive_max: i64,
}

impl Default for PriceBrackets {
    fn default() -> Self {
        Self {
            cheap_max: 10_000,
            medium_max: 500_000,
            expensive_max: 50_000_000,
        }
    }
}

/// Per-tenant alert filtering. An empty `enabled_tiers` allows every tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    pub min_margin_gp: i64,
    pub min_score: f64,
    pub enabled_tiers: Vec<String>,
    pub max_alerts_per_interval: u32,
    /// Tenant override for the spike rise threshold; the process default
    /// applies when unset.
    pub spike_rise_pct: Option<f64>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_margin_gp: 0,
            min_score: 0.0,
            enabled_tiers: Vec::new(),
            max_alerts_per_interval: 1,
            spike_rise_pct: None,
        }
    }
}

impl AlertThresholds {
    pub fn allows_tier(&self, tier: &str) -> bool {
        self.enabled_tiers.is_empty()
            || self
                .enabled_tiers
                .iter()
                .any(|t| t.eq_ignore_ascii_case(tier))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierRoleSetting {
    pub role_id: Option<String>,
    pub enabled: bool,
}

impl Default for TierRoleSetting {
    fn default() -> Self {
        Self {
            role_id: None,
            enabled: true,
        }
    }
}

/// The on-disk half of a tenant's configuration
/// (`<config_root>/<tenant_id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TenantDocument {
    pub tenant_id: String,
    pub admin_token: String,
    pub enabled: bool,
    pub banned: bool,
    pub channels: ChannelMap,
    pub roles: RoleMap,
    pub price_brackets: PriceBrackets,
}

impl Default for TenantDocument {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            admin_token: String::new(),
            enabled: true,
            banned: false,
            channels: ChannelMap::default(),
            roles: RoleMap::default(),
            price_brackets: PriceBrackets::default(),
        }
    }
}

impl TenantDocument {
    /// Fresh document with a generated admin token (64 random hex chars).
    pub fn with_defaults(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            admin_token: generate_admin_token(),
            ..Self::default()
        }
    }
}

pub fn generate_admin_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// The unified per-tenant configuration the router and API consume: the
/// JSON document merged with the relational tier/alert settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub admin_token: String,
    pub enabled: bool,
    pub banned: bool,
    pub channels: ChannelMap,
    pub roles: RoleMap,
    pub price_brackets: PriceBrackets,
    pub min_tier_name: Option<String>,
    pub tier_roles: BTreeMap<String, TierRoleSetting>,
    pub alert_thresholds: AlertThresholds,
}

impl TenantConfig {
    pub fn from_parts(
        doc: TenantDocument,
        min_tier_name: Option<String>,
        tier_roles: BTreeMap<String, TierRoleSetting>,
        alert_thresholds: AlertThresholds,
    ) -> Self {
        Self {
            tenant_id: doc.tenant_id,
            admin_token: doc.admin_token,
            enabled: doc.enabled,
            banned: doc.banned,
            channels: doc.channels,
            roles: doc.roles,
            price_brackets: doc.price_brackets,
            min_tier_name,
            tier_roles,
            alert_thresholds,
        }
    }

    pub fn document(&self) -> TenantDocument {
        TenantDocument {
            tenant_id: self.tenant_id.clone(),
            admin_token: self.admin_token.clone(),
            enabled: self.enabled,
            banned: self.banned,
            channels: self.channels.clone(),
            roles: self.roles.clone(),
            price_brackets: self.price_brackets.clone(),
        }
    }

    /// Tier role for mentions, honoring the per-tier enable switch.
    pub fn tier_role(&self, tier: &str) -> Option<&String> {
        self.tier_roles
            .get(tier)
            .filter(|s| s.enabled)
            .and_then(|s| s.role_id.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_admin_token_is_long_and_url_safe() {
        let token = generate_admin_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_admin_token());
    }

    #[test]
    fn empty_enabled_tiers_allows_everything() {
        let thresholds = AlertThresholds::default();
        assert!(thresholds.allows_tier("iron"));
        assert!(thresholds.allows_tier("diamond"));
    }

    #[test]
    fn enabled_tiers_filter_is_case_insensitive() {
        let thresholds = AlertThresholds {
            enabled_tiers: vec!["gold".into(), "diamond".into()],
            ..AlertThresholds::default()
        };
        assert!(thresholds.allows_tier("Gold"));
        assert!(!thresholds.allows_tier("iron"));
    }

    #[test]
    fn tier_role_respects_enable_switch() {
        let mut config = TenantConfig::from_parts(
            TenantDocument::with_defaults("123456789012345678"),
            None,
            BTreeMap::new(),
            AlertThresholds::default(),
        );
        config.tier_roles.insert(
            "sapphire".into(),
            TierRoleSetting {
                role_id: Some("999".into()),
                enabled: true,
            },
        );
        config.tier_roles.insert(
            "gold".into(),
            TierRoleSetting {
                role_id: Some("888".into()),
                enabled: false,
            },
        );
        assert_eq!(config.tier_role("sapphire"), Some(&"999".to_string()));
        assert_eq!(config.tier_role("gold"), None);
        assert_eq!(config.tier_role("iron"), None);
    }

    #[test]
    fn document_round_trips_through_json() {
        let doc = TenantDocument::with_defaults("123456789012345678");
        let raw = serde_json::to_string(&doc).unwrap();
        let back: TenantDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc, back);
    }
}
