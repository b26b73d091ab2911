/// Input validation for everything that crosses the tenant boundary
///
/// Identifiers are validated structurally before any of them touch the
/// filesystem or the database; an invalid write mutates nothing.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::model::{AlertThresholds, TenantConfig};
use crate::engine::tier::is_known_tier;

#[derive(Error, Debug)]
pub enum TenantError {
    #[error("invalid tenant id")]
    InvalidTenantId,

    #[error("invalid channel identifier")]
    InvalidChannel,

    #[error("invalid role identifier")]
    InvalidRole,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid webhook url")]
    InvalidWebhook,

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("config path escapes the config root")]
    PathEscape,

    #[error("tenant not found")]
    NotFound,

    #[error("tenant store io failure: {0}")]
    Io(String),

    #[error("tenant document corrupt: {0}")]
    Corrupt(String),

    #[error("tenant store backend failure: {0}")]
    Store(String),
}

/// Tenant ids are the chat platform's numeric identifiers: 17–19 digits.
pub fn is_valid_tenant_id(id: &str) -> bool {
    (17..=19).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_digit())
}

/// Channel references are either numeric ids or names limited to
/// `[a-zA-Z0-9_-]`, at most 100 chars.
pub fn is_valid_channel(channel: &str) -> bool {
    if channel.is_empty() {
        return false;
    }
    if (17..=19).contains(&channel.len()) && channel.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    channel.len() <= 100
        && channel
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Role identifiers share the channel grammar.
pub fn is_valid_role(role: &str) -> bool {
    is_valid_channel(role)
}

/// Chat platform tokens: three non-empty dot-separated base64url-like
/// segments, 50–70 chars overall.
pub fn is_valid_token(token: &str) -> bool {
    if !(50..=70).contains(&token.len()) {
        return false;
    }
    if !token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return false;
    }
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}

const WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

pub fn is_valid_webhook(url: &str) -> bool {
    url.starts_with(WEBHOOK_PREFIX) && url.len() <= 500
}

pub fn validate_thresholds(thresholds: &AlertThresholds) -> Result<(), TenantError> {
    if thresholds.min_margin_gp < 0 {
        return Err(TenantError::InvalidThresholds(
            "min_margin_gp must be non-negative".into(),
        ));
    }
    if !(0.0..=100.0).contains(&thresholds.min_score) {
        return Err(TenantError::InvalidThresholds(
            "min_score must be within 0..=100".into(),
        ));
    }
    if !(1..=10).contains(&thresholds.max_alerts_per_interval) {
        return Err(TenantError::InvalidThresholds(
            "max_alerts_per_interval must be within 1..=10".into(),
        ));
    }
    if let Some(rise) = thresholds.spike_rise_pct {
        if !(0.0..=100.0).contains(&rise) {
            return Err(TenantError::InvalidThresholds(
                "spike_rise_pct must be within 0..=100".into(),
            ));
        }
    }
    for tier in &thresholds.enabled_tiers {
        if !is_known_tier(tier) {
            return Err(TenantError::InvalidThresholds(format!(
                "unknown tier name: {tier}"
            )));
        }
    }
    Ok(())
}

/// Full-document validation applied on every write path.
pub fn validate_config(config: &TenantConfig) -> Result<(), TenantError> {
    if !is_valid_tenant_id(&config.tenant_id) {
        return Err(TenantError::InvalidTenantId);
    }
    for (_, channel) in config.channels.iter() {
        if let Some(channel) = channel {
            if !is_valid_channel(channel) {
                return Err(TenantError::InvalidChannel);
            }
        }
    }
    for (_, role) in config.roles.iter() {
        if let Some(role) = role {
            if !is_valid_role(role) {
                return Err(TenantError::InvalidRole);
            }
        }
    }
    for (tier, setting) in &config.tier_roles {
        if !is_known_tier(tier) {
            return Err(TenantError::InvalidThresholds(format!(
                "unknown tier name: {tier}"
            )));
        }
        if let Some(role) = &setting.role_id {
            if !is_valid_role(role) {
                return Err(TenantError::InvalidRole);
            }
        }
    }
    if let Some(tier) = &config.min_tier_name {
        if !is_known_tier(tier) {
            return Err(TenantError::InvalidThresholds(format!(
                "unknown tier name: {tier}"
            )));
        }
    }
    let brackets = &config.price_brackets;
    if brackets.cheap_max <= 0
        || brackets.medium_max < brackets.cheap_max
        || brackets.expensive_max < brackets.medium_max
    {
        return Err(TenantError::InvalidThresholds(
            "price brackets must be positive and non-decreasing".into(),
        ));
    }
    validate_thresholds(&config.alert_thresholds)?;
    Ok(())
}

/// Compose the document path for a tenant and prove it stays inside the
/// config root. The id grammar already forbids separators; this is the
/// second line of defense.
pub fn config_path(root: &Path, tenant_id: &str) -> Result<PathBuf, TenantError> {
    if !is_valid_tenant_id(tenant_id) {
        return Err(TenantError::InvalidTenantId);
    }
    let path = root.join(format!("{tenant_id}.json"));
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(TenantError::PathEscape);
    }
    match path.parent() {
        Some(parent) if parent == root => Ok(path),
        _ => Err(TenantError::PathEscape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenants::model::TenantDocument;
    use std::collections::BTreeMap;

    #[test]
    fn tenant_id_grammar() {
        assert!(is_valid_tenant_id("123456789012345678"));
        assert!(is_valid_tenant_id("12345678901234567"));
        assert!(is_valid_tenant_id("1234567890123456789"));
        assert!(!is_valid_tenant_id("1234567890123456"));
        assert!(!is_valid_tenant_id("12345678901234567890"));
        assert!(!is_valid_tenant_id("../etc"));
        assert!(!is_valid_tenant_id("12345678901234567a"));
        assert!(!is_valid_tenant_id(""));
    }

    #[test]
    fn channel_grammar() {
        assert!(is_valid_channel("123456789012345678"));
        assert!(is_valid_channel("dump-alerts_2"));
        assert!(!is_valid_channel("bad channel"));
        assert!(!is_valid_channel("../../etc/passwd"));
        assert!(!is_valid_channel(""));
        assert!(!is_valid_channel(&"x".repeat(101)));
    }

    #[test]
    fn token_grammar() {
        let good = format!("{}.{}.{}", "A".repeat(24), "B".repeat(6), "C".repeat(27));
        assert_eq!(good.len(), 59);
        assert!(is_valid_token(&good));
        assert!(!is_valid_token("short.token.x"));
        assert!(!is_valid_token(&"A".repeat(59)));
        let two_dots = format!("{}..{}", "A".repeat(30), "C".repeat(27));
        assert!(!is_valid_token(&two_dots));
    }

    #[test]
    fn webhook_must_target_platform_host() {
        assert!(is_valid_webhook(
            "https://discord.com/api/webhooks/123/abcdef"
        ));
        assert!(!is_valid_webhook("https://evil.example/api/webhooks/123/x"));
        assert!(!is_valid_webhook("http://discord.com/api/webhooks/123/x"));
    }

    #[test]
    fn threshold_ranges_enforced() {
        let mut thresholds = AlertThresholds::default();
        assert!(validate_thresholds(&thresholds).is_ok());

        thresholds.max_alerts_per_interval = 0;
        assert!(validate_thresholds(&thresholds).is_err());
        thresholds.max_alerts_per_interval = 11;
        assert!(validate_thresholds(&thresholds).is_err());
        thresholds.max_alerts_per_interval = 10;
        assert!(validate_thresholds(&thresholds).is_ok());

        thresholds.min_score = 101.0;
        assert!(validate_thresholds(&thresholds).is_err());
        thresholds.min_score = 50.0;

        thresholds.enabled_tiers = vec!["mithril".into()];
        assert!(validate_thresholds(&thresholds).is_err());
        thresholds.enabled_tiers = vec!["gold".into()];
        assert!(validate_thresholds(&thresholds).is_ok());
    }

    #[test]
    fn config_path_rejects_traversal() {
        let root = Path::new("server_configs");
        assert!(config_path(root, "123456789012345678").is_ok());
        assert!(matches!(
            config_path(root, "../etc"),
            Err(TenantError::InvalidTenantId)
        ));
    }

    #[test]
    fn full_config_validation_catches_bad_channel() {
        let mut config = TenantConfig::from_parts(
            TenantDocument::with_defaults("123456789012345678"),
            None,
            BTreeMap::new(),
            AlertThresholds::default(),
        );
        assert!(validate_config(&config).is_ok());

        config.channels.dumps = Some("not a channel!".into());
        assert!(matches!(
            validate_config(&config),
            Err(TenantError::InvalidChannel)
        ));
    }

    #[test]
    fn full_config_validation_catches_bad_brackets() {
        let mut config = TenantConfig::from_parts(
            TenantDocument::with_defaults("123456789012345678"),
            None,
            BTreeMap::new(),
            AlertThresholds::default(),
        );
        config.price_brackets.medium_max = config.price_brackets.cheap_max - 1;
        assert!(validate_config(&config).is_err());
    }
}
