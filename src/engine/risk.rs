/// Risk assessment shared by flip, dump, and spike output

use serde::{Deserialize, Serialize};

use crate::database::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 20.0 {
            RiskLevel::Low
        } else if score < 40.0 {
            RiskLevel::Medium
        } else if score < 60.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }

    /// Key into the tenant role map.
    pub fn role_key(&self) -> &'static str {
        match self {
            RiskLevel::Low => "risk_low",
            RiskLevel::Medium => "risk_medium",
            RiskLevel::High => "risk_high",
            RiskLevel::VeryHigh => "risk_very_high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::VeryHigh => "VERY HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub liquidity_score: f64,
    pub volatility_pct: f64,
}

/// Weighted risk model: 24 h price volatility (40 %), inverse volume
/// velocity (30 %), inverse liquidity (30 %). All components live on a
/// 0–100 scale before weighting.
pub fn assess(history_24h: &[Snapshot], volume: i64, buy_limit: i64) -> RiskMetrics {
    let volatility_pct = volatility_pct(history_24h);
    let volatility_score = (volatility_pct * 2.5).min(100.0);

    let volume_velocity = ((volume as f64 / 1_000.0) * 10.0).min(100.0);

    let liquidity_score = if buy_limit > 0 {
        ((volume as f64 / buy_limit as f64) / 10.0 * 100.0).min(100.0)
    } else {
        0.0
    };

    let risk_score = volatility_score * 0.4
        + (100.0 - volume_velocity) * 0.3
        + (100.0 - liquidity_score) * 0.3;

    RiskMetrics {
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
        liquidity_score,
        volatility_pct,
    }
}

/// Mid-price swing over the window as a percentage of the window mean.
fn volatility_pct(history: &[Snapshot]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let mids: Vec<f64> = history
        .iter()
        .map(|s| (s.low + s.high) as f64 / 2.0)
        .collect();
    let mean = mids.iter().sum::<f64>() / mids.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let min = mids.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = mids.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (max - min) / mean * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ts: i64, low: i64, high: i64) -> Snapshot {
        Snapshot {
            item_id: 1,
            timestamp: ts,
            low,
            high,
            volume: 100,
        }
    }

    #[test]
    fn level_buckets_split_at_20_40_60() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(19.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(20.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(39.9), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(40.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(59.9), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(60.0), RiskLevel::VeryHigh);
    }

    #[test]
    fn flat_history_has_zero_volatility() {
        let history = vec![snap(0, 100, 110), snap(300, 100, 110)];
        assert_eq!(volatility_pct(&history), 0.0);
    }

    #[test]
    fn single_snapshot_has_zero_volatility() {
        assert_eq!(volatility_pct(&[snap(0, 100, 110)]), 0.0);
    }

    #[test]
    fn high_volume_liquid_item_is_lower_risk() {
        let history = vec![snap(0, 100, 102), snap(300, 100, 102)];
        let liquid = assess(&history, 50_000, 10_000);
        let illiquid = assess(&history, 10, 10_000);
        assert!(liquid.risk_score < illiquid.risk_score);
        assert_eq!(illiquid.risk_level, RiskLevel::VeryHigh);
    }

    #[test]
    fn zero_buy_limit_scores_no_liquidity() {
        let metrics = assess(&[], 5_000, 0);
        assert_eq!(metrics.liquidity_score, 0.0);
    }
}
