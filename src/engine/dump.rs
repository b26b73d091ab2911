/// Dump detection: oversupply events scored 0–100
///
/// A dump is not just a price drop. The score combines the drop itself with
/// volume evidence of oversupply:
///   40 %  price drop vs the previous snapshot
///   30 %  volume spike vs the expected per-window baseline
///   20 %  oversupply (window volume vs the 4 h buy limit)
///   10 %  buy speed (same measurement as oversupply, weighted separately)

use serde::{Deserialize, Serialize};

use super::risk::RiskMetrics;
use super::tier::{tier_for_score, TierGroup};
use crate::database::Snapshot;
use crate::upstream::ItemMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFlag {
    SlowBuy,
    OneGpDump,
    Super,
}

/// Quality label layered on top of the tier, used for role mentions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Nuclear,
    GodTier,
    Elite,
    Premium,
    Good,
    Deal,
}

impl QualityLabel {
    pub fn role_key(&self) -> &'static str {
        match self {
            QualityLabel::Nuclear => "quality_nuclear",
            QualityLabel::GodTier => "quality_god_tier",
            QualityLabel::Elite => "quality_elite",
            QualityLabel::Premium => "quality_premium",
            QualityLabel::Good => "quality_good",
            QualityLabel::Deal => "quality_deal",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityLabel::Nuclear => "NUCLEAR DUMP",
            QualityLabel::GodTier => "GOD-TIER",
            QualityLabel::Elite => "ELITE",
            QualityLabel::Premium => "PREMIUM",
            QualityLabel::Good => "GOOD",
            QualityLabel::Deal => "DEAL",
        }
    }
}

/// Volume above which a dump is labeled nuclear regardless of score.
const NUCLEAR_VOLUME: i64 = 1_500_000;

pub fn quality_label(drop_pct: f64, volume: i64, low: i64) -> Option<QualityLabel> {
    if volume > NUCLEAR_VOLUME {
        return Some(QualityLabel::Nuclear);
    }
    let q = (drop_pct / 10.0) * (volume as f64 / 1_000.0) * (low as f64 / 1_000_000.0);
    if q >= 100.0 {
        Some(QualityLabel::GodTier)
    } else if q >= 40.0 {
        Some(QualityLabel::Elite)
    } else if q >= 15.0 {
        Some(QualityLabel::Premium)
    } else if q >= 5.0 {
        Some(QualityLabel::Good)
    } else if q >= 1.0 {
        Some(QualityLabel::Deal)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DumpEvent {
    pub item_id: i64,
    pub name: String,
    pub timestamp: i64,
    pub prev_low: i64,
    pub low: i64,
    pub high: i64,
    pub drop_pct: f64,
    pub vol_spike_pct: f64,
    pub oversupply_pct: f64,
    pub buy_speed_pct: f64,
    pub score: f64,
    pub tier: &'static str,
    pub emoji: &'static str,
    pub group: TierGroup,
    pub volume: i64,
    pub buy_limit: i64,
    pub margin_gp: i64,
    pub max_profit_gp: i64,
    pub flags: Vec<DumpFlag>,
    pub quality: Option<QualityLabel>,
    pub risk: RiskMetrics,
}

impl DumpEvent {
    pub fn has_flag(&self, flag: DumpFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Weighted dump quality score, clamped to [0, 100].
///
/// `avg_volume` feeds the literal `avg / 288` baseline. The callers pass a
/// recent-window mean rather than a true daily average; the expression is
/// kept as-is so scores stay comparable with history.
pub fn compute_dump_score(
    prev_low: i64,
    cur_low: i64,
    cur_volume: i64,
    avg_volume: f64,
    buy_limit: i64,
) -> f64 {
    if prev_low <= 0 || cur_low <= 0 {
        return 0.0;
    }

    let drop_pct = ((prev_low - cur_low) as f64 / prev_low as f64 * 100.0).max(0.0);
    let drop_score = (drop_pct * 2.0).min(40.0);

    let expected_5m = if avg_volume > 0.0 { avg_volume / 288.0 } else { 1.0 };
    let vol_spike_pct =
        ((cur_volume as f64 - expected_5m) / expected_5m.max(1.0) * 100.0).max(0.0);
    let vol_spike_score = (vol_spike_pct * 0.3).min(30.0);

    let oversupply_pct = if buy_limit > 0 {
        cur_volume as f64 / buy_limit as f64 * 100.0
    } else {
        0.0
    };
    let oversupply_score = (oversupply_pct * 0.2).min(20.0);

    // Same measurement as oversupply with its own weight; preserved as-is
    // even though it double-counts volume-over-limit.
    let buy_speed_pct = oversupply_pct;
    let buy_speed_score = (buy_speed_pct * 0.1).min(10.0);

    (drop_score + vol_spike_score + oversupply_score + buy_speed_score).clamp(0.0, 100.0)
}

/// Evaluate one item against its snapshot history (newest first). Returns
/// `None` unless all of: tradeable buy limit, at least two snapshots, a
/// drop of at least `min_drop_pct`, and a positive score.
#[allow(clippy::too_many_arguments)]
pub fn detect(
    meta: &ItemMeta,
    history: &[Snapshot],
    cur_low: i64,
    cur_high: i64,
    cur_volume: i64,
    timestamp: i64,
    min_drop_pct: f64,
    risk: RiskMetrics,
) -> Option<DumpEvent> {
    if meta.buy_limit <= 0 || history.len() < 2 || cur_low <= 0 {
        return None;
    }

    // Second newest snapshot is the "before" state.
    let prev_low = history[1].low;
    if prev_low <= 0 || cur_low >= prev_low {
        return None;
    }

    let drop_pct = (prev_low - cur_low) as f64 / prev_low as f64 * 100.0;
    if drop_pct < min_drop_pct {
        return None;
    }

    let avg_volume = history.iter().map(|s| s.volume as f64).sum::<f64>() / history.len() as f64;
    let score = compute_dump_score(prev_low, cur_low, cur_volume, avg_volume, meta.buy_limit);
    if score <= 0.0 {
        return None;
    }
    let expected_5m = if avg_volume > 0.0 { avg_volume / 288.0 } else { 1.0 };
    let vol_spike_pct =
        ((cur_volume as f64 - expected_5m) / expected_5m.max(1.0) * 100.0).max(0.0);
    let oversupply_pct = cur_volume as f64 / meta.buy_limit as f64 * 100.0;
    let buy_speed_pct = oversupply_pct;

    let mut flags = Vec::new();
    if buy_speed_pct < 50.0 {
        flags.push(DumpFlag::SlowBuy);
    }
    if cur_low == 1 {
        flags.push(DumpFlag::OneGpDump);
    }
    if score >= 51.0 {
        flags.push(DumpFlag::Super);
    }

    let tier = tier_for_score(score);
    let margin_gp = (cur_high - cur_low).max(0);

    Some(DumpEvent {
        item_id: meta.id,
        name: meta.name.clone(),
        timestamp,
        prev_low,
        low: cur_low,
        high: cur_high,
        drop_pct,
        vol_spike_pct,
        oversupply_pct,
        buy_speed_pct,
        score,
        tier: tier.name,
        emoji: tier.emoji,
        group: tier.group,
        volume: cur_volume,
        buy_limit: meta.buy_limit,
        margin_gp,
        max_profit_gp: margin_gp.saturating_mul(meta.buy_limit),
        flags,
        quality: quality_label(drop_pct, cur_volume, cur_low),
        risk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk;

    fn meta(id: i64, limit: i64) -> ItemMeta {
        ItemMeta {
            id,
            name: format!("Item {id}"),
            members: true,
            buy_limit: limit,
            examine: None,
            icon: None,
            highalch: None,
            lowalch: None,
        }
    }

    fn snap(ts: i64, low: i64, high: i64, volume: i64) -> Snapshot {
        Snapshot {
            item_id: 42,
            timestamp: ts,
            low,
            high,
            volume,
        }
    }

    fn no_risk() -> RiskMetrics {
        risk::assess(&[], 0, 0)
    }

    #[test]
    fn score_matches_worked_example() {
        // 30 % drop → 40 pts; expected 5m = 50_000 / 288 ≈ 173.6, spike ≈
        // 188 % → 30 pts; oversupply 10 % → 2 pts; buy speed 10 % → 1 pt.
        let score = compute_dump_score(3_000, 2_100, 500, 50_000.0, 5_000);
        assert!((score - 73.0).abs() < 0.5, "score was {score}");
        assert_eq!(tier_for_score(score).name, "sapphire");
    }

    #[test]
    fn price_rise_scores_zero_drop_component() {
        let score = compute_dump_score(100, 120, 10, 1_000.0, 1_000);
        assert!(score < 40.0);
    }

    #[test]
    fn invalid_prices_score_zero() {
        assert_eq!(compute_dump_score(0, 100, 10, 100.0, 100), 0.0);
        assert_eq!(compute_dump_score(100, 0, 10, 100.0, 100), 0.0);
    }

    #[test]
    fn score_is_clamped_to_100() {
        let score = compute_dump_score(1_000_000, 1, 10_000_000, 10.0, 1);
        assert!(score <= 100.0);
    }

    #[test]
    fn detect_requires_two_snapshots() {
        let history = vec![snap(300, 2_100, 2_200, 500)];
        assert!(detect(&meta(42, 5_000), &history, 2_100, 2_200, 500, 300, 5.0, no_risk()).is_none());
    }

    #[test]
    fn detect_requires_buy_limit() {
        let history = vec![snap(300, 2_100, 2_200, 500), snap(0, 3_000, 3_100, 500)];
        assert!(detect(&meta(42, 0), &history, 2_100, 2_200, 500, 300, 5.0, no_risk()).is_none());
    }

    #[test]
    fn detect_requires_price_drop() {
        let history = vec![snap(300, 3_000, 3_100, 500), snap(0, 3_000, 3_100, 500)];
        assert!(detect(&meta(42, 5_000), &history, 3_000, 3_100, 500, 300, 5.0, no_risk()).is_none());
    }

    #[test]
    fn worked_example_emits_sapphire_dump() {
        let history = vec![snap(300, 2_100, 2_200, 500), snap(0, 3_000, 3_100, 500)];
        let event =
            detect(&meta(42, 5_000), &history, 2_100, 2_200, 500, 300, 5.0, no_risk()).unwrap();
        assert!((event.drop_pct - 30.0).abs() < 0.01);
        assert!((event.oversupply_pct - 10.0).abs() < 0.01);
        assert!(event.has_flag(DumpFlag::SlowBuy));
        assert!(event.drop_pct > 0.0);
        assert_eq!(event.margin_gp, 100);
    }

    #[test]
    fn one_gp_dump_flag_set_at_floor_price() {
        let history = vec![snap(300, 1, 50, 2_000), snap(0, 100, 150, 100)];
        let event = detect(&meta(42, 1_000), &history, 1, 50, 2_000, 300, 5.0, no_risk()).unwrap();
        assert!(event.has_flag(DumpFlag::OneGpDump));
    }

    #[test]
    fn super_flag_tracks_platinum_threshold() {
        let history = vec![snap(300, 2_100, 2_200, 500), snap(0, 3_000, 3_100, 500)];
        let event =
            detect(&meta(42, 5_000), &history, 2_100, 2_200, 500, 300, 5.0, no_risk()).unwrap();
        assert!(event.score >= 51.0);
        assert!(event.has_flag(DumpFlag::Super));
    }

    #[test]
    fn nuclear_quality_overrides_score_formula() {
        assert_eq!(quality_label(1.0, 2_000_000, 10), Some(QualityLabel::Nuclear));
    }

    #[test]
    fn quality_thresholds_ladder() {
        // q = (drop/10) * (vol/1000) * (low/1M)
        assert_eq!(quality_label(10.0, 1_000, 1_000_000), Some(QualityLabel::Deal));
        assert_eq!(quality_label(10.0, 5_000, 1_000_000), Some(QualityLabel::Good));
        assert_eq!(quality_label(10.0, 15_000, 1_000_000), Some(QualityLabel::Premium));
        assert_eq!(quality_label(10.0, 40_000, 1_000_000), Some(QualityLabel::Elite));
        assert_eq!(quality_label(10.0, 100_000, 1_000_000), Some(QualityLabel::GodTier));
        assert_eq!(quality_label(0.1, 100, 100), None);
    }
}
