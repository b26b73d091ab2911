/// Spike detection: price rises with volume behind them

use serde::Serialize;

use super::risk::RiskMetrics;
use crate::upstream::ItemMeta;

#[derive(Debug, Clone, Serialize)]
pub struct SpikeEvent {
    pub item_id: i64,
    pub name: String,
    pub timestamp: i64,
    pub prev_high: i64,
    pub high: i64,
    pub low: i64,
    pub rise_pct: f64,
    pub volume: i64,
    pub buy_limit: i64,
    pub risk: RiskMetrics,
}

/// Emit a spike when the high rose at least `rise_threshold_pct` on volume
/// of at least `min_volume`.
#[allow(clippy::too_many_arguments)]
pub fn detect(
    meta: &ItemMeta,
    prev_high: i64,
    cur_high: i64,
    cur_low: i64,
    cur_volume: i64,
    timestamp: i64,
    rise_threshold_pct: f64,
    min_volume: i64,
    risk: RiskMetrics,
) -> Option<SpikeEvent> {
    if prev_high <= 0 || cur_high <= prev_high {
        return None;
    }
    let rise_pct = (cur_high - prev_high) as f64 / prev_high as f64 * 100.0;
    if rise_pct < rise_threshold_pct || cur_volume < min_volume {
        return None;
    }

    Some(SpikeEvent {
        item_id: meta.id,
        name: meta.name.clone(),
        timestamp,
        prev_high,
        high: cur_high,
        low: cur_low,
        rise_pct,
        volume: cur_volume,
        buy_limit: meta.buy_limit,
        risk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk;

    fn meta() -> ItemMeta {
        ItemMeta {
            id: 2,
            name: "Cannonball".to_string(),
            members: true,
            buy_limit: 11_000,
            examine: None,
            icon: None,
            highalch: None,
            lowalch: None,
        }
    }

    fn no_risk() -> RiskMetrics {
        risk::assess(&[], 0, 0)
    }

    #[test]
    fn rise_at_threshold_emits() {
        let spike = detect(&meta(), 100, 105, 95, 500, 0, 5.0, 100, no_risk()).unwrap();
        assert!((spike.rise_pct - 5.0).abs() < 0.001);
    }

    #[test]
    fn rise_below_threshold_is_ignored() {
        assert!(detect(&meta(), 100, 104, 95, 500, 0, 5.0, 100, no_risk()).is_none());
    }

    #[test]
    fn thin_volume_is_ignored() {
        assert!(detect(&meta(), 100, 120, 95, 50, 0, 5.0, 100, no_risk()).is_none());
    }

    #[test]
    fn falling_price_is_not_a_spike() {
        assert!(detect(&meta(), 100, 90, 85, 500, 0, 5.0, 100, no_risk()).is_none());
        assert!(detect(&meta(), 100, 100, 95, 500, 0, 5.0, 100, no_risk()).is_none());
    }
}
