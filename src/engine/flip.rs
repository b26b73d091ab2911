/// Flip margin detection

use serde::Serialize;

use super::risk::RiskMetrics;
use crate::upstream::ItemMeta;

/// Exchange sale tax: 1 % of the sell price, capped at 5M.
pub fn exchange_tax(sell: i64) -> i64 {
    (sell / 100).min(5_000_000)
}

#[derive(Debug, Clone, Serialize)]
pub struct FlipCandidate {
    pub item_id: i64,
    pub name: String,
    pub timestamp: i64,
    /// Instant-sell price: what a flip buys at.
    pub buy: i64,
    /// Instant-buy price: what a flip sells at.
    pub sell: i64,
    pub insta_buy: i64,
    pub insta_sell: i64,
    pub margin_gp: i64,
    /// Margin after the exchange sale tax.
    pub net_margin_gp: i64,
    pub roi_pct: f64,
    pub volume: i64,
    pub buy_limit: i64,
    pub risk: RiskMetrics,
}

/// Emit a candidate when the raw margin and volume clear the configured
/// floors. Untradeable items never flip.
pub fn detect(
    meta: &ItemMeta,
    low: i64,
    high: i64,
    volume: i64,
    timestamp: i64,
    margin_min: i64,
    min_volume: i64,
    risk: RiskMetrics,
) -> Option<FlipCandidate> {
    if meta.buy_limit <= 0 || low <= 0 || high <= 0 {
        return None;
    }
    let margin_gp = high - low;
    if margin_gp < margin_min || volume < min_volume {
        return None;
    }

    Some(FlipCandidate {
        item_id: meta.id,
        name: meta.name.clone(),
        timestamp,
        buy: low,
        sell: high,
        insta_buy: high,
        insta_sell: low,
        margin_gp,
        net_margin_gp: margin_gp - exchange_tax(high),
        roi_pct: margin_gp as f64 / low as f64 * 100.0,
        volume,
        buy_limit: meta.buy_limit,
        risk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk;

    fn meta(limit: i64) -> ItemMeta {
        ItemMeta {
            id: 11_802,
            name: "Armadyl godsword".to_string(),
            members: true,
            buy_limit: limit,
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
    fn tax_is_one_percent_capped() {
        assert_eq!(exchange_tax(100), 1);
        assert_eq!(exchange_tax(1_000_000), 10_000);
        assert_eq!(exchange_tax(2_000_000_000), 5_000_000);
    }

    #[test]
    fn margin_above_floor_emits() {
        let flip = detect(&meta(8), 10_000_000, 10_250_000, 300, 0, 100_000, 100, no_risk())
            .unwrap();
        assert_eq!(flip.margin_gp, 250_000);
        assert_eq!(flip.net_margin_gp, 250_000 - 102_500);
        assert!((flip.roi_pct - 2.5).abs() < 0.01);
    }

    #[test]
    fn thin_margin_is_ignored() {
        assert!(detect(&meta(8), 10_000_000, 10_050_000, 300, 0, 100_000, 100, no_risk())
            .is_none());
    }

    #[test]
    fn thin_volume_is_ignored() {
        assert!(detect(&meta(8), 10_000_000, 10_250_000, 10, 0, 100_000, 100, no_risk())
            .is_none());
    }

    #[test]
    fn untradeable_items_never_flip() {
        assert!(detect(&meta(0), 10_000_000, 10_250_000, 300, 0, 100_000, 100, no_risk())
            .is_none());
    }
}
