/// Event engine: turns snapshots into dumps, spikes, and flip candidates

pub mod dump;
pub mod flip;
pub mod risk;
pub mod spike;
pub mod tier;

pub use dump::{DumpEvent, DumpFlag, QualityLabel};
pub use flip::FlipCandidate;
pub use risk::{RiskLevel, RiskMetrics};
pub use spike::SpikeEvent;
pub use tier::{Tier, TierGroup, TIERS};

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::catalog::ItemCatalog;
use crate::config::Thresholds;
use crate::database::{MarketDatabase, StoreError};
use crate::upstream::{LatestQuote, WindowStats};

/// Snapshots consulted per item: 24 h of 5-minute windows. The newest
/// twelve (one hour) feed the volume baseline, the full set feeds
/// volatility.
const HISTORY_DEPTH: u32 = 288;
const BASELINE_WINDOW: usize = 12;

/// One row of the all-items view.
#[derive(Debug, Clone, Serialize)]
pub struct ItemTicker {
    pub item_id: i64,
    pub name: String,
    pub buy: i64,
    pub sell: i64,
    pub insta_buy: i64,
    pub insta_sell: i64,
    pub margin_gp: i64,
    pub roi_pct: f64,
    pub volume: i64,
    pub buy_limit: i64,
    pub risk: RiskMetrics,
}

#[derive(Debug, Default)]
pub struct EngineOutput {
    pub dumps: Vec<DumpEvent>,
    pub spikes: Vec<SpikeEvent>,
    pub flips: Vec<FlipCandidate>,
    pub all_items: Vec<ItemTicker>,
}

pub struct EventEngine {
    db: Arc<MarketDatabase>,
    catalog: Arc<ItemCatalog>,
    thresholds: Thresholds,
}

impl EventEngine {
    pub fn new(db: Arc<MarketDatabase>, catalog: Arc<ItemCatalog>, thresholds: Thresholds) -> Self {
        Self {
            db,
            catalog,
            thresholds,
        }
    }

    /// Evaluate one tick. `latest` carries the instant quotes, `window` the
    /// current averaged-window stats (volume source). Snapshots for this
    /// tick must already be durable in the store; the detectors read their
    /// history from there. Equal inputs produce identical output.
    #[instrument(skip_all, fields(items = latest.len()))]
    pub async fn evaluate(
        &self,
        latest: &HashMap<i64, LatestQuote>,
        window: &HashMap<i64, WindowStats>,
        now: i64,
    ) -> Result<EngineOutput, StoreError> {
        let catalog = self.catalog.snapshot();
        let mut out = EngineOutput::default();

        // Deterministic iteration order regardless of map layout.
        let mut ids: Vec<i64> = latest.keys().copied().collect();
        ids.sort_unstable();

        for item_id in ids {
            let quote = &latest[&item_id];
            let stats = window.get(&item_id).copied().unwrap_or_default();

            // Merge instant quotes with window averages, instant side first.
            let low = match quote.low.or(stats.avg_low) {
                Some(low) => low,
                None => continue,
            };
            let high = match quote.high.or(stats.avg_high) {
                Some(high) => high,
                None => continue,
            };
            let volume = stats.volume;

            // Untradeable or unknown items still show up in the all-items
            // view but never in event output.
            let meta = match catalog.get(&item_id) {
                Some(meta) if meta.buy_limit > 0 => meta.clone(),
                _ => {
                    let name = catalog
                        .get(&item_id)
                        .map(|m| m.name.clone())
                        .unwrap_or_else(|| format!("Item {item_id}"));
                    out.all_items
                        .push(Self::ticker(item_id, name, low, high, volume, 0, risk::assess(&[], volume, 0)));
                    continue;
                }
            };

            let history = self.db.recent(item_id, HISTORY_DEPTH).await?;
            let item_risk = risk::assess(&history, volume, meta.buy_limit);

            out.all_items.push(Self::ticker(
                item_id,
                meta.name.clone(),
                low,
                high,
                volume,
                meta.buy_limit,
                item_risk,
            ));

            if let Some(event) = dump::detect(
                &meta,
                &history[..history.len().min(BASELINE_WINDOW)],
                low,
                high,
                volume,
                now,
                self.thresholds.dump_drop_pct,
                item_risk,
            ) {
                out.dumps.push(event);
            }

            if history.len() >= 2 {
                if let Some(event) = spike::detect(
                    &meta,
                    history[1].high,
                    high,
                    low,
                    volume,
                    now,
                    self.thresholds.spike_rise_pct,
                    self.thresholds.min_volume,
                    item_risk,
                ) {
                    out.spikes.push(event);
                }
            }

            if let Some(candidate) = flip::detect(
                &meta,
                low,
                high,
                volume,
                now,
                self.thresholds.margin_min,
                self.thresholds.min_volume,
                item_risk,
            ) {
                out.flips.push(candidate);
            }
        }

        // Stable, fully-specified ordering: score, then margin, then id.
        out.dumps.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.margin_gp.cmp(&a.margin_gp))
                .then(a.item_id.cmp(&b.item_id))
        });
        out.spikes.sort_by(|a, b| {
            b.rise_pct
                .total_cmp(&a.rise_pct)
                .then(a.item_id.cmp(&b.item_id))
        });
        out.flips.sort_by(|a, b| {
            b.margin_gp
                .cmp(&a.margin_gp)
                .then(a.item_id.cmp(&b.item_id))
        });

        debug!(
            dumps = out.dumps.len(),
            spikes = out.spikes.len(),
            flips = out.flips.len(),
            "engine tick evaluated"
        );
        Ok(out)
    }

    fn ticker(
        item_id: i64,
        name: String,
        low: i64,
        high: i64,
        volume: i64,
        buy_limit: i64,
        item_risk: RiskMetrics,
    ) -> ItemTicker {
        ItemTicker {
            item_id,
            name,
            buy: low,
            sell: high,
            insta_buy: high,
            insta_sell: low,
            margin_gp: high - low,
            roi_pct: if low > 0 {
                (high - low) as f64 / low as f64 * 100.0
            } else {
                0.0
            },
            volume,
            buy_limit,
            risk: item_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil::temp_db;
    use crate::database::Snapshot;
    use crate::upstream::ItemMeta;

    fn quote(low: i64, high: i64) -> LatestQuote {
        LatestQuote {
            low: Some(low),
            low_time: None,
            high: Some(high),
            high_time: None,
        }
    }

    fn stats(volume: i64) -> WindowStats {
        WindowStats {
            avg_high: None,
            avg_low: None,
            volume,
        }
    }

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

    async fn engine_with(items: Vec<ItemMeta>) -> (EventEngine, Arc<MarketDatabase>) {
        let db = Arc::new(temp_db().await);
        let root =
            std::env::temp_dir().join(format!("ge-sniper-engine-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        tokio::fs::write(root.join("item_cache.json"), serde_json::to_vec(&items).unwrap())
            .await
            .unwrap();
        let catalog = ItemCatalog::new(&root);
        catalog.load_from_disk().await.unwrap();
        (
            EventEngine::new(db.clone(), Arc::new(catalog), Thresholds::default()),
            db,
        )
    }

    #[tokio::test]
    async fn dump_pipeline_matches_worked_example() {
        let (engine, db) = engine_with(vec![meta(42, 5_000)]).await;
        db.put_snapshots(&[
            Snapshot { item_id: 42, timestamp: 0, low: 3_000, high: 3_100, volume: 500 },
            Snapshot { item_id: 42, timestamp: 300, low: 2_100, high: 2_200, volume: 500 },
        ])
        .await
        .unwrap();

        let latest = HashMap::from([(42, quote(2_100, 2_200))]);
        let window = HashMap::from([(42, stats(500))]);
        let out = engine.evaluate(&latest, &window, 300).await.unwrap();

        assert_eq!(out.dumps.len(), 1);
        let event = &out.dumps[0];
        assert!((event.drop_pct - 30.0).abs() < 0.01);
        assert_eq!(event.tier, "sapphire");
        assert_eq!(out.all_items.len(), 1);
    }

    #[tokio::test]
    async fn single_snapshot_item_emits_no_dump() {
        let (engine, db) = engine_with(vec![meta(42, 5_000)]).await;
        db.put_snapshots(&[Snapshot {
            item_id: 42,
            timestamp: 300,
            low: 2_100,
            high: 2_200,
            volume: 500,
        }])
        .await
        .unwrap();

        let latest = HashMap::from([(42, quote(2_100, 2_200))]);
        let window = HashMap::from([(42, stats(500))]);
        let out = engine.evaluate(&latest, &window, 300).await.unwrap();
        assert!(out.dumps.is_empty());
    }

    #[tokio::test]
    async fn zero_buy_limit_excluded_from_events_but_listed() {
        let (engine, db) = engine_with(vec![meta(617, 0)]).await;
        db.put_snapshots(&[
            Snapshot { item_id: 617, timestamp: 0, low: 3_000, high: 3_100, volume: 500 },
            Snapshot { item_id: 617, timestamp: 300, low: 2_100, high: 2_200, volume: 500 },
        ])
        .await
        .unwrap();

        let latest = HashMap::from([(617, quote(2_100, 2_200))]);
        let window = HashMap::from([(617, stats(500))]);
        let out = engine.evaluate(&latest, &window, 300).await.unwrap();
        assert!(out.dumps.is_empty());
        assert!(out.flips.is_empty());
        assert_eq!(out.all_items.len(), 1);
        assert_eq!(out.all_items[0].buy_limit, 0);
    }

    #[tokio::test]
    async fn evaluate_is_deterministic_for_equal_inputs() {
        let (engine, db) = engine_with(vec![meta(42, 5_000), meta(2, 11_000)]).await;
        db.put_snapshots(&[
            Snapshot { item_id: 42, timestamp: 0, low: 3_000, high: 3_100, volume: 500 },
            Snapshot { item_id: 42, timestamp: 300, low: 2_100, high: 2_200, volume: 500 },
            Snapshot { item_id: 2, timestamp: 0, low: 180, high: 200, volume: 900 },
            Snapshot { item_id: 2, timestamp: 300, low: 150, high: 210, volume: 900 },
        ])
        .await
        .unwrap();

        let latest = HashMap::from([(42, quote(2_100, 2_200)), (2, quote(150, 210))]);
        let window = HashMap::from([(42, stats(500)), (2, stats(900))]);

        let first = engine.evaluate(&latest, &window, 300).await.unwrap();
        let second = engine.evaluate(&latest, &window, 300).await.unwrap();

        let keys = |out: &EngineOutput| {
            out.dumps
                .iter()
                .map(|d| (d.item_id, d.score.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
        assert_eq!(first.all_items.len(), second.all_items.len());
    }

    #[tokio::test]
    async fn flip_emitted_for_wide_margin() {
        let (engine, db) = engine_with(vec![meta(11_802, 8)]).await;
        db.put_snapshots(&[Snapshot {
            item_id: 11_802,
            timestamp: 300,
            low: 10_000_000,
            high: 10_500_000,
            volume: 300,
        }])
        .await
        .unwrap();

        let latest = HashMap::from([(11_802, quote(10_000_000, 10_500_000))]);
        let window = HashMap::from([(11_802, stats(300))]);
        let out = engine.evaluate(&latest, &window, 300).await.unwrap();
        assert_eq!(out.flips.len(), 1);
        assert_eq!(out.flips[0].margin_gp, 500_000);
    }
}
