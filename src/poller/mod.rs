/// Scheduler loops: ingest, catalog refresh, and historical backfill

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{error, info, instrument, warn};

use crate::catalog::ItemCatalog;
use crate::database::{MarketDatabase, Snapshot, StoreError};
use crate::engine::EventEngine;
use crate::router::AlertRouter;
use crate::upstream::{LatestQuote, UpstreamClient, UpstreamError, WindowStats};
use crate::views::ViewPublisher;

/// Upstream refresh cadence for the averaged windows.
const WINDOW_REFRESH: Duration = Duration::from_secs(300);
/// Backoff starts once this many ticks failed in a row.
const BACKOFF_AFTER: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Shared pipeline telemetry surfaced by `/api/health`.
#[derive(Debug, Default)]
pub struct PipelineStatus {
    consecutive_errors: AtomicU32,
    last_success: AtomicI64,
    ticks_completed: AtomicU64,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.last_success
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn last_success(&self) -> Option<i64> {
        match self.last_success.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    pub fn upstream_state(&self) -> &'static str {
        if self.consecutive_errors() == 0 {
            "ok"
        } else {
            "degraded"
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum TickError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The ingest loop: fetch, persist, evaluate, publish, fan out. Never
/// exits on upstream failure; it keeps the previous view generation and
/// backs off after repeated errors.
pub struct IngestLoop {
    upstream: Arc<UpstreamClient>,
    db: Arc<MarketDatabase>,
    engine: Arc<EventEngine>,
    views: Arc<ViewPublisher>,
    router: Arc<AlertRouter>,
    status: Arc<PipelineStatus>,
    period: Duration,
    admin_webhook: Option<String>,
    shutdown: broadcast::Receiver<()>,

    window_5m: HashMap<i64, WindowStats>,
    window_5m_ts: i64,
    window_5m_at: Option<Instant>,
    window_1h: HashMap<i64, WindowStats>,
    window_1h_at: Option<Instant>,
}

impl IngestLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upstream: Arc<UpstreamClient>,
        db: Arc<MarketDatabase>,
        engine: Arc<EventEngine>,
        views: Arc<ViewPublisher>,
        router: Arc<AlertRouter>,
        status: Arc<PipelineStatus>,
        period: Duration,
        admin_webhook: Option<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            upstream,
            db,
            engine,
            views,
            router,
            status,
            period,
            admin_webhook,
            shutdown,
            window_5m: HashMap::new(),
            window_5m_ts: 0,
            window_5m_at: None,
            window_1h: HashMap::new(),
            window_1h_at: None,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(period_secs = self.period.as_secs(), "ingest loop starting");
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = self.shutdown.recv() => {
                    info!("ingest loop shutting down");
                    return Ok(());
                }
            }

            match self.tick().await {
                Ok(generation) => {
                    self.status.record_success();
                    info!(generation, "ingest tick complete");
                }
                Err(e) => {
                    let failures = self.status.record_failure();
                    error!(error = %e, failures, "ingest tick failed, keeping previous view");
                    if let TickError::Store(_) = e {
                        self.alert_admin(&format!("store failure during ingest: {e}"))
                            .await;
                    }
                    if failures >= BACKOFF_AFTER {
                        let exp = (failures - BACKOFF_AFTER).min(16);
                        let delay = (BACKOFF_BASE * 2u32.pow(exp)).min(BACKOFF_CAP);
                        warn!(delay_secs = delay.as_secs(), "backing off after repeated failures");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown.recv() => {
                                info!("ingest loop shutting down during backoff");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn tick(&mut self) -> Result<u64, TickError> {
        let (latest, _received_at) = self.upstream.fetch_latest().await?;
        self.refresh_windows().await?;

        let now = Utc::now().timestamp();
        let batch = build_snapshots(&latest, &self.window_5m, self.window_5m_ts);
        self.db.put_snapshots(&batch).await?;
        self.log_tick_prices(&latest).await?;

        let output = self.engine.evaluate(&latest, &self.window_5m, now).await?;
        let generation = self.views.publish(output, now);

        let views = self.views.snapshot();
        self.router.fan_out(views.as_ref()).await;

        Ok(generation)
    }

    /// The averaged windows refresh upstream every five minutes; in
    /// between, ticks reuse the cached maps.
    async fn refresh_windows(&mut self) -> Result<(), TickError> {
        let stale =
            |at: &Option<Instant>| at.map_or(true, |t| t.elapsed() >= WINDOW_REFRESH);

        if stale(&self.window_5m_at) {
            let (data, ts) = self.upstream.fetch_5m().await?;
            self.window_5m = data;
            self.window_5m_ts = ts;
            self.window_5m_at = Some(Instant::now());
        }
        if stale(&self.window_1h_at) {
            let (data, _) = self.upstream.fetch_1h().await?;
            self.window_1h = data;
            self.window_1h_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Append the tick's instant quotes to the `prices` log, with the
    /// 1-hour volume as the liquidity figure.
    async fn log_tick_prices(
        &self,
        latest: &HashMap<i64, LatestQuote>,
    ) -> Result<(), StoreError> {
        let rows: Vec<(i64, i64, i64, i64)> = latest
            .iter()
            .filter_map(|(id, quote)| {
                let low = quote.low?;
                let high = quote.high?;
                let volume = self.window_1h.get(id).map_or(0, |w| w.volume);
                Some((*id, low, high, volume))
            })
            .collect();
        self.db.log_prices(&rows).await
    }

    async fn alert_admin(&self, message: &str) {
        let Some(webhook) = &self.admin_webhook else { return };
        let client = reqwest::Client::new();
        let body = serde_json::json!({ "content": message });
        if let Err(e) = client.post(webhook).json(&body).send().await {
            warn!(error = %e, "failed to notify admin webhook");
        }
    }
}

/// Merge the 5-minute window with the instant quotes into storable
/// snapshots: instant prices win, window averages fill the gaps, rows
/// missing either side are dropped.
pub fn build_snapshots(
    latest: &HashMap<i64, LatestQuote>,
    window_5m: &HashMap<i64, WindowStats>,
    window_ts: i64,
) -> Vec<Snapshot> {
    let mut batch: Vec<Snapshot> = window_5m
        .iter()
        .filter_map(|(item_id, stats)| {
            let quote = latest.get(item_id).copied().unwrap_or_default();
            let low = quote.low.or(stats.avg_low)?;
            let high = quote.high.or(stats.avg_high)?;
            Some(Snapshot {
                item_id: *item_id,
                timestamp: window_ts,
                low,
                high,
                volume: stats.volume,
            })
        })
        .collect();
    batch.sort_unstable_by_key(|s| s.item_id);
    batch
}

/// Item catalog refresh loop: disk cache at startup, then periodic live
/// refresh.
pub struct CatalogRefreshLoop {
    catalog: Arc<ItemCatalog>,
    upstream: Arc<UpstreamClient>,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl CatalogRefreshLoop {
    pub fn new(
        catalog: Arc<ItemCatalog>,
        upstream: Arc<UpstreamClient>,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            catalog,
            upstream,
            period,
            shutdown,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        if let Err(e) = self.catalog.load_from_disk().await {
            warn!(error = %e, "item cache unreadable, will fetch live");
        }
        if self.catalog.is_empty() {
            if let Err(e) = self.catalog.refresh(&self.upstream).await {
                error!(error = %e, "initial catalog refresh failed");
            }
        }

        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.catalog.refresh(&self.upstream).await {
                        error!(error = %e, "catalog refresh failed, keeping previous mapping");
                    }
                }
                _ = self.shutdown.recv() => {
                    info!("catalog refresh loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Admin-triggered backfill: walk the last `hours` of five-minute windows
/// and store whatever the upstream still serves. Returns stored row count.
#[instrument(skip(upstream, db))]
pub async fn backfill_recent(
    upstream: Arc<UpstreamClient>,
    db: Arc<MarketDatabase>,
    hours: i64,
) -> anyhow::Result<u64> {
    let hours = hours.clamp(1, 24);
    let now = Utc::now().timestamp();
    let start = (now - hours * 3_600) / 300 * 300;
    let mut stored = 0u64;

    let mut ts = start;
    while ts < now {
        match upstream.fetch_5m_at(ts).await {
            Ok((window, window_ts)) => {
                let batch = build_snapshots(&HashMap::new(), &window, window_ts);
                db.put_snapshots(&batch).await?;
                stored += batch.len() as u64;
            }
            Err(e) => warn!(timestamp = ts, error = %e, "backfill window fetch failed"),
        }
        ts += 300;
    }

    info!(hours, rows = stored, "historical backfill complete");
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_consecutive_errors() {
        let status = PipelineStatus::new();
        assert_eq!(status.upstream_state(), "ok");
        assert_eq!(status.record_failure(), 1);
        assert_eq!(status.record_failure(), 2);
        assert_eq!(status.record_failure(), 3);
        assert_eq!(status.consecutive_errors(), 3);
        assert_eq!(status.upstream_state(), "degraded");
        status.record_success();
        assert_eq!(status.consecutive_errors(), 0);
        assert_eq!(status.upstream_state(), "ok");
        assert_eq!(status.ticks_completed(), 1);
    }

    #[test]
    fn snapshots_merge_instant_prices_over_averages() {
        let latest = HashMap::from([(
            42,
            LatestQuote {
                low: Some(2_100),
                low_time: None,
                high: None,
                high_time: None,
            },
        )]);
        let window = HashMap::from([(
            42,
            WindowStats {
                avg_high: Some(2_250),
                avg_low: Some(2_150),
                volume: 500,
            },
        )]);
        let batch = build_snapshots(&latest, &window, 300);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].low, 2_100);
        assert_eq!(batch[0].high, 2_250);
        assert_eq!(batch[0].timestamp, 300);
    }

    #[test]
    fn snapshots_drop_items_missing_both_sides() {
        let window = HashMap::from([(
            7,
            WindowStats {
                avg_high: Some(100),
                avg_low: None,
                volume: 10,
            },
        )]);
        let batch = build_snapshots(&HashMap::new(), &window, 300);
        assert!(batch.is_empty());
    }

    #[test]
    fn snapshot_batches_are_ordered_by_item() {
        let window = HashMap::from([
            (9, WindowStats { avg_high: Some(2), avg_low: Some(1), volume: 1 }),
            (3, WindowStats { avg_high: Some(2), avg_low: Some(1), volume: 1 }),
        ]);
        let batch = build_snapshots(&HashMap::new(), &window, 300);
        assert_eq!(batch.iter().map(|s| s.item_id).collect::<Vec<_>>(), vec![3, 9]);
    }
}
