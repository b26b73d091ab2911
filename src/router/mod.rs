/// Multi-tenant alert fan-out
///
/// Every event of the current view generation is offered to every known
/// tenant, in descending score order so the best events win each tenant's
/// rate budget. Emission requires passing the ban check, tier filters,
/// score/margin thresholds, channel classification, the delivery ledger,
/// and the per-tenant rate cap.

pub mod dedupe;
pub mod mentions;

pub use dedupe::{bucket_of, DeliveryKey, DeliveryLedger, EventKind};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::egress::{embed, ChatEgress, EgressError, EmbedPayload};
use crate::engine::tier::tier_order;
use crate::engine::{DumpEvent, FlipCandidate, SpikeEvent};
use crate::tenants::{TenantConfig, TenantStore};
use crate::views::MarketViews;

/// One event offered to tenants, with the per-kind accessors the filters
/// need.
#[derive(Debug, Clone)]
pub enum RoutedEvent {
    Dump(DumpEvent),
    Spike(SpikeEvent),
    Flip(FlipCandidate),
}

impl RoutedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RoutedEvent::Dump(_) => EventKind::Dump,
            RoutedEvent::Spike(_) => EventKind::Spike,
            RoutedEvent::Flip(_) => EventKind::Flip,
        }
    }

    pub fn item_id(&self) -> i64 {
        match self {
            RoutedEvent::Dump(e) => e.item_id,
            RoutedEvent::Spike(e) => e.item_id,
            RoutedEvent::Flip(e) => e.item_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            RoutedEvent::Dump(e) => e.timestamp,
            RoutedEvent::Spike(e) => e.timestamp,
            RoutedEvent::Flip(e) => e.timestamp,
        }
    }

    /// Relevance used for ordering and the per-tenant score floor: dump
    /// quality score, spike rise, flip ROI.
    pub fn score(&self) -> f64 {
        match self {
            RoutedEvent::Dump(e) => e.score,
            RoutedEvent::Spike(e) => e.rise_pct,
            RoutedEvent::Flip(e) => e.roi_pct,
        }
    }

    pub fn margin_gp(&self) -> i64 {
        match self {
            RoutedEvent::Dump(e) => e.margin_gp,
            RoutedEvent::Spike(e) => (e.high - e.low).max(0),
            RoutedEvent::Flip(e) => e.margin_gp,
        }
    }

    /// Quality tier; only dumps carry one.
    pub fn tier(&self) -> Option<&'static str> {
        match self {
            RoutedEvent::Dump(e) => Some(e.tier),
            _ => None,
        }
    }

    fn embed(&self, mention_roles: Vec<String>) -> EmbedPayload {
        match self {
            RoutedEvent::Dump(e) => embed::dump_embed(e, mention_roles),
            RoutedEvent::Spike(e) => embed::spike_embed(e, mention_roles),
            RoutedEvent::Flip(e) => embed::flip_embed(e, mention_roles),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub tenants: usize,
    pub emitted: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub rate_capped: usize,
    pub broken_channels: usize,
    pub failures: usize,
}

pub struct AlertRouter {
    tenants: Arc<TenantStore>,
    egress: Arc<dyn ChatEgress>,
    ledger: DeliveryLedger,
    ingest_period_seconds: u64,
}

impl AlertRouter {
    pub fn new(
        tenants: Arc<TenantStore>,
        egress: Arc<dyn ChatEgress>,
        ingest_period_seconds: u64,
    ) -> Self {
        Self {
            tenants,
            egress,
            ledger: DeliveryLedger::new(),
            ingest_period_seconds,
        }
    }

    /// Fan one view generation out to every known tenant.
    #[instrument(skip_all, fields(generation = views.generation))]
    pub async fn fan_out(&self, views: &MarketViews) -> FanOutReport {
        let mut report = FanOutReport::default();

        // Event timestamps come from the upstream window and can lag the
        // tick clock by a full window; keep records alive long enough to
        // cover that lag plus one interval of slack before evicting.
        let window_buckets = (300 / self.ingest_period_seconds.max(1)).max(1) as i64;
        let current_bucket = bucket_of(views.built_at, self.ingest_period_seconds);
        self.ledger
            .evict_before(current_bucket.saturating_sub(window_buckets + 1));

        let events = Self::ordered_events(views);
        if events.is_empty() {
            return report;
        }

        let tenant_ids = match self.tenants.list().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "failed to list tenants for fan-out");
                return report;
            }
        };
        report.tenants = tenant_ids.len();

        for tenant_id in tenant_ids {
            let config = match self.tenants.get(&tenant_id, false).await {
                Ok(config) => config,
                Err(e) => {
                    warn!(tenant = %tenant_id, error = %e, "skipping tenant: config unreadable");
                    continue;
                }
            };
            self.fan_out_tenant(&config, &events, &mut report).await;
        }

        info!(
            emitted = report.emitted,
            duplicates = report.duplicates,
            rate_capped = report.rate_capped,
            "alert fan-out complete"
        );
        report
    }

    async fn fan_out_tenant(
        &self,
        config: &TenantConfig,
        events: &[RoutedEvent],
        report: &mut FanOutReport,
    ) {
        if config.banned || !config.enabled {
            return;
        }
        let thresholds = &config.alert_thresholds;
        let mut sent_this_tick: u32 = 0;
        let mut broken: HashSet<String> = HashSet::new();

        for event in events {
            if sent_this_tick >= thresholds.max_alerts_per_interval {
                report.rate_capped += 1;
                continue;
            }
            if !Self::passes_filters(config, event) {
                report.filtered += 1;
                continue;
            }
            let Some(channel) = mentions::classify_channel(config, event) else {
                report.filtered += 1;
                continue;
            };
            if broken.contains(&channel) {
                report.broken_channels += 1;
                continue;
            }

            let key = DeliveryKey {
                tenant_id: config.tenant_id.clone(),
                item_id: event.item_id(),
                kind: event.kind(),
                bucket: bucket_of(event.timestamp(), self.ingest_period_seconds),
            };
            if self.ledger.seen(&key) {
                report.duplicates += 1;
                continue;
            }

            let mention_roles = mentions::mentions_for(config, event);
            match self.egress.post(&channel, &event.embed(mention_roles)).await {
                Ok(_) => {
                    self.ledger.mark(key);
                    sent_this_tick += 1;
                    report.emitted += 1;
                }
                Err(EgressError::Permanent(reason)) => {
                    warn!(
                        tenant = %config.tenant_id,
                        channel = %channel,
                        %reason,
                        "channel marked broken for this tick"
                    );
                    broken.insert(channel);
                    report.broken_channels += 1;
                }
                Err(EgressError::Transient(reason)) => {
                    debug!(tenant = %config.tenant_id, %reason, "emission failed after retries");
                    report.failures += 1;
                }
            }
        }
    }

    /// Steps 2–4 of the per-event filter chain; banned tenants never reach
    /// this point and channel/dedupe/rate checks follow it.
    fn passes_filters(config: &TenantConfig, event: &RoutedEvent) -> bool {
        let thresholds = &config.alert_thresholds;

        if let RoutedEvent::Dump(dump) = event {
            if let Some(min_tier) = &config.min_tier_name {
                match (tier_order(dump.tier), tier_order(min_tier)) {
                    (Some(event_order), Some(min_order)) if event_order < min_order => {
                        return false
                    }
                    _ => {}
                }
            }
        }

        if let Some(tier) = event.tier() {
            if !thresholds.allows_tier(tier) {
                return false;
            }
        }

        if event.score() < thresholds.min_score {
            return false;
        }
        if event.margin_gp() < thresholds.min_margin_gp {
            return false;
        }

        if let RoutedEvent::Spike(spike) = event {
            if let Some(min_rise) = thresholds.spike_rise_pct {
                if spike.rise_pct < min_rise {
                    return false;
                }
            }
        }

        true
    }

    /// All events of a generation, highest relevance first. Ordering is
    /// total: ties fall back to margin, then item id.
    fn ordered_events(views: &MarketViews) -> Vec<RoutedEvent> {
        let mut events: Vec<RoutedEvent> = Vec::with_capacity(
            views.dumps.len() + views.spikes.len() + views.top_flips.len(),
        );
        events.extend(views.dumps.iter().cloned().map(RoutedEvent::Dump));
        events.extend(views.spikes.iter().cloned().map(RoutedEvent::Spike));
        events.extend(views.top_flips.iter().cloned().map(RoutedEvent::Flip));
        events.sort_by(|a, b| {
            b.score()
                .total_cmp(&a.score())
                .then(b.margin_gp().cmp(&a.margin_gp()))
                .then(a.item_id().cmp(&b.item_id()))
        });
        events
    }

    #[cfg(test)]
    pub(crate) fn test_filters(config: &TenantConfig, event: &RoutedEvent) -> bool {
        Self::passes_filters(config, event)
    }
}
