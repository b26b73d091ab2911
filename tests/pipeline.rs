//! End-to-end pipeline scenarios: store → engine → views → router → egress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ge_sniper::catalog::ItemCatalog;
use ge_sniper::config::Thresholds;
use ge_sniper::database::{MarketDatabase, Snapshot};
use ge_sniper::egress::{Ack, ChatEgress, EgressError, EmbedPayload};
use ge_sniper::engine::risk::RiskMetrics;
use ge_sniper::engine::{DumpEvent, EventEngine, RiskLevel};
use ge_sniper::router::AlertRouter;
use ge_sniper::tenants::{TenantStore, TierRoleSetting};
use ge_sniper::upstream::{ItemMeta, LatestQuote, WindowStats};
use ge_sniper::views::{MarketViews, ViewPublisher};

const TENANT_A: &str = "111111111111111111";
const TENANT_B: &str = "222222222222222222";

/// Records every accepted post instead of talking to a chat platform.
#[derive(Default)]
struct RecordingEgress {
    posts: Mutex<Vec<(String, EmbedPayload)>>,
}

impl RecordingEgress {
    fn posts(&self) -> Vec<(String, EmbedPayload)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatEgress for RecordingEgress {
    async fn post(&self, channel_id: &str, payload: &EmbedPayload) -> Result<Ack, EgressError> {
        self.posts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), payload.clone()));
        Ok(Ack::default())
    }
}

struct Harness {
    db: Arc<MarketDatabase>,
    engine: EventEngine,
    views: Arc<ViewPublisher>,
    tenants: Arc<TenantStore>,
    router: AlertRouter,
    egress: Arc<RecordingEgress>,
}

async fn harness(items: Vec<ItemMeta>) -> Harness {
    let dir = std::env::temp_dir().join(format!("ge-sniper-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let db_path = dir.join("test.db");
    let db = Arc::new(
        MarketDatabase::connect(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap(),
    );

    tokio::fs::write(dir.join("item_cache.json"), serde_json::to_vec(&items).unwrap())
        .await
        .unwrap();
    let catalog = Arc::new(ItemCatalog::new(&dir));
    catalog.load_from_disk().await.unwrap();

    let tenants = Arc::new(
        TenantStore::new(dir.join("server_configs"), db.clone())
            .await
            .unwrap(),
    );
    let egress = Arc::new(RecordingEgress::default());
    let router = AlertRouter::new(tenants.clone(), egress.clone(), 60);

    Harness {
        db: db.clone(),
        engine: EventEngine::new(db, catalog, Thresholds::default()),
        views: Arc::new(ViewPublisher::new()),
        tenants,
        router,
        egress,
    }
}

fn meta(id: i64, name: &str, limit: i64) -> ItemMeta {
    ItemMeta {
        id,
        name: name.to_string(),
        members: true,
        buy_limit: limit,
        examine: None,
        icon: None,
        highalch: None,
        lowalch: None,
    }
}

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

/// A sapphire-grade dump forms for item 42 and reaches only the tenant
/// whose channel and tier settings admit it.
#[tokio::test]
async fn dump_fans_out_to_configured_tenants_only() {
    let h = harness(vec![meta(42, "Dragon bones", 5_000)]).await;

    h.db.put_snapshots(&[
        Snapshot { item_id: 42, timestamp: 0, low: 3_000, high: 3_100, volume: 500 },
        Snapshot { item_id: 42, timestamp: 300, low: 2_100, high: 2_200, volume: 500 },
    ])
    .await
    .unwrap();

    // Tenant A: dump channel configured, sapphire role enabled.
    let mut a = (*h.tenants.get(TENANT_A, true).await.unwrap()).clone();
    a.min_tier_name = Some("silver".into());
    a.channels.dumps = Some("alerts-a".into());
    a.tier_roles.insert(
        "sapphire".into(),
        TierRoleSetting {
            role_id: Some("R1".into()),
            enabled: true,
        },
    );
    a.alert_thresholds.max_alerts_per_interval = 5;
    h.tenants.put(TENANT_A, a).await.unwrap();

    // Tenant B: strict min tier but no channel anywhere; nothing can land.
    let mut b = (*h.tenants.get(TENANT_B, true).await.unwrap()).clone();
    b.min_tier_name = Some("platinum".into());
    h.tenants.put(TENANT_B, b).await.unwrap();

    let latest = HashMap::from([(42, quote(2_100, 2_200))]);
    let window = HashMap::from([(42, stats(500))]);
    let output = h.engine.evaluate(&latest, &window, 300).await.unwrap();

    assert_eq!(output.dumps.len(), 1);
    let dump = &output.dumps[0];
    assert!((dump.drop_pct - 30.0).abs() < 0.01);
    assert!((dump.oversupply_pct - 10.0).abs() < 0.01);
    assert_eq!(dump.tier, "sapphire");

    let generation = h.views.publish(output, 300);
    assert_eq!(generation, 1);

    let report = h.router.fan_out(h.views.snapshot().as_ref()).await;
    assert_eq!(report.emitted, 1);

    let posts = h.egress.posts();
    assert_eq!(posts.len(), 1);
    let (channel, payload) = &posts[0];
    assert_eq!(channel, "alerts-a");
    assert!(payload.mentions.contains(&"R1".to_string()));
    assert!(payload.title.contains("Dragon bones"));
}

/// Feeding the identical upstream response through the pipeline twice
/// produces one emission and identical view content.
#[tokio::test]
async fn reingesting_same_response_is_idempotent() {
    let h = harness(vec![meta(42, "Dragon bones", 5_000)]).await;

    let batch = [
        Snapshot { item_id: 42, timestamp: 0, low: 3_000, high: 3_100, volume: 500 },
        Snapshot { item_id: 42, timestamp: 300, low: 2_100, high: 2_200, volume: 500 },
    ];
    let latest = HashMap::from([(42, quote(2_100, 2_200))]);
    let window = HashMap::from([(42, stats(500))]);

    let mut config = (*h.tenants.get(TENANT_A, true).await.unwrap()).clone();
    config.channels.dumps = Some("alerts".into());
    config.alert_thresholds.max_alerts_per_interval = 5;
    h.tenants.put(TENANT_A, config).await.unwrap();

    h.db.put_snapshots(&batch).await.unwrap();
    let first = h.engine.evaluate(&latest, &window, 300).await.unwrap();
    let first_scores: Vec<u64> = first.dumps.iter().map(|d| d.score.to_bits()).collect();
    h.views.publish(first, 300);
    h.router.fan_out(h.views.snapshot().as_ref()).await;

    // Same response again, same tick window.
    h.db.put_snapshots(&batch).await.unwrap();
    let second = h.engine.evaluate(&latest, &window, 300).await.unwrap();
    let second_scores: Vec<u64> = second.dumps.iter().map(|d| d.score.to_bits()).collect();
    h.views.publish(second, 300);
    h.router.fan_out(h.views.snapshot().as_ref()).await;

    assert_eq!(first_scores, second_scores);
    assert_eq!(h.egress.posts().len(), 1, "duplicate emission was not suppressed");
}

fn synthetic_dump(item_id: i64, score: f64) -> DumpEvent {
    let tier = ge_sniper::engine::tier::tier_for_score(score);
    DumpEvent {
        item_id,
        name: format!("Item {item_id}"),
        timestamp: 300,
        prev_low: 1_000,
        low: 800,
        high: 900,
        drop_pct: 20.0,
        vol_spike_pct: 100.0,
        oversupply_pct: 10.0,
        buy_speed_pct: 10.0,
        score,
        tier: tier.name,
        emoji: tier.emoji,
        group: tier.group,
        volume: 1_000,
        buy_limit: 5_000,
        margin_gp: 100,
        max_profit_gp: 500_000,
        flags: vec![],
        quality: None,
        risk: RiskMetrics {
            risk_score: 30.0,
            risk_level: RiskLevel::Medium,
            liquidity_score: 10.0,
            volatility_pct: 5.0,
        },
    }
}

/// Five qualifying dumps against a cap of two: only the two best scores
/// are emitted.
#[tokio::test]
async fn rate_cap_admits_highest_scores_first() {
    let h = harness(vec![]).await;

    let mut config = (*h.tenants.get(TENANT_A, true).await.unwrap()).clone();
    config.channels.dumps = Some("alerts".into());
    config.alert_thresholds.max_alerts_per_interval = 2;
    h.tenants.put(TENANT_A, config).await.unwrap();

    let views = MarketViews {
        generation: 1,
        built_at: 300,
        top_flips: vec![],
        dumps: vec![
            synthetic_dump(1, 70.0),
            synthetic_dump(2, 90.0),
            synthetic_dump(3, 60.0),
            synthetic_dump(4, 85.0),
            synthetic_dump(5, 80.0),
        ],
        spikes: vec![],
        all_items: vec![],
    };

    let report = h.router.fan_out(&views).await;
    assert_eq!(report.emitted, 2);
    assert_eq!(report.rate_capped, 3);

    let posts = h.egress.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts[0].1.title.contains("Item 2"), "expected score 90 first");
    assert!(posts[1].1.title.contains("Item 4"), "expected score 85 second");
}

/// A banned tenant receives nothing regardless of configuration.
#[tokio::test]
async fn banned_tenant_receives_nothing() {
    let h = harness(vec![]).await;

    let mut config = (*h.tenants.get(TENANT_A, true).await.unwrap()).clone();
    config.channels.dumps = Some("alerts".into());
    config.alert_thresholds.max_alerts_per_interval = 10;
    h.tenants.put(TENANT_A, config).await.unwrap();
    h.tenants.ban(TENANT_A).await.unwrap();

    let views = MarketViews {
        generation: 1,
        built_at: 300,
        top_flips: vec![],
        dumps: vec![synthetic_dump(1, 95.0)],
        spikes: vec![],
        all_items: vec![],
    };

    let report = h.router.fan_out(&views).await;
    assert_eq!(report.emitted, 0);
    assert!(h.egress.posts().is_empty());
}

/// Failed ticks never clobber the published generation.
#[tokio::test]
async fn views_survive_failed_ticks() {
    use ge_sniper::poller::PipelineStatus;

    let h = harness(vec![meta(42, "Dragon bones", 5_000)]).await;
    h.db.put_snapshots(&[
        Snapshot { item_id: 42, timestamp: 0, low: 3_000, high: 3_100, volume: 500 },
        Snapshot { item_id: 42, timestamp: 300, low: 2_100, high: 2_200, volume: 500 },
    ])
    .await
    .unwrap();

    let latest = HashMap::from([(42, quote(2_100, 2_200))]);
    let window = HashMap::from([(42, stats(500))]);
    let output = h.engine.evaluate(&latest, &window, 300).await.unwrap();
    h.views.publish(output, 300);

    // Three consecutive upstream failures: the loop records them and keeps
    // the old generation published.
    let status = PipelineStatus::new();
    for _ in 0..3 {
        status.record_failure();
    }
    assert_eq!(status.consecutive_errors(), 3);
    assert_eq!(status.upstream_state(), "degraded");

    let views = h.views.snapshot();
    assert_eq!(views.generation, 1);
    assert_eq!(views.dumps.len(), 1);
}

/// Watchlist uniqueness holds across users and tenants.
#[tokio::test]
async fn watchlists_enforce_uniqueness() {
    let h = harness(vec![]).await;
    assert!(h.db.watchlist_add(TENANT_A, Some("u1"), 4151, "Abyssal whip").await.unwrap());
    assert!(!h.db.watchlist_add(TENANT_A, Some("u1"), 4151, "Abyssal whip").await.unwrap());
    assert!(h.db.watchlist_add(TENANT_B, Some("u1"), 4151, "Abyssal whip").await.unwrap());
    assert_eq!(h.db.watchlist(TENANT_A, None).await.unwrap().len(), 1);
}
