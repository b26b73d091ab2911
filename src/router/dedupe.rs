/// Delivery records: suppress duplicate emissions within an ingest bucket

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Dump,
    Spike,
    Flip,
}

impl EventKind {
    pub fn role_key(&self) -> &'static str {
        match self {
            EventKind::Dump => "dumps",
            EventKind::Spike => "spikes",
            EventKind::Flip => "flips",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub tenant_id: String,
    pub item_id: i64,
    pub kind: EventKind,
    pub bucket: i64,
}

/// Event timestamps collapse into ingest-period buckets; one emission per
/// `(tenant, item, kind, bucket)`.
pub fn bucket_of(timestamp: i64, ingest_period_seconds: u64) -> i64 {
    timestamp / ingest_period_seconds.max(1) as i64
}

/// Bounded in-memory ledger. Entries live for one bucket and are evicted
/// when the bucket advances, which keeps the key space proportional to one
/// tick's emissions.
#[derive(Default)]
pub struct DeliveryLedger {
    records: DashMap<DeliveryKey, ()>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, key: &DeliveryKey) -> bool {
        self.records.contains_key(key)
    }

    /// Record a delivery; returns false when it was already present.
    pub fn mark(&self, key: DeliveryKey) -> bool {
        self.records.insert(key, ()).is_none()
    }

    /// Drop records from buckets older than `current_bucket`.
    pub fn evict_before(&self, current_bucket: i64) {
        self.records.retain(|key, _| key.bucket >= current_bucket);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
