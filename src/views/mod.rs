/// Materialized read views published by pointer swap
///
/// The ingest loop is the single writer: it prepares the next generation
/// off to the side and swaps one `Arc`. Readers clone the handle and see a
/// complete, frozen generation for as long as they hold it.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::engine::{DumpEvent, EngineOutput, FlipCandidate, ItemTicker, SpikeEvent};

const TOP_FLIPS: usize = 50;
const TOP_DUMPS: usize = 20;
const TOP_SPIKES: usize = 20;

#[derive(Debug, Serialize)]
pub struct MarketViews {
    pub generation: u64,
    pub built_at: i64,
    pub top_flips: Vec<FlipCandidate>,
    pub dumps: Vec<DumpEvent>,
    pub spikes: Vec<SpikeEvent>,
    pub all_items: Vec<ItemTicker>,
}

impl MarketViews {
    fn empty() -> Self {
        Self {
            generation: 0,
            built_at: 0,
            top_flips: Vec::new(),
            dumps: Vec::new(),
            spikes: Vec::new(),
            all_items: Vec::new(),
        }
    }
}

pub struct ViewPublisher {
    current: RwLock<Arc<MarketViews>>,
}

impl Default for ViewPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewPublisher {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(MarketViews::empty())),
        }
    }

    /// Publish a new generation from engine output. The generation counter
    /// increases by exactly one per successful tick.
    pub fn publish(&self, mut output: EngineOutput, built_at: i64) -> u64 {
        output.flips.truncate(TOP_FLIPS);
        output.dumps.truncate(TOP_DUMPS);
        output.spikes.truncate(TOP_SPIKES);

        let mut guard = self.current.write().expect("view lock poisoned");
        let generation = guard.generation + 1;
        *guard = Arc::new(MarketViews {
            generation,
            built_at,
            top_flips: output.flips,
            dumps: output.dumps,
            spikes: output.spikes,
            all_items: output.all_items,
        });
        generation
    }

    /// Frozen handle to the current generation.
    pub fn snapshot(&self) -> Arc<MarketViews> {
        self.current.read().expect("view lock poisoned").clone()
    }
}
