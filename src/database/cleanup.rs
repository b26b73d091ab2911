/// Retention enforcement loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, instrument};

use super::MarketDatabase;

/// Deletes price rows past the retention window on a fixed timer. Runs
/// until shutdown; a failed pass is retried at the next tick.
pub struct PruneService {
    db: Arc<MarketDatabase>,
    period: Duration,
    retention_seconds: i64,
    shutdown: broadcast::Receiver<()>,
}

impl PruneService {
    pub fn new(
        db: Arc<MarketDatabase>,
        period: Duration,
        retention_seconds: i64,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            db,
            period,
            retention_seconds,
            shutdown,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            period_secs = self.period.as_secs(),
            retention_secs = self.retention_seconds,
            "prune service starting"
        );
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup isn't spent
        // deleting before anything was written.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.db.prune(self.retention_seconds).await {
                        Ok(removed) if removed > 0 => {
                            info!(rows = removed, "pruned expired price rows");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "prune pass failed"),
                    }
                }
                _ = self.shutdown.recv() => {
                    info!("prune service shutting down");
                    return Ok(());
                }
            }
        }
    }
}
