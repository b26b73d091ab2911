/// Outbound chat delivery seam
///
/// The router only ever talks to `ChatEgress`, so the whole pipeline runs
/// and tests without a live chat platform behind it.

pub mod discord;
pub mod embed;

pub use discord::DiscordEgress;
pub use embed::{dump_embed, flip_embed, spike_embed, EmbedField, EmbedPayload};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EgressError {
    /// Worth retrying: network trouble, 5xx, platform rate limits.
    #[error("transient chat egress failure: {0}")]
    Transient(String),

    /// Not worth retrying: bad channel, missing permissions, bad auth.
    #[error("permanent chat egress failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone, Default)]
pub struct Ack {
    pub message_id: Option<String>,
}

#[async_trait]
pub trait ChatEgress: Send + Sync {
    async fn post(&self, channel_id: &str, payload: &EmbedPayload) -> Result<Ack, EgressError>;
}

/// No-op egress used when no chat credentials are configured; emissions are
/// logged and acknowledged.
pub struct DryRunEgress;

#[async_trait]
impl ChatEgress for DryRunEgress {
    async fn post(&self, channel_id: &str, payload: &EmbedPayload) -> Result<Ack, EgressError> {
        tracing::info!(channel = channel_id, title = %payload.title, "dry-run alert emission");
        Ok(Ack::default())
    }
}
