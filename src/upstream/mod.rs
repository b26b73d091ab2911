/// Upstream price feed client: /latest, /5m, /1h, /mapping

pub mod client;
pub mod types;

pub use client::{UpstreamClient, UpstreamError};
pub use types::{ItemMeta, LatestQuote, WindowStats};
