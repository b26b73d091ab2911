use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::types::{
    ItemMeta, LatestQuote, LatestResponse, MappingEntry, WindowResponse, WindowStats,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Published refresh cadence per endpoint. The client never calls an
/// endpoint faster than this, regardless of how often the scheduler ticks.
fn endpoint_gap(path: &str) -> Duration {
    match path {
        "/latest" => Duration::from_secs(10),
        "/5m" | "/1h" => Duration::from_secs(290),
        "/mapping" => Duration::from_secs(3_600),
        // Historical windows (admin backfill) pace gently but do not wait
        // out the live cadence.
        "historic" => Duration::from_secs(2),
        _ => Duration::from_secs(10),
    }
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream returned malformed payload: {0}")]
    Malformed(String),

    #[error("upstream rate limit hit")]
    RateLimited,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl UpstreamClient {
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_call: Mutex::new(HashMap::new()),
        })
    }

    /// Instant buy/sell quotes for every item. Timestamp is local receipt
    /// time; `/latest` carries none of its own.
    pub async fn fetch_latest(&self) -> Result<(HashMap<i64, LatestQuote>, i64), UpstreamError> {
        let body: LatestResponse = self.get_json("/latest", None).await?;
        let quotes = body
            .data
            .iter()
            .filter_map(|(id, entry)| {
                let id: i64 = id.parse().ok()?;
                Some((id, LatestQuote::from_entry(entry)))
            })
            .collect();
        Ok((quotes, Utc::now().timestamp()))
    }

    pub async fn fetch_5m(&self) -> Result<(HashMap<i64, WindowStats>, i64), UpstreamError> {
        self.fetch_window("/5m", None).await
    }

    /// Historical 5-minute window aligned to `timestamp` (unix seconds).
    /// Used by the admin backfill.
    pub async fn fetch_5m_at(
        &self,
        timestamp: i64,
    ) -> Result<(HashMap<i64, WindowStats>, i64), UpstreamError> {
        self.fetch_window("/5m", Some(timestamp)).await
    }

    pub async fn fetch_1h(&self) -> Result<(HashMap<i64, WindowStats>, i64), UpstreamError> {
        self.fetch_window("/1h", None).await
    }

    pub async fn fetch_mapping(&self) -> Result<Vec<ItemMeta>, UpstreamError> {
        let body: Vec<MappingEntry> = self.get_json("/mapping", None).await?;
        Ok(body.into_iter().map(ItemMeta::from_mapping).collect())
    }

    async fn fetch_window(
        &self,
        path: &str,
        at: Option<i64>,
    ) -> Result<(HashMap<i64, WindowStats>, i64), UpstreamError> {
        let body: WindowResponse = self.get_json(path, at).await?;
        let source_ts = body.timestamp.unwrap_or_else(|| Utc::now().timestamp());
        let stats = body
            .data
            .iter()
            .filter_map(|(id, entry)| {
                let id: i64 = id.parse().ok()?;
                Some((id, WindowStats::from_entry(entry)))
            })
            .collect();
        Ok((stats, source_ts))
    }

    /// Sleep out the remainder of the endpoint's minimum inter-call gap.
    async fn pace(&self, path: &str) {
        let gap = endpoint_gap(path);
        let wait = {
            let mut calls = self.last_call.lock().await;
            let now = Instant::now();
            let wait = calls
                .get(path)
                .and_then(|last| gap.checked_sub(now.duration_since(*last)))
                .unwrap_or(Duration::ZERO);
            calls.insert(path.to_string(), now + wait);
            wait
        };
        if !wait.is_zero() {
            debug!(endpoint = path, wait_ms = wait.as_millis() as u64, "pacing upstream call");
            tokio::time::sleep(wait).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        at: Option<i64>,
    ) -> Result<T, UpstreamError> {
        // Timestamped reads share one pace lane separate from the live
        // endpoints.
        let pace_key = if at.is_some() { "historic" } else { path };
        self.pace(pace_key).await;

        let mut url = format!("{}{}", self.base_url, path);
        if let Some(ts) = at {
            url = format!("{url}?timestamp={ts}");
        }

        let mut delay = BACKOFF_BASE;
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.http.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| UpstreamError::Malformed(e.to_string()));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(UpstreamError::RateLimited);
                    }
                    if status.is_client_error() {
                        // 4xx will not improve on retry.
                        return Err(UpstreamError::Unavailable(format!(
                            "upstream status {status} for {path}"
                        )));
                    }
                    last_error = format!("upstream status {status} for {path}");
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < MAX_ATTEMPTS {
                warn!(
                    endpoint = path,
                    attempt,
                    error = %last_error,
                    "upstream call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
        }

        Err(UpstreamError::Unavailable(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gaps_respect_published_cadence() {
        assert!(endpoint_gap("/5m") >= Duration::from_secs(240));
        assert!(endpoint_gap("/1h") >= Duration::from_secs(240));
        assert!(endpoint_gap("/latest") < Duration::from_secs(60));
        assert!(endpoint_gap("/mapping") >= Duration::from_secs(3_600));
    }

    #[tokio::test]
    async fn pace_is_immediate_on_first_call() {
        let client = UpstreamClient::new("http://localhost:1", "test-agent").unwrap();
        let started = Instant::now();
        client.pace("/latest").await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn pace_enforces_gap_on_second_call() {
        let client = UpstreamClient::new("http://localhost:1", "test-agent").unwrap();
        client.pace("/latest").await;
        let started = Instant::now();
        client.pace("/latest").await;
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
