/// Discord REST implementation of the chat egress

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};

use super::{Ack, ChatEgress, EgressError, EmbedPayload};

const API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct DiscordEgress {
    http: reqwest::Client,
    token: String,
}

impl DiscordEgress {
    pub fn new(token: &str, user_agent: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token: token.to_string(),
        })
    }

    fn body_for(payload: &EmbedPayload) -> serde_json::Value {
        let mentions: String = payload
            .mentions
            .iter()
            .map(|role| format!("<@&{role}>"))
            .collect::<Vec<_>>()
            .join(" ");

        let fields: Vec<serde_json::Value> = payload
            .fields
            .iter()
            .map(|f| json!({"name": f.name, "value": f.value, "inline": f.inline}))
            .collect();

        let mut embed = json!({
            "title": payload.title,
            "description": payload.description,
            "color": payload.color,
            "fields": fields,
        });
        if let Some(thumbnail) = &payload.thumbnail_url {
            embed["thumbnail"] = json!({"url": thumbnail});
        }
        if let Some(url) = &payload.url {
            embed["url"] = json!(url);
        }

        json!({
            "content": mentions,
            "embeds": [embed],
            "allowed_mentions": {"parse": ["roles"]},
        })
    }
}

#[async_trait]
impl ChatEgress for DiscordEgress {
    async fn post(&self, channel_id: &str, payload: &EmbedPayload) -> Result<Ack, EgressError> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages");
        let body = Self::body_for(payload);

        let mut delay = BACKOFF_BASE;
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .http
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let message_id = response
                            .json::<serde_json::Value>()
                            .await
                            .ok()
                            .and_then(|v| v.get("id").and_then(|id| id.as_str().map(String::from)));
                        debug!(channel = channel_id, "alert posted");
                        return Ok(Ack { message_id });
                    }
                    match status {
                        StatusCode::UNAUTHORIZED
                        | StatusCode::FORBIDDEN
                        | StatusCode::NOT_FOUND
                        | StatusCode::BAD_REQUEST => {
                            return Err(EgressError::Permanent(format!(
                                "chat platform rejected post with {status}"
                            )));
                        }
                        _ => last_error = format!("chat platform status {status}"),
                    }
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < MAX_ATTEMPTS {
                warn!(
                    channel = channel_id,
                    attempt,
                    error = %last_error,
                    "chat post failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(EgressError::Transient(last_error))
    }
}
