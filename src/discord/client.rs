//! Discord REST client.
//!
//! Speaks the v10 bot API directly over `reqwest`: create, edit, delete and
//! list channel messages, and rename channels. Status codes are mapped to [`PlatformError`]s, and 429
//! responses carry the parsed `retry_after` hint.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::error::PlatformError;
use super::{ChannelMessage, MAX_PAGE_SIZE, MessagingPlatform};
use crate::format::NotificationChunk;
use crate::types::{ChannelId, MessageHandle, MessageId};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    token: String,
    api_base: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PlatformError::from_reqwest(&e))?;
        Ok(DiscordClient {
            http,
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Points the client at another API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn messages_url(&self, channel: ChannelId) -> String {
        format!("{}/channels/{channel}/messages", self.api_base)
    }

    fn message_url(&self, handle: MessageHandle) -> String {
        format!("{}/{}", self.messages_url(handle.channel_id), handle.message_id)
    }

    /// Turns a non-success response into a categorized error.
    async fn error_from(response: Response) -> PlatformError {
        let status = response.status().as_u16();
        let header_hint = retry_after_from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();
        let retry_after = header_hint.or_else(|| retry_after_from_body(&body));

        if status == 429 {
            debug!(?retry_after, "Discord rate limited");
        } else {
            warn!(status, body = %body, "Discord request failed");
        }
        PlatformError::from_status(status, retry_after, error_message(&body, status))
    }
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl MessagingPlatform for DiscordClient {
    async fn send_message(
        &self,
        channel: ChannelId,
        chunk: &NotificationChunk,
    ) -> Result<MessageHandle, PlatformError> {
        let response = self
            .http
            .post(self.messages_url(channel))
            .header("Authorization", self.auth())
            .json(&message_body(chunk))
            .send()
            .await
            .map_err(|e| PlatformError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let message: RawMessage = response
            .json()
            .await
            .map_err(|e| PlatformError::transient(format!("unreadable message response: {e}")))?;
        Ok(MessageHandle::new(channel, MessageId(message.id()?)))
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        chunk: &NotificationChunk,
    ) -> Result<(), PlatformError> {
        let response = self
            .http
            .patch(self.message_url(handle))
            .header("Authorization", self.auth())
            .json(&message_body(chunk))
            .send()
            .await
            .map_err(|e| PlatformError::from_reqwest(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), PlatformError> {
        let response = self
            .http
            .delete(self.message_url(handle))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| PlatformError::from_reqwest(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn list_messages(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>, PlatformError> {
        let mut query = vec![("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        let response = self
            .http
            .get(self.messages_url(channel))
            .header("Authorization", self.auth())
            .query(&query)
            .send()
            .await
            .map_err(|e| PlatformError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let messages: Vec<RawMessage> = response
            .json()
            .await
            .map_err(|e| PlatformError::transient(format!("unreadable message list: {e}")))?;
        messages
            .into_iter()
            .map(|m| {
                Ok(ChannelMessage {
                    id: MessageId(m.id()?),
                    timestamp: m.timestamp,
                })
            })
            .collect()
    }

    async fn rename_channel(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError> {
        let response = self
            .http
            .patch(format!("{}/channels/{channel}", self.api_base))
            .header("Authorization", self.auth())
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|e| PlatformError::from_reqwest(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }
}

/// A Discord message object, reduced to the fields the relay reads.
/// Snowflake ids arrive as strings.
#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    timestamp: DateTime<Utc>,
}

impl RawMessage {
    fn id(&self) -> Result<u64, PlatformError> {
        self.id
            .parse()
            .map_err(|_| PlatformError::permanent(format!("invalid message id {:?}", self.id)))
    }
}

/// Builds the create-message body: one embed per chunk.
///
/// The first link becomes the embed URL; any others are listed at the end of
/// the description.
pub fn message_body(chunk: &NotificationChunk) -> Value {
    let mut embed = json!({
        "title": chunk.title,
        "color": chunk.color.rgb(),
        "fields": chunk.fields.iter().map(|f| json!({
            "name": f.name,
            "value": f.value,
            "inline": f.inline,
        })).collect::<Vec<_>>(),
    });

    let mut links = chunk.links.iter();
    if let Some(url) = links.next() {
        embed["url"] = json!(url);
    }
    let extra: Vec<&str> = links.map(String::as_str).collect();
    let description = match (&chunk.description, extra.is_empty()) {
        (Some(d), true) => Some(d.clone()),
        (Some(d), false) => Some(format!("{d}\n{}", extra.join("\n"))),
        (None, false) => Some(extra.join("\n")),
        (None, true) => None,
    };
    if let Some(description) = description {
        embed["description"] = json!(description);
    }

    json!({ "embeds": [embed] })
}

/// Reads `Retry-After`, then `X-RateLimit-Reset-After` (both in seconds).
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset-after"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok()?.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Reads the `retry_after` field of a 429 JSON body.
pub fn retry_after_from_body(body: &str) -> Option<Duration> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("retry_after")?
        .as_f64()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Discord error bodies look like `{"message": "...", "code": 10008}`.
fn error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {status}"))
}
