//! Discord REST client used by the bridge runtime and the intake sessions.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use triage_contract::{ChatClient, MessageRef, ThreadHandle};

use super::discord_transport_helpers::{
    is_retryable_discord_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

// Channel types 10/11/12 are announcement/public/private threads.
const THREAD_CHANNEL_TYPES: &[u8] = &[10, 11, 12];
const PUBLIC_THREAD_CHANNEL_TYPE: u8 = 11;
const THREAD_AUTO_ARCHIVE_MINUTES: u32 = 1_440;
const ADMINISTRATOR_PERMISSION: u64 = 1 << 3;

#[derive(Debug, Clone)]
pub struct DiscordApiClientConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordUserResponse {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordGatewayResponse {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordChannelResponse {
    id: String,
    #[serde(rename = "type")]
    channel_type: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordGuildResponse {
    owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordRoleResponse {
    id: String,
    // Permission bits arrive as a decimal string.
    #[serde(default)]
    permissions: String,
}

/// Bot-token REST client with bounded retries and rate-limit handling.
#[derive(Clone)]
pub struct DiscordApiClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DiscordApiClient {
    pub fn new(config: DiscordApiClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("triage-issue-intake"),
        );
        let auth_header = format!("Bot {}", config.token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid discord authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create discord api client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    pub async fn resolve_bot_user_id(&self) -> Result<String> {
        let user: DiscordUserResponse = self
            .request_json("resolve bot user", || {
                self.http.get(format!("{}/users/@me", self.api_base))
            })
            .await?;
        Ok(user.id)
    }

    pub async fn fetch_gateway_url(&self) -> Result<String> {
        let gateway: DiscordGatewayResponse = self
            .request_json("fetch gateway url", || {
                self.http.get(format!("{}/gateway/bot", self.api_base))
            })
            .await?;
        Ok(gateway.url)
    }

    /// True when the channel is a thread (announcement, public, or private).
    pub async fn is_thread_channel(&self, channel_id: &str) -> Result<bool> {
        let channel: DiscordChannelResponse = self
            .request_json("fetch channel", || {
                self.http
                    .get(format!("{}/channels/{channel_id}", self.api_base))
            })
            .await?;
        Ok(THREAD_CHANNEL_TYPES.contains(&channel.channel_type))
    }

    pub async fn fetch_guild_owner(&self, guild_id: &str) -> Result<String> {
        let guild: DiscordGuildResponse = self
            .request_json("fetch guild", || {
                self.http.get(format!("{}/guilds/{guild_id}", self.api_base))
            })
            .await?;
        Ok(guild.owner_id)
    }

    /// Ids of the guild roles that carry the administrator permission bit.
    /// The `@everyone` role shares the guild id and is included when it
    /// carries the bit.
    pub async fn fetch_guild_admin_role_ids(&self, guild_id: &str) -> Result<Vec<String>> {
        let roles: Vec<DiscordRoleResponse> = self
            .request_json("fetch guild roles", || {
                self.http
                    .get(format!("{}/guilds/{guild_id}/roles", self.api_base))
            })
            .await?;
        Ok(roles
            .into_iter()
            .filter(|role| {
                role.permissions
                    .parse::<u64>()
                    .is_ok_and(|bits| bits & ADMINISTRATOR_PERMISSION != 0)
            })
            .map(|role| role.id)
            .collect())
    }

    pub async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({ "content": content });
        if let Some(message_id) = reply_to {
            payload["message_reference"] = json!({ "message_id": message_id });
        }
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        self.request_json::<Value, _>("create message", || {
            self.http.post(&url).json(&payload)
        })
        .await?;
        Ok(())
    }

    async fn patch_channel(&self, channel_id: &str, operation: &str, body: Value) -> Result<()> {
        let url = format!("{}/channels/{channel_id}", self.api_base);
        self.request_json::<Value, _>(operation, || self.http.patch(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn request_json<T, F>(&self, operation: &str, mut request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder().send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .text()
                            .await
                            .with_context(|| format!("failed to read discord {operation}"))?;
                        // 204 responses and reaction PUTs have empty bodies.
                        let parsed_source = if body.trim().is_empty() { "null" } else { &body };
                        let parsed = serde_json::from_str::<T>(parsed_source)
                            .with_context(|| format!("failed to decode discord {operation}"))?;
                        return Ok(parsed);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_discord_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "discord api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("discord api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl ChatClient for DiscordApiClient {
    async fn open_thread(
        &self,
        channel_id: &str,
        name: &str,
        reason: &str,
    ) -> Result<ThreadHandle> {
        let url = format!("{}/channels/{channel_id}/threads", self.api_base);
        let payload = json!({
            "name": name,
            "type": PUBLIC_THREAD_CHANNEL_TYPE,
            "auto_archive_duration": THREAD_AUTO_ARCHIVE_MINUTES,
        });
        let reason_header = reqwest::header::HeaderValue::from_str(reason)
            .unwrap_or_else(|_| reqwest::header::HeaderValue::from_static("issue intake"));
        let channel: DiscordChannelResponse = self
            .request_json("open thread", || {
                self.http
                    .post(&url)
                    .header("x-audit-log-reason", reason_header.clone())
                    .json(&payload)
            })
            .await?;
        Ok(ThreadHandle(channel.id))
    }

    async fn rename_thread(&self, thread: &ThreadHandle, name: &str) -> Result<()> {
        self.patch_channel(thread.as_str(), "rename thread", json!({ "name": name }))
            .await
    }

    async fn add_thread_member(&self, thread: &ThreadHandle, user_id: &str) -> Result<()> {
        let url = format!(
            "{}/channels/{}/thread-members/{user_id}",
            self.api_base,
            thread.as_str()
        );
        self.request_json::<Value, _>("add thread member", || self.http.put(&url))
            .await?;
        Ok(())
    }

    async fn send_message(&self, thread: &ThreadHandle, text: &str) -> Result<()> {
        self.create_message(thread.as_str(), text, None).await
    }

    async fn react_to(&self, message: &MessageRef, emoji: &str) -> Result<()> {
        let url = format!(
            "{}/channels/{}/messages/{}/reactions/{}/@me",
            self.api_base,
            message.channel_id,
            message.message_id,
            percent_encode(emoji)
        );
        self.request_json::<Value, _>("create reaction", || self.http.put(&url))
            .await?;
        Ok(())
    }

    async fn reply_to(&self, message: &MessageRef, text: &str) -> Result<()> {
        self.create_message(&message.channel_id, text, Some(&message.message_id))
            .await
    }

    async fn lock_thread(&self, thread: &ThreadHandle) -> Result<()> {
        self.patch_channel(thread.as_str(), "lock thread", json!({ "locked": true }))
            .await
    }

    async fn archive_thread(&self, thread: &ThreadHandle) -> Result<()> {
        self.patch_channel(
            thread.as_str(),
            "archive thread",
            json!({ "archived": true }),
        )
        .await
    }
}

/// Percent-encodes a reaction emoji for use in a URL path segment.
pub(super) fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            other => {
                encoded.push_str(&format!("%{other:02X}"));
            }
        }
    }
    encoded
}
