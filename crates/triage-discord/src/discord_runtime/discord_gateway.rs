//! Gateway payload parsing and normalization.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use triage_contract::MessageAttachment;

pub(super) const OP_DISPATCH: u8 = 0;
pub(super) const OP_HEARTBEAT: u8 = 1;
pub(super) const OP_IDENTIFY: u8 = 2;
pub(super) const OP_RECONNECT: u8 = 7;
pub(super) const OP_INVALID_SESSION: u8 = 9;
pub(super) const OP_HELLO: u8 = 10;
pub(super) const OP_HEARTBEAT_ACK: u8 = 11;

// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

/// One decoded gateway frame.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Normalized MESSAGE_CREATE dispatch.
#[derive(Debug, Clone)]
pub(super) struct DiscordMessageEvent {
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_tag: String,
    pub author_is_bot: bool,
    pub author_role_ids: Vec<String>,
    pub text: String,
    pub attachments: Vec<MessageAttachment>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: AuthorPayload,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    member: Option<MemberPayload>,
}

#[derive(Debug, Deserialize)]
struct AuthorPayload {
    id: String,
    username: String,
    #[serde(default)]
    discriminator: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    #[serde(default)]
    filename: Option<String>,
    url: String,
}

/// Decodes a websocket message into a gateway frame. Control frames yield
/// `None`.
pub(super) fn parse_gateway_frame(message: WsMessage) -> Result<Option<GatewayFrame>> {
    let text = match message {
        WsMessage::Text(text) => text.to_string(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).context("invalid utf-8 gateway payload")?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None);
        }
    };
    let frame = serde_json::from_str::<GatewayFrame>(&text)
        .context("failed to parse discord gateway frame")?;
    Ok(Some(frame))
}

pub(super) fn identify_payload(token: &str) -> String {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "triage",
                "device": "triage",
            },
        },
    })
    .to_string()
}

pub(super) fn heartbeat_payload(last_sequence: Option<u64>) -> String {
    json!({ "op": OP_HEARTBEAT, "d": last_sequence }).to_string()
}

/// Normalizes a MESSAGE_CREATE dispatch body. Returns `None` for payloads
/// without a usable author or id.
pub(super) fn normalize_message_create(data: &Value) -> Option<DiscordMessageEvent> {
    let payload = serde_json::from_value::<MessagePayload>(data.clone()).ok()?;
    if payload.id.is_empty() || payload.author.id.is_empty() {
        return None;
    }
    let author_tag = match payload
        .author
        .discriminator
        .as_deref()
        .filter(|value| !value.is_empty() && *value != "0")
    {
        Some(discriminator) => format!("{}#{discriminator}", payload.author.username),
        None => payload.author.username.clone(),
    };
    Some(DiscordMessageEvent {
        message_id: payload.id,
        channel_id: payload.channel_id,
        guild_id: payload.guild_id,
        author_id: payload.author.id,
        author_tag,
        author_is_bot: payload.author.bot,
        author_role_ids: payload.member.map(|member| member.roles).unwrap_or_default(),
        text: payload.content,
        attachments: payload
            .attachments
            .into_iter()
            .map(|attachment| MessageAttachment {
                filename: attachment.filename,
                url: attachment.url,
            })
            .collect(),
    })
}
