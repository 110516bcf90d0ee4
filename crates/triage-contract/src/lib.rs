//! Collaborator contracts shared across Triage crates.
//!
//! The intake core talks to the chat platform, the issue tracker, and the
//! guild permission registry only through the traits defined here, so the
//! state machine and supervisor stay testable with in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque handle to a chat thread owned by one intake session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadHandle(pub String);

impl ThreadHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Addresses a single message for reactions and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
}

/// Attachment metadata carried alongside an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttachment {
    pub filename: Option<String>,
    pub url: String,
}

/// One message delivered from the chat platform into an intake session.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub author_id: String,
    pub author_tag: String,
    pub author_role_ids: Vec<String>,
    /// Guild-level administrator permission resolved by the chat layer.
    pub author_has_admin_permission: bool,
    pub text: String,
    pub attachments: Vec<MessageAttachment>,
    pub message: MessageRef,
}

/// Chat platform operations consumed by the intake core.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn open_thread(&self, channel_id: &str, name: &str, reason: &str)
        -> Result<ThreadHandle>;
    async fn rename_thread(&self, thread: &ThreadHandle, name: &str) -> Result<()>;
    async fn add_thread_member(&self, thread: &ThreadHandle, user_id: &str) -> Result<()>;
    async fn send_message(&self, thread: &ThreadHandle, text: &str) -> Result<()>;
    async fn react_to(&self, message: &MessageRef, emoji: &str) -> Result<()>;
    async fn reply_to(&self, message: &MessageRef, text: &str) -> Result<()>;
    /// Locking may be unavailable to the bot; callers treat failure as benign.
    async fn lock_thread(&self, thread: &ThreadHandle) -> Result<()>;
    async fn archive_thread(&self, thread: &ThreadHandle) -> Result<()>;
}

/// Issue tracker operations consumed by the finalize path.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Files an issue and returns its canonical URL.
    async fn file_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<String>;
}

/// Read-only guild permission queries. Writes are owned by the admin command
/// surface, never by sessions.
pub trait PermissionLookup: Send + Sync {
    fn is_channel_allowed(&self, guild_id: &str, channel_id: &str) -> bool;
    fn is_admin(&self, guild_id: &str, user_id: &str, role_ids: &[String]) -> bool;
    fn default_labels(&self, guild_id: &str) -> Vec<String>;
}
