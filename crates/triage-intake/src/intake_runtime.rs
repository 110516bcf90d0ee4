//! Session supervisor: one task per intake thread, serialized events, and an
//! at-most-once finalize path.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use triage_contract::{ChatClient, InboundMessage, IssueTracker, PermissionLookup, ThreadHandle};

use crate::intake_command::{classify_message, MessageCommand};
use crate::intake_session::{IntakeSession, SessionEffect};

const SESSION_QUEUE_DEPTH: usize = 64;

type SessionMap = HashMap<String, mpsc::Sender<InboundMessage>>;

/// Collaborators and tuning shared by all sessions.
#[derive(Clone)]
pub struct IntakeRuntimeConfig {
    pub chat: Arc<dyn ChatClient>,
    pub tracker: Arc<dyn IssueTracker>,
    pub permissions: Arc<dyn PermissionLookup>,
    /// Messages authored by this identity never reach a session.
    pub bot_user_id: String,
    /// Sliding inactivity window after which a session force-closes.
    pub idle_window: Duration,
}

/// One request to open an intake conversation.
#[derive(Debug, Clone)]
pub struct IntakeRequest {
    pub guild_id: String,
    pub channel_id: String,
    /// True when the originating channel is itself a thread.
    pub channel_is_thread: bool,
    pub requester_id: String,
    pub requester_tag: String,
    pub title: Option<String>,
}

/// Precondition failures reported back to the requester. No session exists
/// when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeRejection {
    #[error("Sorry, I cannot create a new issue from inside a thread. Please try again in a regular channel.")]
    InsideThread,
    #[error("Sorry, this channel is not set up for issue intake.")]
    ChannelNotAllowed,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Rejected(#[from] IntakeRejection),
    #[error(transparent)]
    Platform(#[from] anyhow::Error),
}

/// Owns the map from thread to live session and the per-session tasks.
pub struct IntakeSupervisor {
    config: IntakeRuntimeConfig,
    sessions: Mutex<SessionMap>,
}

impl IntakeSupervisor {
    pub fn new(config: IntakeRuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn active_session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_active(&self, thread: &ThreadHandle) -> bool {
        self.lock_sessions().contains_key(thread.as_str())
    }

    /// Validates the request, opens the intake thread, and spawns the session
    /// task. Synchronous from the caller's perspective: once this returns the
    /// conversation proceeds on its own task.
    pub async fn begin_intake(
        self: &Arc<Self>,
        request: IntakeRequest,
    ) -> Result<ThreadHandle, IntakeError> {
        if request.channel_is_thread {
            return Err(IntakeRejection::InsideThread.into());
        }
        if !self
            .config
            .permissions
            .is_channel_allowed(&request.guild_id, &request.channel_id)
        {
            return Err(IntakeRejection::ChannelNotAllowed.into());
        }

        let session = IntakeSession::new(&request.requester_id, request.title.clone());
        let thread_name = match session.title() {
            Some(title) => format!("Issue thread: {title}"),
            None => "Issue thread".to_string(),
        };
        let reason = format!("User {} wanted to create an issue", request.requester_tag);
        let thread = self
            .config
            .chat
            .open_thread(&request.channel_id, &thread_name, &reason)
            .await
            .map_err(IntakeError::Platform)?;

        // Membership and the greeting are conversational niceties; their
        // failure should not abort a thread that already exists.
        if let Err(error) = self
            .config
            .chat
            .add_thread_member(&thread, &request.requester_id)
            .await
        {
            eprintln!(
                "intake failed to add requester to thread {}: {error}",
                thread.as_str()
            );
        }
        if let Err(error) = self.config.chat.send_message(&thread, &session.greeting()).await {
            eprintln!(
                "intake failed to send greeting in thread {}: {error}",
                thread.as_str()
            );
        }

        let (sender, receiver) = mpsc::channel(SESSION_QUEUE_DEPTH);
        self.lock_sessions()
            .insert(thread.as_str().to_string(), sender);

        let supervisor = Arc::clone(self);
        let labels = self.config.permissions.default_labels(&request.guild_id);
        let guild_id = request.guild_id.clone();
        let session_thread = thread.clone();
        tokio::spawn(async move {
            supervisor
                .run_session(session, session_thread, guild_id, labels, receiver)
                .await;
        });

        Ok(thread)
    }

    /// Routes an inbound thread message to its session. Returns false when
    /// the thread has no live session (or the message came from the bot
    /// itself, which is filtered here and never resets the idle timer).
    pub async fn deliver_message(&self, thread: &ThreadHandle, message: InboundMessage) -> bool {
        if message.author_id == self.config.bot_user_id {
            return false;
        }
        let sender = match self.lock_sessions().get(thread.as_str()) {
            Some(sender) => sender.clone(),
            None => return false,
        };
        sender.send(message).await.is_ok()
    }

    fn unregister(&self, thread: &ThreadHandle) {
        self.lock_sessions().remove(thread.as_str());
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, SessionMap> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Single consumer for one session: inbound messages and the idle timer
    /// are serialized here, so no two events can mutate the session at once.
    async fn run_session(
        self: Arc<Self>,
        mut session: IntakeSession,
        thread: ThreadHandle,
        guild_id: String,
        labels: Vec<String>,
        mut receiver: mpsc::Receiver<InboundMessage>,
    ) {
        loop {
            match timeout(self.config.idle_window, receiver.recv()).await {
                Ok(Some(message)) => {
                    let actor_is_admin = self.resolve_admin(&guild_id, &message);
                    let effects = session.apply_message(&message, actor_is_admin);
                    self.run_effects(&mut session, &thread, &labels, effects)
                        .await;
                    if session.is_terminal() {
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    let effects = session.apply_idle_close();
                    self.run_effects(&mut session, &thread, &labels, effects)
                        .await;
                    break;
                }
            }
        }
        self.unregister(&thread);
    }

    fn resolve_admin(&self, guild_id: &str, message: &InboundMessage) -> bool {
        if !matches!(classify_message(&message.text), MessageCommand::Privileged(_)) {
            return false;
        }
        message.author_has_admin_permission
            || self.config.permissions.is_admin(
                guild_id,
                &message.author_id,
                &message.author_role_ids,
            )
    }

    /// Executes transition effects in order. `BeginFiling` closes the stream
    /// first, then performs the one tracker call and queues the follow-up
    /// effects the session derives from the result.
    async fn run_effects(
        &self,
        session: &mut IntakeSession,
        thread: &ThreadHandle,
        labels: &[String],
        effects: Vec<SessionEffect>,
    ) {
        let chat = &self.config.chat;
        let mut pending: VecDeque<SessionEffect> = effects.into();
        while let Some(effect) = pending.pop_front() {
            match effect {
                SessionEffect::SendMessage(text) => {
                    if let Err(error) = chat.send_message(thread, &text).await {
                        eprintln!(
                            "intake failed to send message in thread {}: {error}",
                            thread.as_str()
                        );
                    }
                }
                SessionEffect::ReplyTo(message, text) => {
                    if let Err(error) = chat.reply_to(&message, &text).await {
                        eprintln!(
                            "intake failed to reply in thread {}: {error}",
                            thread.as_str()
                        );
                    }
                }
                SessionEffect::ReactTo(message, emoji) => {
                    if let Err(error) = chat.react_to(&message, &emoji).await {
                        eprintln!(
                            "intake failed to react in thread {}: {error}",
                            thread.as_str()
                        );
                    }
                }
                SessionEffect::RenameThread(name) => {
                    if let Err(error) = chat.rename_thread(thread, &name).await {
                        eprintln!(
                            "intake failed to rename thread {}: {error}",
                            thread.as_str()
                        );
                    }
                }
                SessionEffect::CloseStream => {
                    self.unregister(thread);
                }
                SessionEffect::BeginFiling => {
                    self.unregister(thread);
                    let (title, body) = session.filing_payload();
                    let result = self
                        .config
                        .tracker
                        .file_issue(&title, &body, labels)
                        .await;
                    if let Err(error) = &result {
                        eprintln!(
                            "intake filing failed for thread {}: {error}",
                            thread.as_str()
                        );
                    }
                    for follow_up in session.finish_filing(result) {
                        pending.push_back(follow_up);
                    }
                }
                SessionEffect::SealThread => {
                    // Lock may be unavailable to the bot; archive is the part
                    // that must be attempted.
                    if let Err(error) = chat.lock_thread(thread).await {
                        eprintln!(
                            "intake could not lock thread {} (ignored): {error}",
                            thread.as_str()
                        );
                    }
                    if let Err(error) = chat.archive_thread(thread).await {
                        eprintln!(
                            "intake failed to archive thread {}: {error}",
                            thread.as_str()
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
