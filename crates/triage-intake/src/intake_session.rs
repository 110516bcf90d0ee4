//! Session state machine for one intake thread.
//!
//! Transitions are pure with respect to collaborators: they mutate the
//! session and return the side effects the supervisor must perform. The
//! supervisor is the only caller of the chat and tracker clients.

use anyhow::Result;
use triage_contract::{InboundMessage, MessageRef};

use crate::description_buffer::DescriptionBuffer;
use crate::intake_command::{classify_message, MessageCommand, PrivilegedKind};

pub const MAX_TITLE_CHARS: usize = 200;

/// Lifecycle states of an intake conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeState {
    NeedTitle,
    ReadyForDescription,
    MoreDescription,
    PleaseWait,
    WontFix,
    Rejected,
    Duplicate,
    Completed,
}

/// Terminal disposition of a session. Recorded at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Filed(String),
    WontFix,
    Rejected,
    Duplicate,
    ClosedEmpty,
}

/// Side effects a transition asks the supervisor to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    SendMessage(String),
    ReplyTo(MessageRef, String),
    ReactTo(MessageRef, String),
    RenameThread(String),
    /// Stop routing messages into this session.
    CloseStream,
    /// Close the stream, call the tracker once, then feed the result back
    /// through [`IntakeSession::finish_filing`].
    BeginFiling,
    /// Best-effort lock then archive of the thread.
    SealThread,
}

pub const ACK_EMOJI: &str = "\u{1F44D}";

/// One issue-intake conversation bound to a single chat thread.
#[derive(Debug)]
pub struct IntakeSession {
    owner_id: String,
    title: Option<String>,
    state: IntakeState,
    buffer: DescriptionBuffer,
    outcome: Option<IntakeOutcome>,
}

impl IntakeSession {
    /// Creates a session. A supplied title longer than [`MAX_TITLE_CHARS`]
    /// is discarded and the session starts by asking for a title.
    pub fn new(owner_id: &str, title: Option<String>) -> Self {
        let title = title.filter(|value| value.chars().count() <= MAX_TITLE_CHARS);
        let state = if title.is_some() {
            IntakeState::ReadyForDescription
        } else {
            IntakeState::NeedTitle
        };
        Self {
            owner_id: owner_id.to_string(),
            title,
            state,
            buffer: DescriptionBuffer::new(),
            outcome: None,
        }
    }

    pub fn state(&self) -> IntakeState {
        self.state
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn outcome(&self) -> Option<&IntakeOutcome> {
        self.outcome.as_ref()
    }

    pub fn buffer(&self) -> &DescriptionBuffer {
        &self.buffer
    }

    /// True once no further message transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            IntakeState::PleaseWait
                | IntakeState::WontFix
                | IntakeState::Rejected
                | IntakeState::Duplicate
                | IntakeState::Completed
        )
    }

    /// Greeting for the thread right after creation.
    pub fn greeting(&self) -> String {
        match self.state {
            IntakeState::NeedTitle => format!(
                "Hello <@{}>, please type a short title for the issue you are having. \
                 Maximum {} characters.",
                self.owner_id, MAX_TITLE_CHARS
            ),
            _ => format!(
                "Hello <@{}>, please use this thread to enter a description of your issue. \
                 You can add code blocks using the syntax:\n```js\n```\n\
                 Once ready, type !done to create the issue.",
                self.owner_id
            ),
        }
    }

    /// Records the terminal disposition. Returns false when one was already
    /// recorded; the first disposition always wins.
    pub fn record_outcome(&mut self, outcome: IntakeOutcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Applies one accepted message. `actor_is_admin` is only consulted for
    /// privileged commands; the caller resolves it through the permission
    /// collaborator.
    pub fn apply_message(
        &mut self,
        message: &InboundMessage,
        actor_is_admin: bool,
    ) -> Vec<SessionEffect> {
        if self.is_terminal() {
            return Vec::new();
        }
        match self.state {
            IntakeState::NeedTitle => self.apply_title_message(message),
            IntakeState::ReadyForDescription | IntakeState::MoreDescription => {
                self.apply_description_message(message, actor_is_admin)
            }
            _ => Vec::new(),
        }
    }

    fn apply_title_message(&mut self, message: &InboundMessage) -> Vec<SessionEffect> {
        let text = message.text.trim();
        if text.chars().count() > MAX_TITLE_CHARS {
            return vec![SessionEffect::SendMessage(
                "Sorry, that title is too long. Please try again.".to_string(),
            )];
        }
        self.title = Some(text.to_string());
        self.state = IntakeState::ReadyForDescription;
        vec![
            SessionEffect::RenameThread(format!("Issue thread: {text}")),
            SessionEffect::SendMessage(
                "Got it! Now you can use this thread to enter a description of your issue. \
                 You can add code blocks using the syntax:\n```js\n```\n\
                 Once you have entered a description, type !done to create the issue."
                    .to_string(),
            ),
        ]
    }

    fn apply_description_message(
        &mut self,
        message: &InboundMessage,
        actor_is_admin: bool,
    ) -> Vec<SessionEffect> {
        if self.state == IntakeState::MoreDescription {
            match classify_message(&message.text) {
                MessageCommand::Done => {
                    // Finalize guard: leave the accepting states before any
                    // collaborator call can run.
                    self.state = IntakeState::PleaseWait;
                    return vec![
                        SessionEffect::ReplyTo(
                            message.message.clone(),
                            "Great! Please wait while I create that issue for you.".to_string(),
                        ),
                        SessionEffect::BeginFiling,
                    ];
                }
                MessageCommand::Privileged(kind) if actor_is_admin => {
                    return self.apply_privileged(kind, &message.message);
                }
                // Privileged word from a non-admin deliberately falls through
                // and is collected as ordinary content.
                MessageCommand::Privileged(_) | MessageCommand::Content => {}
            }
        }

        self.collect_content(message);
        self.state = IntakeState::MoreDescription;
        vec![SessionEffect::ReactTo(
            message.message.clone(),
            ACK_EMOJI.to_string(),
        )]
    }

    fn collect_content(&mut self, message: &InboundMessage) {
        if !message.text.trim().is_empty() {
            self.buffer.append(&message.author_tag, &message.text);
        }
        for attachment in &message.attachments {
            self.buffer.append_attachment(
                &message.author_tag,
                attachment.filename.as_deref(),
                &attachment.url,
            );
        }
    }

    fn apply_privileged(
        &mut self,
        kind: PrivilegedKind,
        message: &MessageRef,
    ) -> Vec<SessionEffect> {
        let (state, outcome) = match kind {
            PrivilegedKind::WontFix => (IntakeState::WontFix, IntakeOutcome::WontFix),
            PrivilegedKind::Reject => (IntakeState::Rejected, IntakeOutcome::Rejected),
            PrivilegedKind::Duplicate => (IntakeState::Duplicate, IntakeOutcome::Duplicate),
        };
        self.state = state;
        self.record_outcome(outcome);
        vec![
            SessionEffect::ReplyTo(
                message.clone(),
                format!("Got it boss! Closing this thread as {}.", kind.as_str()),
            ),
            SessionEffect::CloseStream,
            SessionEffect::SealThread,
        ]
    }

    /// Applies the idle-close rule after the message stream went quiet or was
    /// closed. Safe to call at most once per session; later timer firings are
    /// no-ops because the state is already terminal.
    pub fn apply_idle_close(&mut self) -> Vec<SessionEffect> {
        match self.state {
            IntakeState::PleaseWait | IntakeState::Completed => Vec::new(),
            IntakeState::WontFix | IntakeState::Rejected | IntakeState::Duplicate => {
                vec![SessionEffect::SealThread]
            }
            IntakeState::MoreDescription => {
                self.state = IntakeState::PleaseWait;
                vec![
                    SessionEffect::SendMessage(
                        "Sorry, but it looks like you didn't finish creating the issue. \
                         I'll go ahead and create it with the description you already provided."
                            .to_string(),
                    ),
                    SessionEffect::BeginFiling,
                ]
            }
            IntakeState::NeedTitle | IntakeState::ReadyForDescription => {
                self.state = IntakeState::Completed;
                self.record_outcome(IntakeOutcome::ClosedEmpty);
                vec![
                    SessionEffect::SendMessage(
                        "Sorry, but it looks like you didn't finish creating the issue. \
                         Since no description was provided, no issue was created. \
                         Please try again later."
                            .to_string(),
                    ),
                    SessionEffect::SealThread,
                ]
            }
        }
    }

    /// Consumes the tracker result for the single filing dispatched from
    /// `PleaseWait`. The success message is only sent when a URL actually
    /// came back; failure is announced as such and the thread still seals.
    pub fn finish_filing(&mut self, result: Result<String>) -> Vec<SessionEffect> {
        if self.state != IntakeState::PleaseWait {
            return Vec::new();
        }
        self.state = IntakeState::Completed;
        match result {
            Ok(url) => {
                self.record_outcome(IntakeOutcome::Filed(url.clone()));
                vec![
                    SessionEffect::SendMessage(format!("All done! Your issue is here: {url}")),
                    SessionEffect::SealThread,
                ]
            }
            Err(_) => vec![
                SessionEffect::SendMessage(
                    "Sorry, something went wrong while creating the issue. \
                     No issue was filed."
                        .to_string(),
                ),
                SessionEffect::SealThread,
            ],
        }
    }

    /// Title and flattened description for the tracker call.
    pub fn filing_payload(&self) -> (String, String) {
        (
            self.title.clone().unwrap_or_default(),
            self.buffer.render(),
        )
    }
}

#[cfg(test)]
mod tests;
