//! Classification of in-thread messages into commands or ordinary content.

/// Privileged dispositions restricted to admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegedKind {
    WontFix,
    Reject,
    Duplicate,
}

impl PrivilegedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WontFix => "wontfix",
            Self::Reject => "rejected",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Result of classifying one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCommand {
    /// `!done` — finalize the session and file the issue.
    Done,
    /// `!wontfix` / `!reject` / `!duplicate` — close without filing.
    Privileged(PrivilegedKind),
    /// Anything else is description content.
    Content,
}

/// Classifies trimmed message text. Commands are case-insensitive exact
/// matches and only considered when the text begins with `!`.
pub fn classify_message(text: &str) -> MessageCommand {
    let trimmed = text.trim();
    if !trimmed.starts_with('!') {
        return MessageCommand::Content;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "!done" => MessageCommand::Done,
        "!wontfix" => MessageCommand::Privileged(PrivilegedKind::WontFix),
        "!reject" => MessageCommand::Privileged(PrivilegedKind::Reject),
        "!duplicate" => MessageCommand::Privileged(PrivilegedKind::Duplicate),
        _ => MessageCommand::Content,
    }
}
