//! Transition coverage for the intake state machine.

use anyhow::anyhow;
use triage_contract::{InboundMessage, MessageAttachment, MessageRef};

use super::{IntakeOutcome, IntakeSession, IntakeState, SessionEffect, ACK_EMOJI};

fn message(author_tag: &str, text: &str) -> InboundMessage {
    InboundMessage {
        author_id: format!("id-{author_tag}"),
        author_tag: author_tag.to_string(),
        author_role_ids: Vec::new(),
        author_has_admin_permission: false,
        text: text.to_string(),
        attachments: Vec::new(),
        message: MessageRef {
            channel_id: "thread-1".to_string(),
            message_id: "m-1".to_string(),
        },
    }
}

#[test]
fn unit_new_session_with_title_is_ready_for_description() {
    let session = IntakeSession::new("u1", Some("Crash on save".to_string()));
    assert_eq!(session.state(), IntakeState::ReadyForDescription);
    assert_eq!(session.title(), Some("Crash on save"));
}

#[test]
fn unit_new_session_discards_overlong_title() {
    let session = IntakeSession::new("u1", Some("x".repeat(201)));
    assert_eq!(session.state(), IntakeState::NeedTitle);
    assert_eq!(session.title(), None);
}

#[test]
fn unit_title_of_exactly_200_chars_is_accepted() {
    let mut session = IntakeSession::new("u1", None);
    let effects = session.apply_message(&message("alice#1", &"t".repeat(200)), false);
    assert_eq!(session.state(), IntakeState::ReadyForDescription);
    assert!(matches!(effects[0], SessionEffect::RenameThread(_)));
}

#[test]
fn unit_title_of_201_chars_is_rejected_and_state_stays() {
    let mut session = IntakeSession::new("u1", None);
    let effects = session.apply_message(&message("alice#1", &"t".repeat(201)), false);
    assert_eq!(session.state(), IntakeState::NeedTitle);
    assert_eq!(session.title(), None);
    assert_eq!(effects.len(), 1);
    assert!(matches!(effects[0], SessionEffect::SendMessage(ref text)
        if text.contains("too long")));
}

#[test]
fn unit_first_description_message_acknowledges_and_advances() {
    let mut session = IntakeSession::new("u1", Some("Crash on save".to_string()));
    let effects = session.apply_message(&message("alice#1", "Steps: click save"), false);
    assert_eq!(session.state(), IntakeState::MoreDescription);
    assert_eq!(session.buffer().len(), 1);
    assert_eq!(
        effects,
        vec![SessionEffect::ReactTo(
            MessageRef {
                channel_id: "thread-1".to_string(),
                message_id: "m-1".to_string(),
            },
            ACK_EMOJI.to_string(),
        )]
    );
}

#[test]
fn unit_commands_are_content_while_ready_for_description() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "!done"), false);
    assert_eq!(session.state(), IntakeState::MoreDescription);
    assert_eq!(session.buffer().len(), 1);
}

#[test]
fn unit_attachments_become_separate_entries() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    let mut with_attachment = message("alice#1", "see this");
    with_attachment.attachments.push(MessageAttachment {
        filename: Some("log.txt".to_string()),
        url: "https://cdn.example/log.txt".to_string(),
    });
    session.apply_message(&with_attachment, false);
    assert_eq!(session.buffer().len(), 2);
    assert_eq!(
        session.buffer().render(),
        "alice#1 says:\nsee this\n[log.txt](https://cdn.example/log.txt)"
    );
}

#[test]
fn functional_done_guards_state_before_filing() {
    let mut session = IntakeSession::new("u1", Some("Crash on save".to_string()));
    session.apply_message(&message("alice#1", "Steps: click save"), false);
    let effects = session.apply_message(&message("alice#1", "!done"), false);

    assert_eq!(session.state(), IntakeState::PleaseWait);
    assert!(matches!(effects[0], SessionEffect::ReplyTo(_, _)));
    assert!(matches!(effects[1], SessionEffect::BeginFiling));

    let (title, body) = session.filing_payload();
    assert_eq!(title, "Crash on save");
    assert_eq!(body, "alice#1 says:\nSteps: click save");
}

#[test]
fn functional_finish_filing_success_records_outcome_once() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "details"), false);
    session.apply_message(&message("alice#1", "!done"), false);

    let effects = session.finish_filing(Ok("https://github.com/o/r/issues/7".to_string()));
    assert_eq!(session.state(), IntakeState::Completed);
    assert_eq!(
        session.outcome(),
        Some(&IntakeOutcome::Filed(
            "https://github.com/o/r/issues/7".to_string()
        ))
    );
    assert!(matches!(effects[0], SessionEffect::SendMessage(ref text)
        if text.contains("https://github.com/o/r/issues/7")));
    assert!(matches!(effects[1], SessionEffect::SealThread));

    // A second result for the same session is ignored.
    assert!(session.finish_filing(Ok("https://other".to_string())).is_empty());
    assert_eq!(
        session.outcome(),
        Some(&IntakeOutcome::Filed(
            "https://github.com/o/r/issues/7".to_string()
        ))
    );
}

#[test]
fn functional_finish_filing_failure_seals_without_success_message() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "details"), false);
    session.apply_message(&message("alice#1", "!done"), false);

    let effects = session.finish_filing(Err(anyhow!("tracker down")));
    assert_eq!(session.state(), IntakeState::Completed);
    assert_eq!(session.outcome(), None);
    assert!(matches!(effects[0], SessionEffect::SendMessage(ref text)
        if text.contains("went wrong")));
    assert!(matches!(effects[1], SessionEffect::SealThread));
}

#[test]
fn functional_admin_privileged_command_records_disposition() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "details"), false);
    let effects = session.apply_message(&message("boss#0", "!reject"), true);

    assert_eq!(session.state(), IntakeState::Rejected);
    assert_eq!(session.outcome(), Some(&IntakeOutcome::Rejected));
    assert!(matches!(effects[0], SessionEffect::ReplyTo(_, ref text)
        if text.contains("rejected")));
    assert!(matches!(effects[1], SessionEffect::CloseStream));
    assert!(matches!(effects[2], SessionEffect::SealThread));

    // Terminal: further messages are ignored.
    assert!(session.apply_message(&message("alice#1", "more"), false).is_empty());
}

#[test]
fn functional_non_admin_privileged_command_is_collected_as_content() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "details"), false);
    let effects = session.apply_message(&message("mallory#3", "!wontfix"), false);

    assert_eq!(session.state(), IntakeState::MoreDescription);
    assert_eq!(session.outcome(), None);
    assert_eq!(session.buffer().len(), 2);
    assert!(session.buffer().render().contains("!wontfix"));
    assert!(matches!(effects[0], SessionEffect::ReactTo(_, _)));
}

#[test]
fn functional_idle_close_with_content_behaves_like_done() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "details"), false);

    let effects = session.apply_idle_close();
    assert_eq!(session.state(), IntakeState::PleaseWait);
    assert!(matches!(effects[0], SessionEffect::SendMessage(_)));
    assert!(matches!(effects[1], SessionEffect::BeginFiling));

    // The timer cannot dispatch a second filing.
    assert!(session.apply_idle_close().is_empty());
}

#[test]
fn functional_idle_close_without_content_closes_empty() {
    let mut session = IntakeSession::new("u1", None);
    let effects = session.apply_idle_close();
    assert_eq!(session.state(), IntakeState::Completed);
    assert_eq!(session.outcome(), Some(&IntakeOutcome::ClosedEmpty));
    assert!(matches!(effects[0], SessionEffect::SendMessage(ref text)
        if text.contains("no issue was created")));
    assert!(matches!(effects[1], SessionEffect::SealThread));
}

#[test]
fn functional_idle_close_after_disposition_only_seals() {
    let mut session = IntakeSession::new("u1", Some("Crash".to_string()));
    session.apply_message(&message("alice#1", "details"), false);
    session.apply_message(&message("boss#0", "!duplicate"), true);

    let effects = session.apply_idle_close();
    assert_eq!(effects, vec![SessionEffect::SealThread]);
    assert_eq!(session.outcome(), Some(&IntakeOutcome::Duplicate));
}

#[test]
fn unit_record_outcome_is_first_writer_wins() {
    let mut session = IntakeSession::new("u1", None);
    assert!(session.record_outcome(IntakeOutcome::ClosedEmpty));
    assert!(!session.record_outcome(IntakeOutcome::WontFix));
    assert_eq!(session.outcome(), Some(&IntakeOutcome::ClosedEmpty));
}
