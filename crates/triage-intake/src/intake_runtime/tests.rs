//! Supervisor tests with in-memory collaborators: finalize-once, idle
//! closure, routing, and precondition rejections.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::time::sleep;
use triage_contract::{
    ChatClient, InboundMessage, IssueTracker, MessageRef, PermissionLookup, ThreadHandle,
};

use super::{IntakeError, IntakeRejection, IntakeRequest, IntakeRuntimeConfig, IntakeSupervisor};

#[derive(Default)]
struct RecordingChat {
    calls: Mutex<Vec<String>>,
}

impl RecordingChat {
    fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, entry: String) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn open_thread(
        &self,
        channel_id: &str,
        name: &str,
        _reason: &str,
    ) -> Result<ThreadHandle> {
        self.record(format!("open:{channel_id}:{name}"));
        Ok(ThreadHandle(format!("thread-{channel_id}")))
    }

    async fn rename_thread(&self, thread: &ThreadHandle, name: &str) -> Result<()> {
        self.record(format!("rename:{}:{name}", thread.as_str()));
        Ok(())
    }

    async fn add_thread_member(&self, thread: &ThreadHandle, user_id: &str) -> Result<()> {
        self.record(format!("member:{}:{user_id}", thread.as_str()));
        Ok(())
    }

    async fn send_message(&self, thread: &ThreadHandle, text: &str) -> Result<()> {
        self.record(format!("send:{}:{text}", thread.as_str()));
        Ok(())
    }

    async fn react_to(&self, message: &MessageRef, emoji: &str) -> Result<()> {
        self.record(format!("react:{}:{emoji}", message.message_id));
        Ok(())
    }

    async fn reply_to(&self, message: &MessageRef, text: &str) -> Result<()> {
        self.record(format!("reply:{}:{text}", message.message_id));
        Ok(())
    }

    async fn lock_thread(&self, thread: &ThreadHandle) -> Result<()> {
        self.record(format!("lock:{}", thread.as_str()));
        bail!("missing manage permission")
    }

    async fn archive_thread(&self, thread: &ThreadHandle) -> Result<()> {
        self.record(format!("archive:{}", thread.as_str()));
        Ok(())
    }
}

struct CountingTracker {
    calls: AtomicUsize,
    payloads: Mutex<Vec<(String, String, Vec<String>)>>,
    fail: bool,
}

impl CountingTracker {
    fn new(fail: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
            fail,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn payloads(&self) -> Vec<(String, String, Vec<String>)> {
        self.payloads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl IssueTracker for CountingTracker {
    async fn file_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((title.to_string(), body.to_string(), labels.to_vec()));
        if self.fail {
            bail!("tracker unavailable");
        }
        Ok("https://github.com/acme/app/issues/42".to_string())
    }
}

struct StaticPermissions {
    allowed_channel: String,
    admin_user: String,
}

impl PermissionLookup for StaticPermissions {
    fn is_channel_allowed(&self, _guild_id: &str, channel_id: &str) -> bool {
        channel_id == self.allowed_channel
    }

    fn is_admin(&self, _guild_id: &str, user_id: &str, _role_ids: &[String]) -> bool {
        user_id == self.admin_user
    }

    fn default_labels(&self, _guild_id: &str) -> Vec<String> {
        vec!["bug".to_string()]
    }
}

struct Harness {
    supervisor: Arc<IntakeSupervisor>,
    chat: Arc<RecordingChat>,
    tracker: Arc<CountingTracker>,
}

fn harness(idle_window: Duration, tracker_fails: bool) -> Harness {
    let chat = Arc::new(RecordingChat::default());
    let tracker = Arc::new(CountingTracker::new(tracker_fails));
    let supervisor = IntakeSupervisor::new(IntakeRuntimeConfig {
        chat: chat.clone(),
        tracker: tracker.clone(),
        permissions: Arc::new(StaticPermissions {
            allowed_channel: "c-intake".to_string(),
            admin_user: "boss".to_string(),
        }),
        bot_user_id: "bot".to_string(),
        idle_window,
    });
    Harness {
        supervisor,
        chat,
        tracker,
    }
}

fn request(title: Option<&str>) -> IntakeRequest {
    IntakeRequest {
        guild_id: "g1".to_string(),
        channel_id: "c-intake".to_string(),
        channel_is_thread: false,
        requester_id: "alice".to_string(),
        requester_tag: "alice#1".to_string(),
        title: title.map(ToString::to_string),
    }
}

fn inbound(author_id: &str, author_tag: &str, text: &str, message_id: &str) -> InboundMessage {
    InboundMessage {
        author_id: author_id.to_string(),
        author_tag: author_tag.to_string(),
        author_role_ids: Vec::new(),
        author_has_admin_permission: false,
        text: text.to_string(),
        attachments: Vec::new(),
        message: MessageRef {
            channel_id: "thread-c-intake".to_string(),
            message_id: message_id.to_string(),
        },
    }
}

#[tokio::test]
async fn unit_begin_intake_rejects_thread_origin() {
    let harness = harness(Duration::from_secs(5), false);
    let mut rejected = request(None);
    rejected.channel_is_thread = true;
    match harness.supervisor.begin_intake(rejected).await {
        Err(IntakeError::Rejected(IntakeRejection::InsideThread)) => {}
        other => panic!("expected InsideThread rejection, got {other:?}"),
    }
    assert!(harness.chat.calls().is_empty());
    assert_eq!(harness.supervisor.active_session_count(), 0);
}

#[tokio::test]
async fn unit_begin_intake_rejects_unlisted_channel() {
    let harness = harness(Duration::from_secs(5), false);
    let mut rejected = request(None);
    rejected.channel_id = "c-general".to_string();
    match harness.supervisor.begin_intake(rejected).await {
        Err(IntakeError::Rejected(IntakeRejection::ChannelNotAllowed)) => {}
        other => panic!("expected ChannelNotAllowed rejection, got {other:?}"),
    }
    assert!(harness.chat.calls().is_empty());
}

#[tokio::test]
async fn integration_full_intake_files_issue_once_and_seals() {
    let harness = harness(Duration::from_secs(5), false);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash on save")))
        .await
        .expect("begin intake");
    assert!(harness.supervisor.is_active(&thread));

    assert!(
        harness
            .supervisor
            .deliver_message(&thread, inbound("alice", "alice#1", "Steps: click save", "m1"))
            .await
    );
    assert!(
        harness
            .supervisor
            .deliver_message(&thread, inbound("alice", "alice#1", "!done", "m2"))
            .await
    );
    sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.tracker.call_count(), 1);
    assert_eq!(
        harness.tracker.payloads(),
        vec![(
            "Crash on save".to_string(),
            "alice#1 says:\nSteps: click save".to_string(),
            vec!["bug".to_string()],
        )]
    );

    let calls = harness.chat.calls();
    assert!(calls.iter().any(|call| call.starts_with("open:c-intake:Issue thread: Crash on save")));
    assert!(calls.iter().any(|call| call == "react:m1:\u{1F44D}"));
    assert!(calls
        .iter()
        .any(|call| call.contains("https://github.com/acme/app/issues/42")));
    // Lock failed (permissions) but archive still ran: seal is best effort.
    assert!(calls.iter().any(|call| call.starts_with("lock:")));
    assert!(calls.iter().any(|call| call.starts_with("archive:")));
    assert_eq!(harness.supervisor.active_session_count(), 0);
}

#[tokio::test]
async fn integration_duplicate_done_only_files_once() {
    let harness = harness(Duration::from_secs(5), false);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash")))
        .await
        .expect("begin intake");

    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "details", "m1"))
        .await;
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "!done", "m2"))
        .await;
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "!done", "m3"))
        .await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.tracker.call_count(), 1);
    assert_eq!(harness.supervisor.active_session_count(), 0);
}

#[tokio::test]
async fn integration_idle_without_messages_closes_empty() {
    let harness = harness(Duration::from_millis(80), false);
    let thread = harness
        .supervisor
        .begin_intake(request(None))
        .await
        .expect("begin intake");

    sleep(Duration::from_millis(250)).await;

    assert_eq!(harness.tracker.call_count(), 0);
    let calls = harness.chat.calls();
    assert!(calls
        .iter()
        .any(|call| call.starts_with("send:") && call.contains("no issue was created")));
    assert!(calls.iter().any(|call| call.starts_with("archive:")));
    assert!(!harness.supervisor.is_active(&thread));
}

#[tokio::test]
async fn integration_idle_with_content_files_buffered_description() {
    let harness = harness(Duration::from_millis(120), false);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash")))
        .await
        .expect("begin intake");
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "half-finished notes", "m1"))
        .await;

    sleep(Duration::from_millis(400)).await;

    assert_eq!(harness.tracker.call_count(), 1);
    assert_eq!(
        harness.tracker.payloads()[0].1,
        "alice#1 says:\nhalf-finished notes"
    );
    assert!(harness.chat.calls().iter().any(|call| call.starts_with("archive:")));
}

#[tokio::test]
async fn integration_admin_reject_closes_without_filing() {
    let harness = harness(Duration::from_secs(5), false);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash")))
        .await
        .expect("begin intake");
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "details", "m1"))
        .await;
    harness
        .supervisor
        .deliver_message(&thread, inbound("boss", "boss#0", "!reject", "m2"))
        .await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.tracker.call_count(), 0);
    let calls = harness.chat.calls();
    assert!(calls.iter().any(|call| call == "reply:m2:Got it boss! Closing this thread as rejected."));
    assert!(calls.iter().any(|call| call.starts_with("archive:")));

    // The stream is closed: late messages are not routed.
    assert!(
        !harness
            .supervisor
            .deliver_message(&thread, inbound("alice", "alice#1", "too late", "m3"))
            .await
    );
}

#[tokio::test]
async fn integration_non_admin_reject_is_description_content() {
    let harness = harness(Duration::from_millis(150), false);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash")))
        .await
        .expect("begin intake");
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "details", "m1"))
        .await;
    harness
        .supervisor
        .deliver_message(&thread, inbound("mallory", "mallory#3", "!wontfix", "m2"))
        .await;

    sleep(Duration::from_millis(450)).await;

    // Idle close filed the issue with the literal command in the body.
    assert_eq!(harness.tracker.call_count(), 1);
    let body = &harness.tracker.payloads()[0].1;
    assert!(body.contains("!wontfix"));
    assert!(body.contains("mallory#3 says:"));
}

#[tokio::test]
async fn integration_filing_failure_reports_and_seals_without_retry() {
    let harness = harness(Duration::from_secs(5), true);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash")))
        .await
        .expect("begin intake");
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "details", "m1"))
        .await;
    harness
        .supervisor
        .deliver_message(&thread, inbound("alice", "alice#1", "!done", "m2"))
        .await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.tracker.call_count(), 1);
    let calls = harness.chat.calls();
    assert!(calls
        .iter()
        .any(|call| call.starts_with("send:") && call.contains("went wrong")));
    assert!(!calls.iter().any(|call| call.contains("issues/42")));
    assert!(calls.iter().any(|call| call.starts_with("archive:")));
}

#[tokio::test]
async fn unit_bot_echo_is_filtered_at_the_boundary() {
    let harness = harness(Duration::from_secs(5), false);
    let thread = harness
        .supervisor
        .begin_intake(request(Some("Crash")))
        .await
        .expect("begin intake");

    assert!(
        !harness
            .supervisor
            .deliver_message(&thread, inbound("bot", "triage#0", "greeting echo", "m1"))
            .await
    );
    sleep(Duration::from_millis(100)).await;
    assert!(!harness.chat.calls().iter().any(|call| call.starts_with("react:")));
}
