//! Retrieval controller scenarios against an in-memory session.
//!
//! The scripted connector records every call the controller makes and can
//! hold a fetch open, fail logins or hand out an already-ended session.

use futures::{stream, StreamExt};
use imap_to_eml::{
    CriteriaSource, Disposition, Error, FetchStream, FetchedMessage, MailSession, NodeStatus,
    RequestContext, Result, RetrievalConfig, RetrievalConfigBuilder, RetrievalController,
    RunOutcome, SearchCriteria, SessionConnector, SessionState,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted session
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Item {
    Message {
        seq: u32,
        uid: u32,
        chunks: Vec<&'static str>,
        break_after: bool,
    },
    FetchError,
}

fn message(seq: u32, uid: u32, chunks: &[&'static str]) -> Item {
    Item::Message {
        seq,
        uid,
        chunks: chunks.to_vec(),
        break_after: false,
    }
}

#[derive(Default)]
struct Script {
    uids: Mutex<Vec<u32>>,
    items: Mutex<Vec<Item>>,
    /// One entry per fetch call; `Some` holds the first body until notified.
    gates: Mutex<VecDeque<Option<Arc<Notify>>>>,
    failing_connects: AtomicUsize,
    ended_on_connect: AtomicBool,
    fail_search: AtomicBool,

    fetch_started: Notify,
    connects: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    selects: Mutex<Vec<(String, bool)>>,
    searches: Mutex<Vec<String>>,
    fetches: Mutex<Vec<(Vec<u32>, bool)>>,
}

impl Script {
    fn with_messages(uids: &[u32], items: Vec<Item>) -> Arc<Self> {
        let script = Self::default();
        *script.uids.lock().unwrap() = uids.to_vec();
        *script.items.lock().unwrap() = items;
        Arc::new(script)
    }

    fn gate_next_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().push_back(Some(Arc::clone(&gate)));
        gate
    }
}

struct MockConnector {
    script: Arc<Script>,
}

struct MockSession {
    script: Arc<Script>,
    state: SessionState,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.script.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionConnector for MockConnector {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession> {
        let script = &self.script;
        script.connects.fetch_add(1, Ordering::SeqCst);

        let failing = script.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            script.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(Error::ImapLogin {
                userid: "bob".into(),
                source: async_imap::error::Error::No("[AUTHENTICATIONFAILED] invalid".into()),
            });
        }

        let live = script.live.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_live.fetch_max(live, Ordering::SeqCst);

        let state = if script.ended_on_connect.load(Ordering::SeqCst) {
            SessionState::Ended
        } else {
            SessionState::Authenticated
        };

        Ok(MockSession {
            script: Arc::clone(script),
            state,
        })
    }
}

impl MailSession for MockSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn select_mailbox(&mut self, name: &str, read_only: bool) -> Result<()> {
        self.script
            .selects
            .lock()
            .unwrap()
            .push((name.to_string(), read_only));
        Ok(())
    }

    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        self.script.searches.lock().unwrap().push(criteria.to_string());
        if self.script.fail_search.load(Ordering::SeqCst) {
            return Err(Error::ImapSearch {
                criteria: criteria.to_string(),
                source: async_imap::error::Error::Bad("unknown search key".into()),
            });
        }
        Ok(self.script.uids.lock().unwrap().clone())
    }

    async fn fetch(&mut self, uids: &[u32], mark_seen: bool) -> Result<FetchStream<'_>> {
        let script = &self.script;
        script
            .fetches
            .lock()
            .unwrap()
            .push((uids.to_vec(), mark_seen));

        let mut gate = script.gates.lock().unwrap().pop_front().flatten();
        let items = script.items.lock().unwrap().clone();
        script.fetch_started.notify_one();

        let messages: Vec<Result<FetchedMessage>> = items
            .into_iter()
            .map(|item| into_fetched(item, gate.take()))
            .collect();

        Ok(stream::iter(messages).boxed())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Ended;
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn into_fetched(item: Item, gate: Option<Arc<Notify>>) -> Result<FetchedMessage> {
    let Item::Message {
        seq,
        uid,
        chunks,
        break_after,
    } = item
    else {
        return Err(Error::FetchMessage {
            source: async_imap::error::Error::ConnectionLost,
        });
    };

    let mut parts: Vec<Result<Vec<u8>>> =
        chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
    if break_after {
        parts.push(Err(Error::FetchMessage {
            source: async_imap::error::Error::ConnectionLost,
        }));
    }

    let wait = stream::once(async move {
        if let Some(gate) = gate {
            gate.notified().await;
        }
    })
    .filter_map(|()| async { None::<Result<Vec<u8>>> });

    Ok(FetchedMessage {
        seq,
        uid: Some(uid),
        body: wait.chain(stream::iter(parts)).boxed(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    controller: RetrievalController<MockConnector>,
    script: Arc<Script>,
    status: UnboundedReceiver<NodeStatus>,
    output: UnboundedReceiver<RequestContext>,
}

impl Harness {
    fn new(script: Arc<Script>) -> Self {
        Self::with_config(script, |builder| builder)
    }

    fn with_config(
        script: Arc<Script>,
        configure: impl FnOnce(RetrievalConfigBuilder) -> RetrievalConfigBuilder,
    ) -> Self {
        let builder = RetrievalConfig::builder()
            .host("imap.example.com")
            .userid("bob")
            .password("hunter2")
            .criteria(CriteriaSource::Static(SearchCriteria::unseen()));
        let config = configure(builder).build().unwrap();

        let (status_tx, status) = mpsc::unbounded_channel();
        let (output_tx, output) = mpsc::unbounded_channel();
        let connector = MockConnector {
            script: Arc::clone(&script),
        };

        Self {
            controller: RetrievalController::new(config, connector, status_tx, output_tx),
            script,
            status,
            output,
        }
    }

    fn statuses(&mut self) -> Vec<NodeStatus> {
        let mut out = Vec::new();
        while let Ok(status) = self.status.try_recv() {
            out.push(status);
        }
        out
    }

    fn outputs(&mut self) -> Vec<RequestContext> {
        let mut out = Vec::new();
        while let Ok(ctx) = self.output.try_recv() {
            out.push(ctx);
        }
        out
    }
}

fn payloads(outputs: &[RequestContext]) -> Vec<String> {
    outputs
        .iter()
        .map(|ctx| ctx.payload().and_then(|p| p.as_str()).unwrap_or_default().to_string())
        .collect()
}

fn upstream() -> RequestContext {
    RequestContext::from_value(json!({
        "topic": "mail/inbox",
        "payload": "tick",
        "_msgid": "a1b2",
    }))
    .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Search results
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_zero_unseen_emits_nothing() {
    let mut h = Harness::new(Script::with_messages(&[], Vec::new()));

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Empty));
    assert!(h.outputs().is_empty());
    assert!(h.statuses().contains(&NodeStatus::Found(0)));
    assert!(h.script.fetches.lock().unwrap().is_empty());
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_two_unseen_messages_are_emitted_verbatim() {
    let mut h = Harness::new(Script::with_messages(
        &[11, 12],
        vec![
            message(1, 11, &["Subject: A\n", "\nHello"]),
            message(2, 12, &["Subject: B\n\nWorld"]),
        ],
    ));

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Completed { emitted: 2 }));

    let outputs = h.outputs();
    assert_eq!(
        payloads(&outputs),
        vec!["Subject: A\n\nHello", "Subject: B\n\nWorld"]
    );
    for ctx in &outputs {
        assert_eq!(ctx.get("topic"), Some(&json!("mail/inbox")));
        assert_eq!(ctx.get("_msgid"), Some(&json!("a1b2")));
    }

    assert_eq!(
        h.statuses(),
        vec![
            NodeStatus::Connecting,
            NodeStatus::Connected,
            NodeStatus::Reading,
            NodeStatus::Found(2),
            NodeStatus::Idle,
        ]
    );
    assert_eq!(*h.script.searches.lock().unwrap(), vec!["UNSEEN"]);
    assert_eq!(
        *h.script.selects.lock().unwrap(),
        vec![("INBOX".to_string(), false)]
    );
    assert_eq!(*h.script.fetches.lock().unwrap(), vec![(vec![11, 12], true)]);
    assert_eq!(h.controller.state(), SessionState::Ended);
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_outputs_follow_delivery_order() {
    let mut h = Harness::new(Script::with_messages(
        &[11, 12],
        vec![
            message(2, 12, &["Subject: B\n\nWorld"]),
            message(1, 11, &["Subject: A\n\nHello"]),
        ],
    ));

    h.controller.trigger(upstream()).await;

    assert_eq!(
        payloads(&h.outputs()),
        vec!["Subject: B\n\nWorld", "Subject: A\n\nHello"]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_error_mid_assembly_drops_that_message() {
    let mut h = Harness::new(Script::with_messages(
        &[11, 12],
        vec![
            message(1, 11, &["Subject: A\n\nHello"]),
            Item::Message {
                seq: 2,
                uid: 12,
                chunks: vec!["Subject: B\n", "\nWor"],
                break_after: true,
            },
        ],
    ));

    let outcome = h.controller.trigger(upstream()).await;

    match outcome {
        RunOutcome::Failed(Error::BodyStream { seq, .. }) => assert_eq!(seq, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(payloads(&h.outputs()), vec!["Subject: A\n\nHello"]);
    assert!(h.statuses().contains(&NodeStatus::Error));
    assert_eq!(h.script.live.load(Ordering::SeqCst), 0);
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_fetch_stream_error_tears_down() {
    let mut h = Harness::new(Script::with_messages(&[11], vec![Item::FetchError]));

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Failed(Error::FetchMessage { .. })));
    assert!(h.outputs().is_empty());
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_search_error_closes_session() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    script.fail_search.store(true, Ordering::SeqCst);
    let mut h = Harness::new(script);

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Failed(Error::ImapSearch { .. })));
    assert!(h.outputs().is_empty());
    assert_eq!(h.statuses().last(), Some(&NodeStatus::Error));
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_oversized_message_fails_run() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["0123456789", "abc"])]);
    let mut h = Harness::with_config(script, |b| b.max_message_size(Some(12)));

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(Error::PayloadTooLarge { seq: 1, limit: 12 })
    ));
    assert!(h.outputs().is_empty());
}

#[tokio::test]
async fn test_auth_failure_then_recovery() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["Subject: A\n\nHello"])]);
    script.failing_connects.store(1, Ordering::SeqCst);
    let mut h = Harness::new(script);

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Failed(Error::ImapLogin { .. })));
    assert_eq!(
        h.statuses(),
        vec![NodeStatus::Connecting, NodeStatus::Error]
    );
    assert_eq!(h.controller.state(), SessionState::Error);
    assert!(!h.controller.is_busy());

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Completed { emitted: 1 }));
    assert_eq!(payloads(&h.outputs()), vec!["Subject: A\n\nHello"]);
}

#[tokio::test]
async fn test_not_authenticated_leaves_mailbox_untouched() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    script.ended_on_connect.store(true, Ordering::SeqCst);
    let mut h = Harness::new(script);

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(
        outcome,
        RunOutcome::NotAuthenticated(SessionState::Ended)
    ));
    assert!(h
        .statuses()
        .contains(&NodeStatus::NotAuthenticated(SessionState::Ended)));
    assert!(h.script.selects.lock().unwrap().is_empty());
    // Not force-closed, only dropped
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 0);
    assert_eq!(h.script.live.load(Ordering::SeqCst), 0);
    assert!(!h.controller.is_busy());
}

// ─────────────────────────────────────────────────────────────────────────────
// Criteria and disposition
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_supplied_criteria() {
    let script = Script::with_messages(&[], Vec::new());
    let h = Harness::with_config(script, |b| b.criteria(CriteriaSource::FromRequest));

    let mut ctx = upstream();
    ctx.insert("criteria", json!(["UNSEEN", ["FROM", "alice"]]));
    h.controller.trigger(ctx).await;
    h.controller.trigger(upstream()).await;

    assert_eq!(
        *h.script.searches.lock().unwrap(),
        vec!["UNSEEN FROM alice", "ALL"]
    );
}

#[tokio::test]
async fn test_request_criteria_with_line_break_never_reach_search() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    let mut h = Harness::with_config(script, |b| b.criteria(CriteriaSource::FromRequest));

    let mut ctx = upstream();
    ctx.insert("criteria", "ALL\r\nX1 DELETE INBOX");
    let outcome = h.controller.trigger(ctx).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(Error::InvalidCriteria { .. })
    ));
    assert!(h.script.searches.lock().unwrap().is_empty());
    assert!(h.script.fetches.lock().unwrap().is_empty());
    assert!(h.outputs().is_empty());
    assert!(h.statuses().contains(&NodeStatus::Error));
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_request_criteria_tokens_are_quoted() {
    let script = Script::with_messages(&[], Vec::new());
    let h = Harness::with_config(script, |b| b.criteria(CriteriaSource::FromRequest));

    let mut ctx = upstream();
    ctx.insert("criteria", json!(["SUBJECT", "a \"b\" c"]));
    h.controller.trigger(ctx).await;

    assert_eq!(
        *h.script.searches.lock().unwrap(),
        vec![r#"SUBJECT "a \"b\" c""#]
    );
}

#[tokio::test]
async fn test_peek_disposition_is_read_only() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    let h = Harness::with_config(script, |b| {
        b.disposition(Disposition::Peek).mailbox("Archive")
    });

    h.controller.trigger(upstream()).await;

    assert_eq!(
        *h.script.selects.lock().unwrap(),
        vec![("Archive".to_string(), true)]
    );
    assert_eq!(*h.script.fetches.lock().unwrap(), vec![(vec![11], false)]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutual exclusion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_trigger_while_fetching_is_busy() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["Subject: A\n\nHello"])]);
    let gate = script.gate_next_fetch();
    let mut h = Harness::new(script);

    let first = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.trigger(upstream()).await }
    });
    h.script.fetch_started.notified().await;
    assert!(h.controller.is_busy());

    let outcome = h.controller.trigger(upstream()).await;

    assert!(matches!(outcome, RunOutcome::Busy));
    assert!(h.statuses().contains(&NodeStatus::Busy));
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 1);

    gate.notify_one();
    let outcome = first.await.unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { emitted: 1 }));
    assert_eq!(h.outputs().len(), 1);
    assert_eq!(h.script.max_live.load(Ordering::SeqCst), 1);
    assert!(!h.controller.is_busy());
}

#[tokio::test]
async fn test_sequential_triggers_never_overlap_sessions() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    let h = Harness::new(script);

    for _ in 0..3 {
        h.controller.trigger(upstream()).await;
    }

    assert_eq!(h.script.connects.load(Ordering::SeqCst), 3);
    assert_eq!(h.script.max_live.load(Ordering::SeqCst), 1);
    assert_eq!(h.script.live.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_lease_is_reclaimed() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    let stale_gate = script.gate_next_fetch();
    let fresh_gate = script.gate_next_fetch();
    let mut h = Harness::with_config(script, |b| b.lease(Duration::from_secs(60)));

    let stale = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.trigger(upstream()).await }
    });
    h.script.fetch_started.notified().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(!h.controller.is_busy());

    let fresh = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.trigger(upstream()).await }
    });
    h.script.fetch_started.notified().await;
    assert_eq!(h.script.connects.load(Ordering::SeqCst), 2);

    h.statuses();

    // The stale run finishing must not free the fresh run's lock or clear its status
    stale_gate.notify_one();
    assert!(matches!(stale.await.unwrap(), RunOutcome::Completed { .. }));
    assert!(h.controller.is_busy());
    assert!(!h.statuses().contains(&NodeStatus::Idle));

    fresh_gate.notify_one();
    assert!(matches!(fresh.await.unwrap(), RunOutcome::Completed { .. }));
    assert!(!h.controller.is_busy());
    assert_eq!(h.statuses().last(), Some(&NodeStatus::Idle));
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_mid_fetch_closes_session() {
    let script = Script::with_messages(&[11], vec![message(1, 11, &["x"])]);
    let _gate = script.gate_next_fetch();
    let mut h = Harness::new(script);

    let run = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.trigger(upstream()).await }
    });
    h.script.fetch_started.notified().await;

    h.controller.shutdown();
    assert!(!h.controller.is_busy());

    let outcome = run.await.unwrap();

    assert!(matches!(outcome, RunOutcome::Shutdown));
    assert!(h.outputs().is_empty());
    assert_eq!(h.script.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.script.live.load(Ordering::SeqCst), 0);
    assert_eq!(h.statuses().last(), Some(&NodeStatus::Cleared));
}

#[tokio::test]
async fn test_shutdown_when_idle_is_harmless() {
    let script = Script::with_messages(&[], Vec::new());
    let mut h = Harness::new(script);

    h.controller.shutdown();
    h.controller.shutdown();

    assert!(!h.controller.is_busy());
    assert_eq!(h.statuses(), vec![NodeStatus::Cleared, NodeStatus::Cleared]);

    assert!(matches!(
        h.controller.trigger(upstream()).await,
        RunOutcome::Empty
    ));
}
