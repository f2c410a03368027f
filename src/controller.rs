//! The retrieval controller.
//!
//! A [`RetrievalController`] owns one [`SessionLock`] and drives a fresh session
//! per trigger: connect, open the mailbox, search, fetch, emit one output per
//! message, tear down. Every exit path goes through the same teardown, which
//! closes the session if one is open and releases the lock.
//!
//! # Example
//!
//! ```no_run
//! use imap_to_eml::{LogStatus, RequestContext, RetrievalConfig, RetrievalController};
//!
//! # async fn example() -> imap_to_eml::Result<()> {
//! let config = RetrievalConfig::builder()
//!     .host("imap.example.com")
//!     .userid("user@example.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RequestContext>();
//! let controller = RetrievalController::imap(config, LogStatus, tx)?;
//!
//! let outcome = controller.trigger(RequestContext::new()).await;
//! println!("{outcome:?}");
//!
//! while let Ok(msg) = rx.try_recv() {
//!     println!("{:?}", msg.payload());
//! }
//! # Ok(())
//! # }
//! ```

use crate::assembler::MessageAssembler;
use crate::backend::{MailSession, SessionConnector, SessionEvent, SessionState};
use crate::client::ImapConnector;
use crate::config::RetrievalConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::lock::SessionLock;
use crate::status::{NodeStatus, OutputEmitter, StatusSink};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// How a single trigger ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Another run holds the session; the trigger was dropped.
    Busy,
    /// The search matched nothing.
    Empty,
    /// All matched messages were fetched.
    Completed {
        /// Number of outputs emitted.
        emitted: usize,
    },
    /// The session was not authenticated when the mailbox was about to be opened.
    NotAuthenticated(SessionState),
    /// The run failed and was torn down.
    Failed(Error),
    /// The controller was shut down mid-run.
    Shutdown,
}

impl RunOutcome {
    /// Returns `true` for [`RunOutcome::Failed`] and [`RunOutcome::NotAuthenticated`].
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed(_) | RunOutcome::NotAuthenticated(_))
    }

    fn reports_idle(&self) -> bool {
        matches!(self, RunOutcome::Empty | RunOutcome::Completed { .. })
    }
}

struct Shared {
    lock: SessionLock,
    state: SessionState,
}

struct Inner<C> {
    config: RetrievalConfig,
    connector: C,
    shared: Mutex<Shared>,
    status: Box<dyn StatusSink>,
    output: Box<dyn OutputEmitter>,
    shutdown: watch::Sender<u64>,
}

impl<C> Inner<C> {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, status: NodeStatus) {
        self.status.report(status);
    }

    fn try_acquire(&self) -> Option<u64> {
        let mut shared = self.shared();
        if shared.lock.acquire() {
            shared.state = SessionState::Idle;
            Some(shared.lock.generation())
        } else {
            None
        }
    }

    fn release(&self, generation: u64) -> bool {
        self.shared().lock.release_if_current(generation)
    }

    /// Applies `event` to the run's state and publishes it while the run still
    /// owns the lock.
    fn fire(&self, generation: u64, state: &mut SessionState, event: SessionEvent) {
        let Some(next) = state.apply(event) else {
            warn!(state = %state, ?event, "Ignoring session event");
            return;
        };
        *state = next;

        let mut shared = self.shared();
        if shared.lock.generation() == generation {
            shared.state = next;
        }
    }

    fn fail(&self, generation: u64, state: &mut SessionState, err: Error) -> RunOutcome {
        warn!(error = %err, category = %err.category(), "Retrieval failed");
        self.fire(generation, state, SessionEvent::Error);
        self.report(NodeStatus::Error);
        RunOutcome::Failed(err)
    }
}

/// One trigger's session and state.
struct Run<S> {
    generation: u64,
    state: SessionState,
    session: Option<S>,
}

/// Drives one retrieval session per trigger.
///
/// Cloning is cheap; clones share the lock and the session.
pub struct RetrievalController<C: SessionConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: SessionConnector> Clone for RetrievalController<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RetrievalController<ImapConnector> {
    /// Creates a controller talking IMAP as configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured host is not usable for TLS.
    pub fn imap(
        config: RetrievalConfig,
        status: impl StatusSink + 'static,
        output: impl OutputEmitter + 'static,
    ) -> Result<Self> {
        let connector = ImapConnector::new(&config)?;
        Ok(Self::new(config, connector, status, output))
    }
}

impl<C: SessionConnector> RetrievalController<C> {
    /// Creates a controller using `connector` for sessions.
    pub fn new(
        config: RetrievalConfig,
        connector: C,
        status: impl StatusSink + 'static,
        output: impl OutputEmitter + 'static,
    ) -> Self {
        let (shutdown, _) = watch::channel(0);
        let lock = SessionLock::new(config.lease);

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                shared: Mutex::new(Shared {
                    lock,
                    state: SessionState::Idle,
                }),
                status: Box::new(status),
                output: Box::new(output),
                shutdown,
            }),
        }
    }

    /// Returns `true` while a run holds an unexpired lease.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.shared().lock.is_busy()
    }

    /// State of the current (or last) run's session.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.shared().state
    }

    /// The configuration this controller was built with.
    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.inner.config
    }

    /// Runs one retrieval for `ctx`.
    ///
    /// Returns [`RunOutcome::Busy`] at once if another run holds the lock; the
    /// trigger is not queued. Failures are reported on the status channel and
    /// returned as [`RunOutcome::Failed`], never propagated.
    #[instrument(
        name = "RetrievalController::trigger",
        skip_all,
        fields(host = %self.inner.config.host, mailbox = %self.inner.config.mailbox)
    )]
    pub async fn trigger(&self, ctx: RequestContext) -> RunOutcome {
        // Subscribe first so a shutdown right after acquiring is not missed
        let mut shutdown = self.inner.shutdown.subscribe();

        let Some(generation) = self.inner.try_acquire() else {
            debug!("Session busy, dropping trigger");
            self.inner.report(NodeStatus::Busy);
            return RunOutcome::Busy;
        };

        let mut run = Run {
            generation,
            state: SessionState::Idle,
            session: None,
        };

        let outcome = tokio::select! {
            outcome = self.drive(&mut run, &ctx) => outcome,
            _ = shutdown.changed() => {
                info!("Shutdown requested, abandoning run");
                RunOutcome::Shutdown
            }
        };

        self.teardown(&mut run, &outcome).await;

        debug!(?outcome, "Run finished");
        outcome
    }

    /// Tears down the in-flight run (if any), frees the lock and clears the status.
    ///
    /// The run closes its own session once it observes the signal.
    #[instrument(name = "RetrievalController::shutdown", skip(self))]
    pub fn shutdown(&self) {
        self.inner.shutdown.send_modify(|epoch| *epoch += 1);
        self.inner.shared().lock.release();
        self.inner.report(NodeStatus::Cleared);
    }

    async fn drive(&self, run: &mut Run<C::Session>, ctx: &RequestContext) -> RunOutcome {
        let inner = &*self.inner;
        let config = &inner.config;
        let Run {
            generation,
            state,
            session: slot,
        } = run;
        let generation = *generation;

        inner.report(NodeStatus::Connecting);
        inner.fire(generation, state, SessionEvent::Connect);

        let session = match inner.connector.connect().await {
            Ok(session) => session,
            Err(err) => return inner.fail(generation, state, err),
        };
        let session = slot.insert(session);

        inner.fire(generation, state, SessionEvent::Ready);
        inner.report(NodeStatus::Connected);

        let observed = session.state();
        if *state != SessionState::Authenticated || observed != SessionState::Authenticated {
            let seen = if observed == SessionState::Authenticated {
                *state
            } else {
                observed
            };
            warn!(state = %seen, "Session not authenticated, leaving mailbox untouched");
            inner.report(NodeStatus::NotAuthenticated(seen));
            return RunOutcome::NotAuthenticated(seen);
        }

        inner.report(NodeStatus::Reading);

        let read_only = config.disposition.read_only();
        if let Err(err) = session.select_mailbox(&config.mailbox, read_only).await {
            return inner.fail(generation, state, err);
        }

        let criteria = match config.criteria.resolve(ctx) {
            Ok(criteria) => criteria,
            Err(err) => return inner.fail(generation, state, err),
        };
        let uids = match session.search(criteria.as_str()).await {
            Ok(uids) => uids,
            Err(err) => return inner.fail(generation, state, err),
        };

        info!(count = uids.len(), criteria = %criteria, "Search complete");
        inner.report(NodeStatus::Found(uids.len()));

        if uids.is_empty() {
            return RunOutcome::Empty;
        }

        let mut messages = match session.fetch(&uids, config.disposition.marks_seen()).await {
            Ok(messages) => messages,
            Err(err) => return inner.fail(generation, state, err),
        };

        let mut emitted = 0;
        while let Some(item) = messages.next().await {
            let message = match item {
                Ok(message) => message,
                Err(err) => return inner.fail(generation, state, err),
            };

            let assembler =
                MessageAssembler::new(message.seq, message.uid, config.max_message_size);
            let result = match assembler.assemble(message.body).await {
                Ok(result) => result,
                Err(err) => return inner.fail(generation, state, err),
            };

            debug!(
                seq = result.seq,
                uid = ?result.uid,
                bytes = result.payload.len(),
                subject = ?result.subject(),
                "Emitting message"
            );
            inner.output.emit(ctx.with_payload(result.payload_text()));
            emitted += 1;
        }

        RunOutcome::Completed { emitted }
    }

    /// Closes the run's session if it is still authenticated, drops it and
    /// releases the lock. Safe to call more than once.
    async fn teardown(&self, run: &mut Run<C::Session>, outcome: &RunOutcome) {
        let inner = &*self.inner;

        if let Some(mut session) = run.session.take() {
            if session.state() == SessionState::Authenticated {
                if let Err(err) = session.close().await {
                    warn!(error = %err, "Session close failed");
                }
            }
            drop(session);
            inner.fire(run.generation, &mut run.state, SessionEvent::Ended);
        }

        // A reclaimed run leaves the status to the run that took over
        if !inner.release(run.generation) {
            debug!(generation = run.generation, "Lock no longer held by this run");
            return;
        }

        if outcome.reports_idle() {
            inner.report(NodeStatus::Idle);
        }
    }
}

impl<C: SessionConnector> std::fmt::Debug for RetrievalController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared();
        f.debug_struct("RetrievalController")
            .field("config", &self.inner.config)
            .field("lock", &shared.lock)
            .field("state", &shared.state)
            .finish_non_exhaustive()
    }
}
