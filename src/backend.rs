//! The session capability the controller drives.
//!
//! A [`SessionConnector`] opens one authenticated [`MailSession`] per run. The
//! async-imap implementation lives in [`crate::client`]; tests substitute an
//! in-memory one.

use crate::error::Result;
use futures::stream::BoxStream;
use std::future::Future;

/// Chunks of a single message body, in arrival order.
pub type BodyStream = BoxStream<'static, Result<Vec<u8>>>;

/// Messages delivered by a fetch, in the order the server sends them.
pub type FetchStream<'a> = BoxStream<'a, Result<FetchedMessage>>;

/// One message delivered by [`MailSession::fetch`].
pub struct FetchedMessage {
    /// Message sequence number.
    pub seq: u32,
    /// Message UID, when the server reported one.
    pub uid: Option<u32>,
    /// The raw body.
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedMessage")
            .field("seq", &self.seq)
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

/// Opens sessions against the remote mailbox service.
///
/// Each call to [`connect`](Self::connect) yields a fresh session; sessions are
/// never pooled or reused across runs.
pub trait SessionConnector: Send + Sync + 'static {
    /// The session type produced by this connector.
    type Session: MailSession;

    /// Connects and authenticates.
    ///
    /// `Ok` corresponds to the `ready` event, `Err` to `authError`.
    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// One live, authenticated session.
pub trait MailSession: Send + 'static {
    /// The state the session currently reports.
    fn state(&self) -> SessionState;

    /// Selects `name`, with EXAMINE when `read_only` is set.
    fn select_mailbox(
        &mut self,
        name: &str,
        read_only: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Runs a UID search and returns the matching UIDs.
    fn search(&mut self, criteria: &str) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Fetches full bodies for `uids`.
    ///
    /// With `mark_seen` the server sets `\Seen` on every delivered message.
    fn fetch(
        &mut self,
        uids: &[u32],
        mark_seen: bool,
    ) -> impl Future<Output = Result<FetchStream<'_>>> + Send;

    /// Logs out. The session reports [`SessionState::Ended`] afterwards.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Lifecycle state of a retrieval session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No session exists.
    #[default]
    Idle,
    /// A connection is being established.
    Connecting,
    /// Logged in and usable.
    Authenticated,
    /// Closed, by us or by the server.
    Ended,
    /// Connection or authentication failed.
    Error,
}

impl SessionState {
    /// Applies `event`, returning the next state or `None` if the event is not
    /// valid in the current state.
    #[must_use]
    pub fn apply(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Idle | S::Ended | S::Error, E::Connect) => Some(S::Connecting),
            (S::Connecting, E::Ready) => Some(S::Authenticated),
            (S::Connecting | S::Authenticated, E::Error) => Some(S::Error),
            (S::Idle, E::Ended) => None,
            (_, E::Ended) => Some(S::Ended),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Ended => write!(f, "ended"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection attempt was issued.
    Connect,
    /// Authentication completed.
    Ready,
    /// Authentication or transport failure.
    Error,
    /// The session closed.
    Ended,
}
