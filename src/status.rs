//! Operator-facing status and downstream output.

use crate::backend::SessionState;
use crate::context::RequestContext;
use tokio::sync::mpsc::UnboundedSender;

/// Status indicator colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Working normally.
    Green,
    /// Transitional or contended.
    Yellow,
    /// Failed or disconnected.
    Red,
    /// Inactive.
    Grey,
}

/// Status indicator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Solid.
    Dot,
    /// Hollow.
    Ring,
}

/// What an operator display renders for a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIndicator {
    /// Colour.
    pub fill: Fill,
    /// Shape.
    pub shape: Shape,
    /// Short text.
    pub text: String,
}

/// Phase transitions reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    /// A trigger was dropped because a run is in progress.
    Busy,
    /// Opening a session.
    Connecting,
    /// Session authenticated.
    Connected,
    /// Opening the mailbox and searching.
    Reading,
    /// Number of messages the search matched.
    Found(usize),
    /// The session was not usable when the mailbox was about to be opened.
    NotAuthenticated(SessionState),
    /// The run failed.
    Error,
    /// The session ended.
    Idle,
    /// Status removed, on shutdown.
    Cleared,
}

impl NodeStatus {
    /// Renders the status, `None` for [`NodeStatus::Cleared`].
    #[must_use]
    pub fn indicator(&self) -> Option<StatusIndicator> {
        let (fill, shape, text) = match self {
            NodeStatus::Busy => (Fill::Yellow, Shape::Ring, "busy".to_string()),
            NodeStatus::Connecting => (Fill::Yellow, Shape::Dot, "connecting".to_string()),
            NodeStatus::Connected => (Fill::Green, Shape::Dot, "connected".to_string()),
            NodeStatus::Reading => (Fill::Green, Shape::Dot, "reading...".to_string()),
            NodeStatus::Found(count) => (Fill::Green, Shape::Dot, format!("email found: {count}")),
            NodeStatus::NotAuthenticated(state) => {
                (Fill::Red, Shape::Ring, format!("not authenticated: {state}"))
            }
            NodeStatus::Error => (Fill::Red, Shape::Dot, "error".to_string()),
            NodeStatus::Idle => (Fill::Grey, Shape::Ring, "not connected".to_string()),
            NodeStatus::Cleared => return None,
        };
        Some(StatusIndicator { fill, shape, text })
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.indicator() {
            Some(indicator) => f.write_str(&indicator.text),
            None => Ok(()),
        }
    }
}

/// Receives status changes.
pub trait StatusSink: Send + Sync {
    /// Reports one status change.
    fn report(&self, status: NodeStatus);
}

/// Receives one request context per retrieved message.
pub trait OutputEmitter: Send + Sync {
    /// Forwards `ctx` downstream.
    fn emit(&self, ctx: RequestContext);
}

impl StatusSink for UnboundedSender<NodeStatus> {
    fn report(&self, status: NodeStatus) {
        // Receiver gone means nobody is watching
        let _ = self.send(status);
    }
}

impl OutputEmitter for UnboundedSender<RequestContext> {
    fn emit(&self, ctx: RequestContext) {
        if self.send(ctx).is_err() {
            tracing::warn!("Output receiver dropped, discarding message");
        }
    }
}

/// A [`StatusSink`] that writes status changes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn report(&self, status: NodeStatus) {
        match status {
            NodeStatus::Error | NodeStatus::NotAuthenticated(_) => {
                tracing::warn!(status = %status, "Status changed");
            }
            NodeStatus::Cleared => tracing::debug!("Status cleared"),
            _ => tracing::info!(status = %status, "Status changed"),
        }
    }
}
