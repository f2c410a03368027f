//! Error types for the imap-to-eml crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].
//!
//! The [`RetrievalController`](crate::RetrievalController) never hands these to the
//! host: a failed run is reported on the status channel and surfaced as
//! [`RunOutcome::Failed`](crate::RunOutcome::Failed).

use crate::backend::SessionState;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while retrieving messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    /// The request context is not a JSON object.
    #[error("request context must be a JSON object, got {kind}")]
    InvalidContext {
        /// The JSON kind that was supplied instead.
        kind: &'static str,
    },

    /// Search criteria that cannot be sent as a single command line.
    #[error("invalid search criteria {criteria:?}: {reason}")]
    InvalidCriteria {
        /// The rejected expression.
        criteria: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Server closed the connection before sending its greeting.
    #[error("missing IMAP greeting from {target}")]
    MissingGreeting {
        /// The target address.
        target: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE except logout)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {userid} after {timeout:?}")]
    AuthTimeout {
        /// The user id used for authentication.
        userid: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {userid}")]
    ImapLogin {
        /// The user id used for login.
        userid: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to open mailbox '{mailbox}' (read_only: {read_only})")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// Whether the mailbox was opened with EXAMINE.
        read_only: bool,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed for criteria '{criteria}'")]
    ImapSearch {
        /// The criteria that were sent.
        criteria: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID set {uid_set}")]
    ImapFetch {
        /// The UID set that failed.
        uid_set: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to fetch message from stream.
    #[error("failed to fetch message from stream")]
    FetchMessage {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Session state errors (NOT retryable within the same run)
    // ─────────────────────────────────────────────────────────────────────────
    /// An operation was attempted while the session was not authenticated.
    #[error("not authenticated: {state}")]
    NotAuthenticated {
        /// The state the session was observed in.
        state: SessionState,
    },

    /// The session has already been closed.
    #[error("session already closed")]
    SessionClosed,

    // ─────────────────────────────────────────────────────────────────────────
    // Payload errors (NOT retryable - the message won't shrink)
    // ─────────────────────────────────────────────────────────────────────────
    /// A message body exceeded the configured maximum size.
    #[error("payload too large: message {seq} exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Sequence number of the offending message.
        seq: u32,
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The body stream of a message failed mid-assembly.
    #[error("body stream failed for message {seq}")]
    BodyStream {
        /// Sequence number of the message being assembled.
        seq: u32,
        /// The underlying stream error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// The controller never retries by itself; the next trigger is the retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::MissingGreeting { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. } => true,

            Error::BodyStream { source, .. } => source.is_retryable(),

            Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::InvalidContext { .. }
            | Error::InvalidCriteria { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. }
            | Error::NotAuthenticated { .. }
            | Error::SessionClosed
            | Error::PayloadTooLarge { .. } => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::InvalidContext { .. }
            | Error::InvalidCriteria { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } | Error::MissingGreeting { .. } => {
                ErrorCategory::Network
            }

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::NotAuthenticated { .. } | Error::SessionClosed => ErrorCategory::Session,

            Error::PayloadTooLarge { .. } => ErrorCategory::Payload,

            Error::BodyStream { source, .. } => source.category(),
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Session lifecycle errors.
    Session,
    /// Message payload errors.
    Payload,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Payload => write!(f, "payload"),
        }
    }
}
