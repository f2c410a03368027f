//! # imap-to-eml
//!
//! On-demand IMAP retrieval: each trigger opens a session, searches a mailbox,
//! fetches the matching messages and emits each raw message downstream.
//!
//! This crate provides:
//! - A [`RetrievalController`] that runs one session at a time behind a
//!   lease-based [`SessionLock`], and tears the session down on every exit path
//! - An async-imap backed session capability ([`ImapConnector`]) over TLS or plain TCP
//! - A [`MessageAssembler`] that rebuilds streamed bodies with a size limit
//!
//! ## Quick Start
//!
//! ```no_run
//! use imap_to_eml::{LogStatus, RequestContext, RetrievalConfig, RetrievalController, RunOutcome};
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
//! if let RunOutcome::Completed { emitted } = controller.trigger(RequestContext::new()).await {
//!     println!("{emitted} messages");
//! }
//! while let Ok(msg) = rx.try_recv() {
//!     println!("{:?}", msg.payload());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Request-supplied Criteria
//!
//! ```
//! use imap_to_eml::{CriteriaSource, RequestContext};
//! use serde_json::json;
//!
//! let source = CriteriaSource::parse("_msg_").unwrap();
//! let ctx = RequestContext::from_value(json!({ "criteria": ["UNSEEN", ["FROM", "alice"]] })).unwrap();
//! assert_eq!(source.resolve(&ctx).unwrap().as_str(), "UNSEEN FROM alice");
//!
//! // Criteria travel on one command line; line breaks are refused
//! let ctx = RequestContext::from_value(json!({ "criteria": "ALL\r\nX1 LOGOUT" })).unwrap();
//! assert!(source.resolve(&ctx).is_err());
//! ```
//!
//! ## Error Handling
//!
//! The controller never returns errors to its caller: a failed run is reported
//! as [`NodeStatus::Error`] and handed back as [`RunOutcome::Failed`]. Use
//! [`Error::is_retryable`] to decide whether triggering again makes sense.
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation.
//!
//! ### Span Naming Convention
//!
//! - `RetrievalController::trigger` - One run
//! - `RetrievalController::shutdown` - Host shutdown
//! - `ImapConnector::connect` - Connection and login
//! - `MessageAssembler::assemble` - Body reassembly
//! - `session::authenticate`, `session::select`, `session::search` - IMAP commands
//! - `connection::establish` - TCP/TLS connection
//!
//! Credentials are never recorded; only the user id is.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod assembler;
pub mod backend;
pub mod config;
pub mod context;
pub mod controller;
pub mod criteria;
pub mod error;
pub mod lock;
pub mod status;

// Internal modules
mod client;
mod connection;
mod session;

// Re-exports for ergonomic API
pub use assembler::{MessageAssembler, MessageResult};
pub use backend::{
    BodyStream, FetchStream, FetchedMessage, MailSession, SessionConnector, SessionEvent,
    SessionState,
};
pub use client::{ImapConnector, ImapMailSession};
pub use config::{
    Credentials, Disposition, NodeSettings, RetrievalConfig, RetrievalConfigBuilder, TimeoutConfig,
};
pub use context::RequestContext;
pub use controller::{RetrievalController, RunOutcome};
pub use criteria::{CriteriaSource, SearchCriteria};
pub use error::{Error, ErrorCategory, Result};
pub use lock::SessionLock;
pub use status::{Fill, LogStatus, NodeStatus, OutputEmitter, Shape, StatusIndicator, StatusSink};
