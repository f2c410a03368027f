//! async-imap implementation of the session capability.
//!
//! [`ImapConnector`] opens a fresh connection per run; [`ImapMailSession`] wraps
//! the authenticated session and tracks whether it is still usable.
//!
//! # Example
//!
//! ```no_run
//! use imap_to_eml::{ImapConnector, MailSession, RetrievalConfig, SessionConnector};
//!
//! # async fn example() -> imap_to_eml::Result<()> {
//! let config = RetrievalConfig::builder()
//!     .host("imap.example.com")
//!     .userid("user@example.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let connector = ImapConnector::new(&config)?;
//! let mut session = connector.connect().await?;
//! session.select_mailbox("INBOX", true).await?;
//! let uids = session.search("UNSEEN").await?;
//! println!("{} unseen", uids.len());
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::backend::{FetchStream, FetchedMessage, MailSession, SessionConnector, SessionState};
use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::connection;
use crate::error::{Error, Result};
use crate::session::{self, AuthConfig, ImapSession};
use async_imap::types::Fetch;
use futures::{future, stream, StreamExt};
use tracing::{debug, instrument, warn};

/// Opens [`ImapMailSession`]s using a [`RetrievalConfig`].
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: RetrievalConfig,
}

impl ImapConnector {
    /// Creates a connector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDnsName`] if TLS is enabled and the host is not a
    /// valid server name.
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        if config.use_tls {
            connection::parse_server_name(&config.host)?;
        }
        Ok(Self {
            config: config.clone(),
        })
    }
}

impl SessionConnector for ImapConnector {
    type Session = ImapMailSession;

    #[instrument(
        name = "ImapConnector::connect",
        skip_all,
        fields(
            userid = %self.config.userid(),
            host = %self.config.host,
            use_tls = self.config.use_tls
        )
    )]
    async fn connect(&self) -> Result<ImapMailSession> {
        let config = &self.config;
        let target_addr = config.server_address();
        let timeouts = &config.timeouts;

        let client = tokio::time::timeout(timeouts.connect, async {
            let stream = connection::establish(&config.host, &target_addr, config.use_tls).await?;
            session::greet(stream, &target_addr).await
        })
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: timeouts.connect,
        })??;

        debug!("Connection established");

        let auth_config = AuthConfig {
            userid: config.userid(),
            password: config.password(),
        };

        let session = tokio::time::timeout(
            timeouts.auth,
            session::authenticate(client, &auth_config),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            userid: config.userid().to_string(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        Ok(ImapMailSession {
            session,
            state: SessionState::Authenticated,
            timeouts: timeouts.clone(),
        })
    }
}

/// An authenticated async-imap session.
pub struct ImapMailSession {
    session: ImapSession,
    state: SessionState,
    timeouts: TimeoutConfig,
}

impl ImapMailSession {
    fn ensure_authenticated(&self) -> Result<()> {
        match self.state {
            SessionState::Authenticated => Ok(()),
            SessionState::Ended => Err(Error::SessionClosed),
            state => Err(Error::NotAuthenticated { state }),
        }
    }

    /// Marks the session ended if `err` means the connection is gone.
    fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if connection_lost(err) {
                warn!(error = %err, "Connection lost");
                self.state = SessionState::Ended;
            }
        }
        result
    }
}

fn connection_lost(err: &Error) -> bool {
    let source = match err {
        Error::SelectMailbox { source, .. }
        | Error::ImapSearch { source, .. }
        | Error::ImapFetch { source, .. } => source,
        _ => return false,
    };
    matches!(
        source,
        async_imap::error::Error::ConnectionLost | async_imap::error::Error::Io(_)
    )
}

impl MailSession for ImapMailSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn select_mailbox(&mut self, name: &str, read_only: bool) -> Result<()> {
        self.ensure_authenticated()?;
        let result = session::select_mailbox(&mut self.session, name, read_only).await;
        self.observe(result)
    }

    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        self.ensure_authenticated()?;
        let result = session::search(&mut self.session, criteria).await;
        self.observe(result)
    }

    async fn fetch(&mut self, uids: &[u32], mark_seen: bool) -> Result<FetchStream<'_>> {
        self.ensure_authenticated()?;
        let uid_set = session::uid_set(uids);

        let messages = session::fetch_bodies(&mut self.session, &uid_set, mark_seen).await?;

        Ok(messages
            .filter_map(|item| {
                future::ready(match item {
                    Ok(fetch) => into_fetched(&fetch).map(Ok),
                    Err(source) => Some(Err(Error::FetchMessage { source })),
                })
            })
            .boxed())
    }

    #[instrument(name = "ImapMailSession::close", skip(self), fields(state = %self.state))]
    async fn close(&mut self) -> Result<()> {
        if self.state != SessionState::Authenticated {
            return Ok(());
        }
        self.state = SessionState::Ended;

        let timeout = self.timeouts.logout;
        tokio::time::timeout(timeout, session::logout(&mut self.session))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
    }
}

impl std::fmt::Debug for ImapMailSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailSession")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Converts a fetch response into a message; responses without a body
/// (e.g. unsolicited flag updates) are skipped.
fn into_fetched(fetch: &Fetch) -> Option<FetchedMessage> {
    let Some(body) = fetch.body() else {
        debug!(seq = fetch.message, "Skipping fetch response without body");
        return None;
    };

    let body = body.to_vec();
    Some(FetchedMessage {
        seq: fetch.message,
        uid: fetch.uid,
        body: stream::once(future::ready(Ok(body))).boxed(),
    })
}
