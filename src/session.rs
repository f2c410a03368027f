//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::connection::ImapStream;
use crate::error::{Error, Result};
use async_imap::types::Fetch;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for an IMAP session over TLS or plain TCP.
pub(crate) type ImapSession = async_imap::Session<ImapStream>;

/// Authentication configuration for IMAP.
pub(crate) struct AuthConfig<'a> {
    pub userid: &'a str,
    pub password: &'a str,
}

/// Reads the server greeting and returns a client ready to log in.
#[instrument(name = "session::greet", skip_all, fields(target = %target))]
pub(crate) async fn greet(
    stream: ImapStream,
    target: &str,
) -> Result<async_imap::Client<ImapStream>> {
    let mut client = async_imap::Client::new(stream);

    let greeting = client.read_response().await;
    match greeting {
        Some(Ok(_)) => Ok(client),
        Some(Err(source)) => Err(Error::TcpConnect {
            target: target.to_string(),
            source,
        }),
        None => Err(Error::MissingGreeting {
            target: target.to_string(),
        }),
    }
}

/// Authenticates to IMAP server and returns a session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(userid = %config.userid)
)]
pub(crate) async fn authenticate(
    client: async_imap::Client<ImapStream>,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    debug!("Authenticating to IMAP server");

    client
        .login(config.userid, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            userid: config.userid.to_string(),
            source: e.0,
        })
}

/// Opens a mailbox, with EXAMINE when `read_only` is set.
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(
    session: &mut ImapSession,
    mailbox: &str,
    read_only: bool,
) -> Result<()> {
    debug!("Opening mailbox");

    let result = if read_only {
        session.examine(mailbox).await
    } else {
        session.select(mailbox).await
    };

    let opened = result.map_err(|source| Error::SelectMailbox {
        mailbox: mailbox.to_string(),
        read_only,
        source,
    })?;

    debug!(exists = opened.exists, unseen = ?opened.unseen, "Mailbox opened");

    Ok(())
}

/// Searches the selected mailbox and returns matching UIDs in ascending order.
#[instrument(name = "session::search", skip(session), fields(criteria = %criteria))]
pub(crate) async fn search(session: &mut ImapSession, criteria: &str) -> Result<Vec<u32>> {
    let uids = session
        .uid_search(criteria)
        .await
        .map_err(|source| Error::ImapSearch {
            criteria: criteria.to_string(),
            source,
        })?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Search complete");

    Ok(uids)
}

/// Formats UIDs as an IMAP sequence set ("1,2,5").
pub(crate) fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Fetches full message bodies by UID set.
///
/// `BODY[]` sets `\Seen` as a side effect, `BODY.PEEK[]` does not.
/// Returns a boxed stream of fetch results.
pub(crate) async fn fetch_bodies<'a>(
    session: &'a mut ImapSession,
    uid_set: &str,
    mark_seen: bool,
) -> Result<BoxStream<'a, std::result::Result<Fetch, async_imap::error::Error>>> {
    let query = if mark_seen { "BODY[]" } else { "BODY.PEEK[]" };

    debug!(uid_set = %uid_set, query, "Fetching messages");

    let stream = session
        .uid_fetch(uid_set.to_string(), query)
        .await
        .map_err(|source| Error::ImapFetch {
            uid_set: uid_set.to_string(),
            source,
        })?;

    Ok(stream.boxed())
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}
