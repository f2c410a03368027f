//! Configuration for the retrieval node.
//!
//! Use [`RetrievalConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use imap_to_eml::RetrievalConfig;
//!
//! let config = RetrievalConfig::builder()
//!     .host("imap.example.com")
//!     .userid("user@example.com")
//!     .password("app-password")
//!     .build()
//!     .expect("valid config");
//! ```
//!
//! Hosts that keep node definitions as JSON can deserialize [`NodeSettings`]
//! and [`Credentials`] and combine them with [`RetrievalConfig::from_settings`].

use crate::criteria::CriteriaSource;
use crate::error::{Error, Result};
use crate::lock::DEFAULT_LEASE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// Default IMAPS port.
pub const DEFAULT_TLS_PORT: u16 = 993;

/// Default plain IMAP port.
pub const DEFAULT_PLAIN_PORT: u16 = 143;

/// Default upper bound for a single assembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// What happens to retrieved messages on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Open the mailbox read-write and mark fetched messages `\Seen`.
    #[default]
    Read,
    /// Open the mailbox read-only and leave flags untouched.
    Peek,
}

impl Disposition {
    /// Whether the mailbox is opened with EXAMINE.
    #[must_use]
    pub fn read_only(self) -> bool {
        matches!(self, Disposition::Peek)
    }

    /// Whether fetched messages get `\Seen`.
    #[must_use]
    pub fn marks_seen(self) -> bool {
        matches!(self, Disposition::Read)
    }
}

impl From<&str> for Disposition {
    fn from(value: &str) -> Self {
        if value == "Read" {
            Disposition::Read
        } else {
            Disposition::Peek
        }
    }
}

impl<'de> Deserialize<'de> for Disposition {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Disposition::from(value.as_str()))
    }
}

/// Configuration for one retrieval node.
///
/// Create using [`RetrievalConfig::builder()`].
///
/// Note: The `password` field is stored as a [`SecretString`] to prevent
/// accidental logging of credentials.
#[derive(Clone)]
pub struct RetrievalConfig {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port.
    pub port: u16,
    /// Connect with TLS.
    pub use_tls: bool,
    /// Mailbox to open.
    pub mailbox: String,
    /// Read-write vs. read-only handling.
    pub disposition: Disposition,
    /// Where the search criteria come from.
    pub criteria: CriteriaSource,
    /// How long a run may hold the session lock before it counts as stale.
    pub lease: Duration,
    /// Largest message body accepted, `None` for no limit.
    pub max_message_size: Option<usize>,
    /// Timeouts applied by the IMAP client.
    pub timeouts: TimeoutConfig,
    userid: String,
    password: SecretString,
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("mailbox", &self.mailbox)
            .field("disposition", &self.disposition)
            .field("criteria", &self.criteria)
            .field("lease", &self.lease)
            .field("max_message_size", &self.max_message_size)
            .field("timeouts", &self.timeouts)
            .field("userid", &self.userid)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl RetrievalConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }

    /// Builds a configuration from a declarative node definition and its credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn from_settings(settings: NodeSettings, credentials: Credentials) -> Result<Self> {
        let mut builder = Self::builder()
            .host(settings.server)
            .use_tls(settings.use_tls)
            .disposition(settings.disposition)
            .criteria(settings.criteria)
            .userid(credentials.userid)
            .password(credentials.password.expose_secret());

        if let Some(port) = settings.port {
            builder = builder.port(port);
        }
        if let Some(mailbox) = settings.mailbox {
            builder = builder.mailbox(mailbox);
        }

        builder.build()
    }

    /// The login user id.
    #[must_use]
    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// Returns the password as a string slice.
    ///
    /// The password is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timeouts applied by the IMAP client to individual protocol steps.
///
/// The controller itself imposes no timeout besides the lock lease.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection and reading the greeting.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Declarative node definition, as stored by the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    /// IMAP server hostname.
    pub server: String,
    /// IMAP server port; defaults by TLS mode.
    #[serde(default)]
    pub port: Option<u16>,
    /// Connect with TLS.
    #[serde(rename = "useTLS", default = "default_true")]
    pub use_tls: bool,
    /// Mailbox to open.
    #[serde(rename = "box", default)]
    pub mailbox: Option<String>,
    /// `Read` or anything else.
    #[serde(default)]
    pub disposition: Disposition,
    /// Search criteria, or `_msg_` for the request's own.
    #[serde(default)]
    pub criteria: CriteriaSource,
}

fn default_true() -> bool {
    true
}

/// Login credentials, kept apart from [`NodeSettings`] by the host.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Login user id.
    pub userid: String,
    /// Login secret.
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

fn deserialize_secret<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("userid", &self.userid)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Builder for [`RetrievalConfig`].
#[derive(Default)]
pub struct RetrievalConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    use_tls: Option<bool>,
    mailbox: Option<String>,
    disposition: Option<Disposition>,
    criteria: Option<CriteriaSource>,
    lease: Option<Duration>,
    max_message_size: Option<Option<usize>>,
    timeouts: Option<TimeoutConfig>,
    userid: Option<String>,
    password: Option<SecretString>,
}

impl RetrievalConfigBuilder {
    /// Sets the IMAP server hostname (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    ///
    /// Default is 993 with TLS and 143 without.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables or disables TLS (default: enabled).
    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }

    /// Sets the mailbox (default: `INBOX`).
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the disposition (default: [`Disposition::Read`]).
    #[must_use]
    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = Some(disposition);
        self
    }

    /// Sets the criteria source (default: static `UNSEEN`).
    #[must_use]
    pub fn criteria(mut self, criteria: CriteriaSource) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Sets the lock lease (default: 5 minutes).
    #[must_use]
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Sets the maximum message size, `None` to disable the limit.
    #[must_use]
    pub fn max_message_size(mut self, max: Option<usize>) -> Self {
        self.max_message_size = Some(max);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the login user id (required).
    #[must_use]
    pub fn userid(mut self, userid: impl Into<String>) -> Self {
        self.userid = Some(userid.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<RetrievalConfig> {
        let host = required(self.host, "host")?;
        let userid = required(self.userid, "userid")?;
        let password = self.password.ok_or_else(|| Error::InvalidConfig {
            message: "password is required".into(),
        })?;

        let mailbox = self.mailbox.unwrap_or_else(|| "INBOX".to_string());
        if mailbox.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "mailbox must not be empty".into(),
            });
        }

        let lease = self.lease.unwrap_or(DEFAULT_LEASE);
        if lease.is_zero() {
            return Err(Error::InvalidConfig {
                message: "lease must be greater than zero".into(),
            });
        }

        let use_tls = self.use_tls.unwrap_or(true);
        let default_port = if use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };

        Ok(RetrievalConfig {
            host,
            port: self.port.unwrap_or(default_port),
            use_tls,
            mailbox,
            disposition: self.disposition.unwrap_or_default(),
            criteria: self.criteria.unwrap_or_default(),
            lease,
            max_message_size: self
                .max_message_size
                .unwrap_or(Some(DEFAULT_MAX_MESSAGE_SIZE)),
            timeouts: self.timeouts.unwrap_or_default(),
            userid,
            password,
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::InvalidConfig {
            message: format!("{name} is required"),
        }),
    }
}
