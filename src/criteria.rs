//! Search criteria and where they come from.
//!
//! Criteria travel to the server as the tail of one `UID SEARCH` command line,
//! so every expression is checked for line breaks, NUL and trailing literal
//! markers before it is accepted.

use crate::context::RequestContext;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Configuration value selecting request-supplied criteria.
pub const FROM_REQUEST_SENTINEL: &str = "_msg_";

/// A raw IMAP search expression, e.g. `UNSEEN` or `FROM "alice" SINCE 1-Jan-2025`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria(String);

impl SearchCriteria {
    /// Wraps an expression. Blank input becomes [`SearchCriteria::all`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCriteria`] if the expression contains CR, LF or
    /// NUL, or ends in a literal marker such as `{5}`.
    pub fn new(expression: impl Into<String>) -> Result<Self> {
        let expression = expression.into();

        if expression.contains(['\r', '\n', '\0']) {
            return Err(Error::InvalidCriteria {
                criteria: expression,
                reason: "line breaks and NUL are not allowed",
            });
        }

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(Self::all());
        }
        if ends_with_literal(trimmed) {
            return Err(Error::InvalidCriteria {
                criteria: expression,
                reason: "literal strings are not supported",
            });
        }

        if trimmed.len() == expression.len() {
            Ok(Self(expression))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// The empty filter: every message in the mailbox.
    #[must_use]
    pub fn all() -> Self {
        Self("ALL".to_string())
    }

    /// Only messages without `\Seen`.
    #[must_use]
    pub fn unseen() -> Self {
        Self("UNSEEN".to_string())
    }

    /// The expression as sent to the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds criteria from a JSON value.
    ///
    /// Strings are raw expressions. Arrays are token lists (`["UNSEEN", ["FROM", "bob"]]`)
    /// that get flattened and joined with spaces; a token that is not a plain
    /// atom is sent as a quoted string. `null` and other values yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCriteria`] under the same rules as [`SearchCriteria::new`].
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::String(s) => Self::new(s.as_str()).map(Some),
            Value::Array(_) => {
                let mut tokens = Vec::new();
                flatten_tokens(value, &mut tokens);
                Self::new(tokens.join(" ")).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self::all()
    }
}

impl std::fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{N}` or `{N+}` at the end of a line announces a literal the client never sends.
fn ends_with_literal(expression: &str) -> bool {
    let Some(body) = expression.strip_suffix('}') else {
        return false;
    };
    let Some(open) = body.rfind('{') else {
        return false;
    };
    let count = &body[open + 1..];
    let count = count.strip_suffix('+').unwrap_or(count);
    !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit())
}

/// Characters that end an IMAP atom. `*` stays unquoted for sequence sets like `1:*`.
fn needs_quoting(token: &str) -> bool {
    token.chars().any(|c| {
        matches!(c, '(' | ')' | '{' | '"' | '\\' | ']' | '%') || c.is_whitespace() || c.is_control()
    })
}

fn quote(token: &str) -> String {
    let mut quoted = String::with_capacity(token.len() + 2);
    quoted.push('"');
    for c in token.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn flatten_tokens(value: &Value, tokens: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten_tokens(item, tokens)),
        Value::String(s) if s.trim().is_empty() => {}
        Value::String(s) if needs_quoting(s) => tokens.push(quote(s)),
        Value::String(s) => tokens.push(s.clone()),
        Value::Number(n) => tokens.push(n.to_string()),
        Value::Bool(_) | Value::Null | Value::Object(_) => {}
    }
}

/// Where a run takes its search criteria from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriteriaSource {
    /// The same configured criteria for every run.
    Static(SearchCriteria),
    /// The `criteria` field of the triggering request, `ALL` when absent.
    FromRequest,
}

impl CriteriaSource {
    /// Resolves the criteria for one run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCriteria`] if the request carries criteria that
    /// cannot be sent.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<SearchCriteria> {
        match self {
            CriteriaSource::Static(criteria) => Ok(criteria.clone()),
            CriteriaSource::FromRequest => Ok(ctx.criteria()?.unwrap_or_default()),
        }
    }

    /// Parses the configured string form. [`FROM_REQUEST_SENTINEL`] selects
    /// request-supplied criteria.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCriteria`] for expressions [`SearchCriteria::new`] rejects.
    pub fn parse(configured: &str) -> Result<Self> {
        if configured.trim() == FROM_REQUEST_SENTINEL {
            Ok(CriteriaSource::FromRequest)
        } else {
            SearchCriteria::new(configured).map(CriteriaSource::Static)
        }
    }
}

impl Default for CriteriaSource {
    fn default() -> Self {
        CriteriaSource::Static(SearchCriteria::unseen())
    }
}

impl<'de> Deserialize<'de> for CriteriaSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;

        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::String(s) => CriteriaSource::parse(s).map_err(D::Error::custom),
            Value::Null => Ok(CriteriaSource::default()),
            other => SearchCriteria::from_value(other)
                .map_err(D::Error::custom)?
                .map(CriteriaSource::Static)
                .ok_or_else(|| D::Error::custom("criteria must be a string or a list")),
        }
    }
}
