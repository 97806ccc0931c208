//! GitHub API error types.
//!
//! Entity-state queries fail in three ways that the reconciler treats the
//! same (error counted, key kept, retried next pass) but logs differently:
//!
//! - **Transient**: 5xx, rate limits, network trouble.
//! - **NotFound**: the repository or pull request is gone, or the token
//!   cannot see it.
//! - **Permanent**: any other 4xx, malformed keys.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    Transient,
    NotFound,
    Permanent,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {code}): {}", self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    pub fn new(kind: GitHubErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Permanent, message)
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status_code: Some(404),
            ..Self::new(GitHubErrorKind::NotFound, message)
        }
    }

    /// Categorizes an octocrab error by status code, falling back to the
    /// message text when no code can be recovered.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let status_code = extract_status_code(&message);
        let kind = categorize(status_code, &message);
        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

fn categorize(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    match status_code {
        Some(404) => GitHubErrorKind::NotFound,
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None if is_network_error(message) => GitHubErrorKind::Transient,
        None => GitHubErrorKind::Permanent,
    }
}

/// Pulls an HTTP status code out of an octocrab error message.
///
/// octocrab does not expose the status uniformly across its error variants,
/// so this reads the rendered message. `None` leads to the conservative
/// message-based categorization.
fn extract_status_code(message: &str) -> Option<u16> {
    if let Some(idx) = message.find("status: ") {
        let digits: String = message[idx + 8..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    let lower = message.to_lowercase();
    if lower.contains("not found") {
        return Some(404);
    }
    [401, 403, 422, 429, 500, 502, 503]
        .into_iter()
        .find(|code| message.contains(&code.to_string()))
}

fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "timed out", "connection", "network", "dns"]
        .iter()
        .any(|needle| lower.contains(needle))
}
