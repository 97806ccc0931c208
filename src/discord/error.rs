//! Messaging platform error types.
//!
//! Errors are categorized by [`PlatformErrorKind`] so delivery can decide what
//! to do next:
//!
//! - **RateLimited** (HTTP 429) is the only kind that is retried, after the
//!   server-provided `retry_after` hint when there is one.
//! - **NotFound** (HTTP 404) means the channel or message is gone. Deletes treat
//!   it as success.
//! - **Permanent** (other 4xx) will not improve by retrying.
//! - **Transient** (5xx, network) may clear up later, but is not retried inline.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    RateLimited { retry_after: Option<Duration> },
    NotFound,
    Permanent,
    Transient,
}

impl PlatformErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, PlatformErrorKind::RateLimited { .. })
    }

    /// Categorizes an HTTP status code.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => PlatformErrorKind::RateLimited { retry_after },
            404 => PlatformErrorKind::NotFound,
            500..=599 => PlatformErrorKind::Transient,
            _ => PlatformErrorKind::Permanent,
        }
    }
}

/// A messaging platform API error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,

    /// The HTTP status code, if the request got that far.
    pub status_code: Option<u16>,

    pub message: String,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "Discord API error (HTTP {code}): {}", self.message),
            None => write!(f, "Discord API error: {}", self.message),
        }
    }
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        PlatformError {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        PlatformError {
            kind: PlatformErrorKind::from_status(status, retry_after),
            status_code: Some(status),
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        PlatformError {
            kind: PlatformErrorKind::RateLimited { retry_after },
            status_code: Some(429),
            message: "rate limited".to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        PlatformError::from_status(404, None, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        PlatformError::new(PlatformErrorKind::Permanent, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        PlatformError::new(PlatformErrorKind::Transient, message)
    }

    /// Categorizes a transport-level failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return PlatformError::from_status(status.as_u16(), None, err.to_string());
        }
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            PlatformErrorKind::Transient
        } else {
            PlatformErrorKind::Permanent
        };
        PlatformError::new(kind, err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == PlatformErrorKind::NotFound
    }

    /// The server's retry hint, for rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            PlatformErrorKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_categorization() {
        let hint = Some(Duration::from_millis(1500));
        assert_eq!(
            PlatformErrorKind::from_status(429, hint),
            PlatformErrorKind::RateLimited { retry_after: hint }
        );
        assert_eq!(PlatformErrorKind::from_status(404, None), PlatformErrorKind::NotFound);
        assert_eq!(PlatformErrorKind::from_status(403, None), PlatformErrorKind::Permanent);
        assert_eq!(PlatformErrorKind::from_status(400, None), PlatformErrorKind::Permanent);
        assert_eq!(PlatformErrorKind::from_status(502, None), PlatformErrorKind::Transient);
    }

    #[test]
    fn only_rate_limits_are_retriable() {
        assert!(PlatformErrorKind::RateLimited { retry_after: None }.is_retriable());
        assert!(!PlatformErrorKind::Transient.is_retriable());
        assert!(!PlatformErrorKind::Permanent.is_retriable());
        assert!(!PlatformErrorKind::NotFound.is_retriable());
    }

    #[test]
    fn display_includes_status() {
        let err = PlatformError::from_status(403, None, "Missing Access");
        assert_eq!(err.to_string(), "Discord API error (HTTP 403): Missing Access");
        assert_eq!(
            PlatformError::transient("connection reset").to_string(),
            "Discord API error: connection reset"
        );
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let hint = Some(Duration::from_secs(2));
        assert_eq!(PlatformError::rate_limited(hint).retry_after(), hint);
        assert_eq!(PlatformError::permanent("x").retry_after(), None);
    }
}
