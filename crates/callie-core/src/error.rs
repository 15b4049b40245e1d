//! Error type shared by every callie crate.
//!
//! Callers branch on [`CallieError::kind`] and [`CallieError::is_retryable`]
//! rather than matching on message text.

use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = CallieError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CallieError {
    /// Upstream service failed: non-2xx response, malformed body, or transport error.
    /// `status` is `None` when the request never produced an HTTP response.
    #[error("{service}: {message}")]
    Vendor {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Vendor,
    Timeout,
    Config,
    Validation,
}

impl CallieError {
    pub fn vendor(service: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Vendor {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// Transport-level failure (DNS, connect, reset) with no HTTP status.
    pub fn transport(service: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::vendor(service, None, format!("request failed: {err}"))
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vendor { .. } => ErrorKind::Vendor,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::Config,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Vendor { status: None, .. } => true,
            Self::Vendor {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            Self::Timeout { .. } => true,
            Self::Config(_) | Self::Validation(_) => false,
        }
    }

    /// HTTP status attached to a vendor error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Vendor { status, .. } => *status,
            _ => None,
        }
    }
}
