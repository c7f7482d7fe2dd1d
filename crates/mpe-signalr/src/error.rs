//! SignalR connection error types.

use std::time::Duration;
use thiserror::Error;

/// Where a failure originated: the local client stack or the remote hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Local failure: connection refused, DNS, timeout, parse.
    Client,
    /// Server returned a non-2xx status or an error frame.
    Remote,
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalrError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("websocket upgrade rejected with status {status}")]
    UpgradeRejected { status: u16 },

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("websocket handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("malformed negotiate response: {0}")]
    MalformedNegotiate(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("credential not usable as a header value: {0}")]
    InvalidCredential(String),

    #[error("challenge solver failed: {0}")]
    Challenge(String),
}

impl SignalrError {
    /// Classify the failure origin per the error-handling contract.
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Self::HttpStatus { .. } | Self::UpgradeRejected { .. } | Self::MalformedNegotiate(_) => {
                ErrorOrigin::Remote
            }
            _ => ErrorOrigin::Client,
        }
    }

    /// Fatal errors short-circuit the retry harness.
    ///
    /// An upgrade rejected with 401/403 means the challenge credentials are
    /// no longer accepted; retrying with the same cookie cannot succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Url(_) | Self::InvalidCredential(_) | Self::Challenge(_) => true,
            Self::UpgradeRejected { status } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    /// HTTP-level status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::UpgradeRejected { status } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Owned, cloneable error summary carried inside emitted events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub origin: ErrorOrigin,
    pub code: Option<u16>,
    pub message: String,
}

impl From<&SignalrError> for ErrorDetail {
    fn from(error: &SignalrError) -> Self {
        Self {
            origin: error.origin(),
            code: error.status_code(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{} {}] {}", self.origin, code, self.message),
            None => write!(f, "[{}] {}", self.origin, self.message),
        }
    }
}

pub type SignalrResult<T> = Result<T, SignalrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_classification() {
        let remote = SignalrError::HttpStatus {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(remote.origin(), ErrorOrigin::Remote);

        let client = SignalrError::HandshakeTimeout(Duration::from_secs(10));
        assert_eq!(client.origin(), ErrorOrigin::Client);
    }

    #[test]
    fn test_auth_rejection_is_fatal() {
        assert!(SignalrError::UpgradeRejected { status: 403 }.is_fatal());
        assert!(SignalrError::UpgradeRejected { status: 401 }.is_fatal());
        assert!(!SignalrError::UpgradeRejected { status: 503 }.is_fatal());
    }

    #[test]
    fn test_detail_carries_status_code() {
        let error = SignalrError::HttpStatus {
            status: 500,
            body: String::new(),
        };
        let detail = ErrorDetail::from(&error);
        assert_eq!(detail.code, Some(500));
        assert_eq!(detail.origin, ErrorOrigin::Remote);
    }
}
