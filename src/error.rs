//! Error types for librarian-dl
//!
//! This module provides the error taxonomy used throughout the library:
//! - [`Error`] for coordinator, dispatch and persistence failures
//! - [`DatabaseError`] for record store failures
//! - [`ClientError`] for failures reported by a download client adapter

use crate::types::BackendKind;
use thiserror::Error;

/// Result type alias for librarian-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for download client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Main error type for librarian-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or inconsistent; the affected path is disabled
    #[error("configuration error: {message}")]
    ConfigInvalid {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "usenet.sabnzbd.api_key")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A download client rejected or failed a request
    #[error("download client error: {0}")]
    Client(#[from] ClientError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Another submission for the same book is already in flight
    #[error("duplicate submission for book {book_id}")]
    DuplicateSubmission {
        /// The book whose submission was suppressed
        book_id: String,
    },

    /// Shutdown in progress - not accepting new dispatches
    #[error("shutdown in progress: not accepting new dispatches")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not supported by the selected backend
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::ConfigInvalid`] tied to a configuration key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::ConfigInvalid {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Table or column name rejected by the generic record API
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Failures reported by a download client adapter
///
/// Adapters never panic or raise past their boundary; every failure is one of these.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Credentials were refused. Not retried until the operator fixes them.
    #[error("{backend}: authentication failed: {message}")]
    AuthFailed {
        /// Backend that refused the credentials
        backend: BackendKind,
        /// Message reported by the backend
        message: String,
    },

    /// Connection refused, reset or otherwise unreachable
    #[error("{backend}: transport error: {message}")]
    Transport {
        /// Backend that could not be reached
        backend: BackendKind,
        /// Underlying transport message
        message: String,
    },

    /// The request did not complete within the configured timeout
    #[error("{backend}: request timed out")]
    Timeout {
        /// Backend that timed out
        backend: BackendKind,
    },

    /// The backend answered with something we could not interpret
    #[error("{backend}: unexpected response: {message}")]
    Protocol {
        /// Backend that sent the response
        backend: BackendKind,
        /// What was wrong with the response
        message: String,
        /// Raw response body, kept for diagnosis
        body: Option<String>,
    },

    /// The backend explicitly refused the request (duplicate torrent, bad NZB, ...)
    #[error("{backend}: rejected: {reason}")]
    Rejected {
        /// Backend that refused the request
        backend: BackendKind,
        /// Reason given by the backend
        reason: String,
    },

    /// The backend accepted the item but it could not be located afterwards
    #[error("{backend}: no identifier found for {source_url}")]
    IdentifierNotFound {
        /// Backend that was searched
        backend: BackendKind,
        /// Source the item was submitted from
        source_url: String,
    },
}

impl ClientError {
    /// Backend the error originated from
    pub fn backend(&self) -> BackendKind {
        match self {
            ClientError::AuthFailed { backend, .. }
            | ClientError::Transport { backend, .. }
            | ClientError::Timeout { backend }
            | ClientError::Protocol { backend, .. }
            | ClientError::Rejected { backend, .. }
            | ClientError::IdentifierNotFound { backend, .. } => *backend,
        }
    }

    /// Whether this is an authorization failure that warrants a re-login
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::AuthFailed { .. })
    }

    /// Build a protocol error carrying the raw body
    pub(crate) fn protocol(
        backend: BackendKind,
        message: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        ClientError::Protocol {
            backend,
            message: message.into(),
            body: Some(body.into()),
        }
    }

    /// Classify a reqwest failure for the given backend
    pub(crate) fn from_reqwest(backend: BackendKind, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout { backend }
        } else if e.is_decode() {
            ClientError::Protocol {
                backend,
                message: e.to_string(),
                body: None,
            }
        } else if e.status().is_some_and(|s| s.as_u16() == 401 || s.as_u16() == 403) {
            ClientError::AuthFailed {
                backend,
                message: e.to_string(),
            }
        } else {
            ClientError::Transport {
                backend,
                message: e.to_string(),
            }
        }
    }

    /// Human-readable reason stored on a failed wanted item
    ///
    /// Protocol errors include the raw body so the operator can see what came back.
    pub fn failure_reason(&self) -> String {
        match self {
            ClientError::Protocol {
                body: Some(body), ..
            } if !body.is_empty() => {
                let mut excerpt: String = body.chars().take(512).collect();
                if excerpt.len() < body.len() {
                    excerpt.push_str("...");
                }
                format!("{} [{}]", self, excerpt)
            }
            _ => self.to_string(),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_shorthand_keeps_key() {
        let err = Error::config("api key required", "usenet.sabnzbd.api_key");
        match err {
            Error::ConfigInvalid { message, key } => {
                assert_eq!(message, "api key required");
                assert_eq!(key.as_deref(), Some("usenet.sabnzbd.api_key"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn client_error_reports_its_backend() {
        let errors = vec![
            ClientError::AuthFailed {
                backend: BackendKind::Deluge,
                message: "bad password".into(),
            },
            ClientError::Timeout {
                backend: BackendKind::Deluge,
            },
            ClientError::IdentifierNotFound {
                backend: BackendKind::Deluge,
                source_url: "magnet:?xt=urn:btih:abc".into(),
            },
        ];
        for err in errors {
            assert_eq!(err.backend(), BackendKind::Deluge);
        }
    }

    #[test]
    fn only_auth_failures_are_auth() {
        assert!(
            ClientError::AuthFailed {
                backend: BackendKind::Transmission,
                message: "401".into()
            }
            .is_auth()
        );
        assert!(
            !ClientError::Rejected {
                backend: BackendKind::Transmission,
                reason: "duplicate".into()
            }
            .is_auth()
        );
    }

    #[test]
    fn failure_reason_includes_protocol_body() {
        let err = ClientError::protocol(BackendKind::Sabnzbd, "missing status", "<html>oops</html>");
        let reason = err.failure_reason();
        assert!(reason.contains("missing status"));
        assert!(reason.contains("<html>oops</html>"));
    }

    #[test]
    fn failure_reason_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let err = ClientError::protocol(BackendKind::Nzbget, "bad xml", body);
        let reason = err.failure_reason();
        assert!(reason.ends_with("...]"));
        assert!(reason.len() < 700);
    }

    #[test]
    fn error_display_mentions_backend() {
        let err = Error::from(ClientError::Rejected {
            backend: BackendKind::Transmission,
            reason: "torrent-duplicate".into(),
        });
        let text = err.to_string();
        assert!(text.contains("Transmission"), "got {text}");
        assert!(text.contains("torrent-duplicate"));
    }
}
