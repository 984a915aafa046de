use thiserror::Error;

use crate::store::StorageError;

/// Message shown when the backend could not be reached at all.
pub const NETWORK_MESSAGE: &str = "Unable to reach the server. Please try again.";

/// The single error type returned by every session operation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No response was received (connection failure, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a 4xx status.
    #[error("request rejected with status {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected { status: u16, message: Option<String> },

    /// The backend answered with a 5xx status.
    #[error("server error with status {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Server { status: u16, message: Option<String> },

    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no authenticated session")]
    NotAuthenticated,

    #[error("session has already been bootstrapped")]
    AlreadyBootstrapped,

    /// A newer request of the same kind started (or the session ended) while
    /// this one was in flight; its response was discarded.
    #[error("response superseded by a newer request")]
    Superseded,
}

impl AuthError {
    /// Failures worth retrying: nothing definitive was heard from the backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_) | AuthError::Server { .. })
    }

    /// The backend said the credentials are not (or no longer) acceptable.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Rejected { status: 401, .. })
    }

    /// The backend explicitly refused the credentials (401/403) or answered
    /// with something that is not a user. Only these end a stored session.
    pub fn is_session_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::Rejected { status: 401 | 403, .. } | AuthError::InvalidResponse(_)
        )
    }

    /// Login was refused because the account's email is not verified yet.
    pub fn is_unverified_email(&self) -> bool {
        matches!(self, AuthError::Rejected { status: 403, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { status, .. } | AuthError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The message the backend attached to its error response, if any.
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            AuthError::Rejected { message, .. } | AuthError::Server { message, .. } => {
                message.as_deref().filter(|m| !m.trim().is_empty())
            }
            _ => None,
        }
    }

    /// Text suitable for showing to the user: the backend's own message when it
    /// sent one, a generic network message when nothing was received, and
    /// `fallback` otherwise.
    pub fn user_message(&self, fallback: &str) -> String {
        if let Some(message) = self.backend_message() {
            return message.to_string();
        }
        match self {
            AuthError::Network(_) => NETWORK_MESSAGE.to_string(),
            _ => fallback.to_string(),
        }
    }
}
