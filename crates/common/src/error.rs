//! Error taxonomy shared by the trees, the request queue, and the overlay.

use thiserror::Error;

/// Errors surfaced by tree and overlay operations.
///
/// Remote failures keep their HTTP status so callers can distinguish
/// transient (5xx, transport) from permanent (4xx) conditions. A `status`
/// of `None` means the request never produced a response (connect/timeout).
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote error (status {status:?}): {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("queue error: {0}")]
    Queue(String),
}

impl TreeError {
    /// Remote status code, when the error is a remote one with a response.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            TreeError::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a retry against the remote can plausibly succeed.
    ///
    /// Transport failures and 5xx responses are transient; everything else
    /// (including local errors) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            TreeError::Remote { status: None, .. } => true,
            TreeError::Remote {
                status: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TreeError {
    fn from(err: reqwest::Error) -> Self {
        TreeError::Remote {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for TreeError {
    fn from(err: sqlx::Error) -> Self {
        TreeError::Queue(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;
