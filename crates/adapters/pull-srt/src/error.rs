//! Error types for the SRT pull adapter

use thiserror::Error;

/// Result type alias for pull-session operations
pub type Result<T> = std::result::Result<T, PullError>;

/// Errors surfaced by a pull session and its collaborators
///
/// Malformed container data never appears here: the demuxer absorbs it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PullError {
    /// Malformed or unsupported source locator
    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator {
        /// Locator as given (secrets are not redacted here, callers log the redacted form)
        locator: String,
        /// What was wrong with it
        reason: String,
    },

    /// Socket allocation, name resolution or handshake failure
    #[error("Connect failure: {reason}")]
    ConnectFailure {
        /// Failure detail
        reason: String,
    },

    /// Remote peer closed the connection
    #[error("Connection closed by remote")]
    ConnectionClosed,

    /// Mid-stream receive failure
    #[error("Receive error: {0}")]
    Receive(String),

    /// Cycle invoked while no connection is established
    #[error("Session is not connected")]
    NotConnected,

    /// Reconnect ceiling exceeded
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts counted by the policy
        attempts: u32,
    },

    /// Session has been terminated and accepts no further transitions
    #[error("Session terminated")]
    Terminated,

    /// In-flight operation abandoned by a stop/terminate request
    #[error("Operation cancelled")]
    Cancelled,
}

impl PullError {
    pub(crate) fn invalid_locator(locator: &str, reason: impl Into<String>) -> Self {
        PullError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn connect(reason: impl Into<String>) -> Self {
        PullError::ConnectFailure {
            reason: reason.into(),
        }
    }

    /// Whether the reconnect policy should handle this error
    ///
    /// Configuration defects and terminal states are not worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PullError::ConnectFailure { .. }
                | PullError::ConnectionClosed
                | PullError::Receive(_)
                | PullError::NotConnected
        )
    }
}
