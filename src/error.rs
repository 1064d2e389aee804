// Error handling module
// Defines the session error taxonomy shared by the refresh coordinator,
// the HTTP client and the session context.

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// `Clone` because a single renewal outcome is fanned out to every caller
/// waiting on the same in-flight refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Transport-level failure talking to the identity service
    #[error("network failure: {0}")]
    Network(String),

    /// The identity service explicitly refused the credentials
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// The session store could not persist or yielded a torn record
    #[error("session storage failure: {0}")]
    Storage(String),

    /// The backing service answered a request with a non-success status
    #[error("service error: {status} - {message}")]
    Service { status: u16, message: String },

    /// The session could not be recovered; the caller must re-authenticate
    #[error("session expired")]
    SessionExpired,
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AuthError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "network failure: connection refused");

        let err = AuthError::Rejected("Token is blacklisted".to_string());
        assert_eq!(err.to_string(), "credentials rejected: Token is blacklisted");

        let err = AuthError::Service {
            status: 404,
            message: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "service error: 404 - not found");

        let err = AuthError::SessionExpired;
        assert_eq!(err.to_string(), "session expired");
    }

    #[test]
    fn test_errors_are_comparable_after_fanout() {
        let a = AuthError::Rejected("refused".to_string());
        let b = a.clone();
        assert_eq!(a, b);
    }
}
