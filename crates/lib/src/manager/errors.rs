//! Error taxonomy reported to session callers.

use thiserror::Error;

/// Failures of session lifecycle operations.
///
/// `SessionRemoved` and `SessionTimedOut` are always distinguishable: the
/// first means the uuid never existed or was closed on purpose, the second that
/// it expired. Both call for re-authentication.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credentials were invalid or could not be verified.
    #[error("Authentication failed for {user_name}: {reason}")]
    AuthenticationFailure {
        /// The user that tried to log in
        user_name: String,
        /// Why authentication failed
        reason: String,
    },

    /// The caller lacks the privilege for the operation.
    #[error("Security violation: {reason}")]
    SecurityViolation {
        /// What was refused
        reason: String,
    },

    /// The session never existed or was explicitly closed.
    #[error("Session removed: {uuid}")]
    SessionRemoved {
        /// The requested uuid
        uuid: String,
    },

    /// The session existed but expired through its idle or time-to-live limit.
    #[error("Session timed out: {uuid}")]
    SessionTimedOut {
        /// The requested uuid
        uuid: String,
    },

    /// The session provider failed.
    #[error("Session provider failed during {operation} for {uuid}")]
    ProviderFailure {
        /// The manager operation that was running
        operation: &'static str,
        /// The session concerned
        uuid: String,
        /// The underlying failure
        #[source]
        source: Box<crate::Error>,
    },

    /// An internal failure, with details withheld from the caller.
    #[error("Internal error during {operation}")]
    Internal {
        /// The operation that failed
        operation: &'static str,
    },
}

impl SessionError {
    pub fn is_removed(&self) -> bool {
        matches!(self, SessionError::SessionRemoved { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, SessionError::SessionTimedOut { .. })
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(self, SessionError::SecurityViolation { .. })
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, SessionError::AuthenticationFailure { .. })
    }

    pub fn is_provider_failure(&self) -> bool {
        matches!(self, SessionError::ProviderFailure { .. })
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, SessionError::Internal { .. })
    }

    /// Check if the caller has to log in again.
    pub fn requires_reauthentication(&self) -> bool {
        self.is_removed() || self.is_timed_out()
    }

    /// Get the session uuid if this error is about a specific session.
    pub fn uuid(&self) -> Option<&str> {
        match self {
            SessionError::SessionRemoved { uuid }
            | SessionError::SessionTimedOut { uuid }
            | SessionError::ProviderFailure { uuid, .. } => Some(uuid),
            _ => None,
        }
    }
}

impl From<SessionError> for crate::Error {
    fn from(err: SessionError) -> Self {
        crate::Error::Session(err)
    }
}

/// Result of [`SessionManager::close`](super::SessionManager::close).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No session with that uuid exists.
    NotFound,
    /// The session was closed before this call.
    AlreadyClosed,
    /// The reference count was decremented but is still positive.
    StillReferenced(i32),
    /// The session was closed and evicted.
    Removed,
}

impl CloseOutcome {
    /// Integer form reported to remote callers.
    ///
    /// A positive value is the remaining reference count; `-1` means removed,
    /// `-2` not found and `-3` already closed.
    pub fn code(self) -> i32 {
        match self {
            CloseOutcome::StillReferenced(count) => count,
            CloseOutcome::Removed => -1,
            CloseOutcome::NotFound => -2,
            CloseOutcome::AlreadyClosed => -3,
        }
    }

    pub fn is_removed(self) -> bool {
        self == CloseOutcome::Removed
    }
}
