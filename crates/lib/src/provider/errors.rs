//! Error types for session persistence.

use thiserror::Error;

/// Errors reported by [`SessionProvider`](super::SessionProvider) implementations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No session with the given uuid is stored.
    #[error("Session not found: {uuid}")]
    SessionNotFound {
        /// The uuid that was looked up
        uuid: String,
    },

    /// The session is closed and may no longer change.
    #[error("Session {uuid} is closed")]
    SessionClosed {
        /// The uuid of the closed session
        uuid: String,
    },

    /// A composite provider was configured without a writable member.
    #[error("No writable session provider configured")]
    NoWritableProvider,

    /// A record is missing data the operation needs.
    #[error("Invalid session record: {reason}")]
    InvalidRecord {
        /// What is wrong with the record
        reason: String,
    },

    /// The provider cannot reach its backing resource.
    #[error("Session provider {provider} unavailable: {reason}")]
    Unavailable {
        /// Name of the provider
        provider: String,
        /// Description of the failure
        reason: String,
    },

    /// SQL database error from sqlx.
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("SQL error: {reason}")]
    SqlxError {
        /// Description of the failure, including context
        reason: String,
        /// The underlying sqlx error, if any
        #[source]
        source: Option<sqlx::Error>,
    },
}

impl ProviderError {
    /// Check if this error indicates a session was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::SessionNotFound { .. })
    }

    /// Check if this error was caused by a closed session.
    pub fn is_closed(&self) -> bool {
        matches!(self, ProviderError::SessionClosed { .. })
    }

    /// Check if this error is a misconfiguration rather than a runtime failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, ProviderError::NoWritableProvider)
    }

    /// Check if this error came from the backing store.
    pub fn is_io_error(&self) -> bool {
        match self {
            ProviderError::Unavailable { .. } => true,
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            ProviderError::SqlxError { .. } => true,
            _ => false,
        }
    }

    /// Get the session uuid if this error is about a specific session.
    pub fn uuid(&self) -> Option<&str> {
        match self {
            ProviderError::SessionNotFound { uuid } | ProviderError::SessionClosed { uuid } => {
                Some(uuid)
            }
            _ => None,
        }
    }
}

impl From<ProviderError> for crate::Error {
    fn from(err: ProviderError) -> Self {
        crate::Error::Provider(err)
    }
}
