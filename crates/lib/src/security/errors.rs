//! Error types for identity resolution and credential checks.

use thiserror::Error;

/// Errors raised while resolving a principal or verifying credentials.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SecurityError {
    /// No user with the given name is known.
    #[error("Unknown user: {user_name}")]
    UnknownUser {
        /// The requested user name
        user_name: String,
    },

    /// No group with the given name is known.
    #[error("Unknown group: {group_name}")]
    UnknownGroup {
        /// The requested group name
        group_name: String,
    },

    /// The user asked for a group it does not belong to.
    #[error("User {user_name} is not a member of group {group_name}")]
    NotAMember {
        /// The requesting user
        user_name: String,
        /// The group that was requested
        group_name: String,
    },

    /// The principal did not name a user.
    #[error("Principal has an empty user name")]
    EmptyUserName,

    /// Password hashing failed.
    #[error("Password hashing failed: {reason}")]
    PasswordHashFailed {
        /// Description of the hashing failure
        reason: String,
    },

    /// A stored password hash could not be parsed.
    #[error("Stored credentials for {user_name} are unreadable")]
    CorruptCredentials {
        /// The user whose hash is unreadable
        user_name: String,
    },
}

impl SecurityError {
    /// Check if this error indicates an unknown user or group.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SecurityError::UnknownUser { .. } | SecurityError::UnknownGroup { .. }
        )
    }

    /// Check if this error means the caller may not act as requested.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SecurityError::NotAMember { .. })
    }

    /// Check if this error should be reported to callers as a failed login.
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            SecurityError::UnknownUser { .. }
                | SecurityError::EmptyUserName
                | SecurityError::CorruptCredentials { .. }
        )
    }
}

impl From<SecurityError> for crate::Error {
    fn from(err: SecurityError) -> Self {
        crate::Error::Security(err)
    }
}
