//!
//! Tether: server-side login sessions for authenticated services.
//! This library provides the session model, the session cache, pluggable session
//! providers and the manager that ties them together.
//!
//! ## Core Concepts
//!
//! * **Records (`session::SessionRecord`)**: The durable description of one login, identified by a
//!   numeric id and an opaque uuid.
//! * **Contexts (`session::SessionContext`)**: Cache-resident security snapshots built from a record
//!   plus the group and privilege data returned by a `SecurityResolver`.
//! * **Cache (`cache::SessionCache`)**: A dual-indexed (id and uuid) concurrent store of contexts.
//! * **Providers (`provider::SessionProvider`)**: Pluggable persistence strategies:
//!     * **InMemoryProvider**: Process-local storage with a bounded closed-session cache.
//!     * **SqlxProvider**: Durable storage in SQLite or PostgreSQL (requires the "sqlite" or "postgres" feature).
//!     * **CompositeProvider**: An ordered chain of providers with ownership-aware routing.
//! * **Manager (`manager::SessionManager`)**: Session lifecycle orchestration, reference counting,
//!   timeouts and per-session environment storage.
//! * **Service (`service::SessionService`)**: The externally callable operation set.

pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod manager;
pub mod provider;
pub mod security;
pub mod service;
pub mod session;

pub use cache::SessionCache;
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use config::SessionSettings;
pub use manager::{CloseOutcome, SessionError, SessionManager};
pub use provider::{ProviderError, SessionProvider};
pub use security::{Principal, SecurityError};
pub use service::SessionService;
pub use session::{Count, SessionContext, SessionRecord};

/// Result type used throughout the Tether library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Tether library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured session lifecycle errors from the manager module
    #[error(transparent)]
    Session(manager::SessionError),

    /// Structured persistence errors from the provider module
    #[error(transparent)]
    Provider(provider::ProviderError),

    /// Structured identity and credential errors from the security module
    #[error(transparent)]
    Security(security::SecurityError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Session(_) => "manager",
            Error::Provider(_) => "provider",
            Error::Security(_) => "security",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Session(session_err) => session_err.is_removed(),
            Error::Provider(provider_err) => provider_err.is_not_found(),
            Error::Security(security_err) => security_err.is_not_found(),
        }
    }

    /// Check if the caller's session was explicitly closed or never existed.
    pub fn is_session_removed(&self) -> bool {
        matches!(self, Error::Session(session_err) if session_err.is_removed())
    }

    /// Check if the caller's session expired through idle or time-to-live limits.
    pub fn is_session_timed_out(&self) -> bool {
        matches!(self, Error::Session(session_err) if session_err.is_timed_out())
    }

    /// Check if this error indicates the caller lacks a privilege.
    pub fn is_security_violation(&self) -> bool {
        match self {
            Error::Session(session_err) => session_err.is_security_violation(),
            Error::Security(security_err) => security_err.is_permission_denied(),
            _ => false,
        }
    }

    /// Check if this error is authentication-related.
    pub fn is_authentication_error(&self) -> bool {
        match self {
            Error::Session(session_err) => session_err.is_authentication_failure(),
            Error::Security(security_err) => security_err.is_authentication_error(),
            _ => false,
        }
    }

    /// Check if this error is persistence-related.
    pub fn is_provider_error(&self) -> bool {
        match self {
            Error::Provider(_) => true,
            Error::Session(session_err) => session_err.is_provider_failure(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Provider(provider_err) => provider_err.is_io_error(),
            _ => false,
        }
    }
}
