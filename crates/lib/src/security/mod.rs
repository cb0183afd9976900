//! Identity resolution and credential checks.
//!
//! The session subsystem does not own users, groups or passwords. It consumes
//! them through two seams:
//!
//! * [`SecurityResolver`]: turns a [`Principal`] into [`SecurityDetails`]
//!   (group membership, admin privileges, permission snapshot).
//! * [`Authenticator`]: verifies login credentials.
//!
//! [`Directory`] and [`PasswordStore`] are in-process implementations of both.

mod directory;
pub mod errors;
mod password;
mod types;

use async_trait::async_trait;

use crate::Result;

pub use directory::{Directory, DirectoryGroup, DirectoryUser};
pub use errors::SecurityError;
pub use password::{PasswordStore, hash_password, verify_password};
pub use types::{AdminPrivilege, Permissions, Principal, SecurityDetails};

/// Resolves the security context of a principal.
///
/// Implementations are consulted on every session creation, validated update
/// and reload, so group or privilege changes take effect at those points.
#[async_trait]
pub trait SecurityResolver: Send + Sync {
    /// Resolve `principal` into its security details.
    ///
    /// Fails with [`SecurityError::UnknownUser`] or [`SecurityError::UnknownGroup`]
    /// for unknown names and [`SecurityError::NotAMember`] when the principal asks
    /// for a group it may not act in.
    async fn resolve(&self, principal: &Principal) -> Result<SecurityDetails>;
}

/// Verifies login credentials.
///
/// Verification is CPU-bound, so callers run it on a blocking worker.
pub trait Authenticator: Send + Sync {
    /// Returns `Ok(true)` if `password` is valid for `user_name`.
    ///
    /// Unknown users yield `Ok(false)` so callers cannot probe for names.
    fn check_password(&self, user_name: &str, password: &str) -> Result<bool>;
}
