//! Argon2id password storage.

use std::collections::HashMap;
use std::sync::RwLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core},
};

use super::{Authenticator, SecurityError};
use crate::Result;

/// Hash a password using Argon2id, returning the PHC string.
pub fn hash_password(password: impl AsRef<str>) -> Result<String> {
    let salt = SaltString::generate(&mut rand_core::OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_ref().as_bytes(), &salt)
        .map_err(|e| SecurityError::PasswordHashFailed {
            reason: e.to_string(),
        })?
        .to_string();

    Ok(hash)
}

/// Verify a password against a PHC hash.
///
/// Returns `Ok(false)` on mismatch and an error only if the hash is unreadable.
pub fn verify_password(
    user_name: &str,
    password: impl AsRef<str>,
    password_hash: impl AsRef<str>,
) -> Result<bool> {
    let parsed = PasswordHash::new(password_hash.as_ref()).map_err(|_| {
        SecurityError::CorruptCredentials {
            user_name: user_name.to_string(),
        }
    })?;

    Ok(Argon2::default()
        .verify_password(password.as_ref().as_bytes(), &parsed)
        .is_ok())
}

/// In-memory credential store keyed by user name.
#[derive(Debug, Default)]
pub struct PasswordStore {
    hashes: RwLock<HashMap<String, String>>,
}

impl PasswordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the password for `user_name`.
    pub fn set_password(&self, user_name: &str, password: &str) -> Result<()> {
        let hash = hash_password(password)?;
        self.hashes
            .write()
            .unwrap()
            .insert(user_name.to_string(), hash);
        Ok(())
    }

    /// Remove stored credentials. Returns whether the user had any.
    pub fn remove(&self, user_name: &str) -> bool {
        self.hashes.write().unwrap().remove(user_name).is_some()
    }
}

impl Authenticator for PasswordStore {
    fn check_password(&self, user_name: &str, password: &str) -> Result<bool> {
        let hash = match self.hashes.read().unwrap().get(user_name) {
            Some(hash) => hash.clone(),
            None => return Ok(false),
        };
        verify_password(user_name, password, hash)
    }
}
