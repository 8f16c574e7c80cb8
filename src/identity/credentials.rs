use std::fmt;

use crate::domain::{StoreError, StoreResult};

const MAX_HANDLE_CHARS: usize = 64;

/// Stored bcrypt hash of a user's password. Never holds plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash a plaintext password with a fresh salt
    pub fn new(plaintext: &str, cost: u32) -> StoreResult<Self> {
        Ok(Self(bcrypt::hash(plaintext, cost)?))
    }

    /// Wrap a hash loaded from the database
    pub fn from_stored(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify plaintext against the stored hash - constant-time via bcrypt
    pub fn verify(&self, plaintext: &str) -> bool {
        bcrypt::verify(plaintext, &self.0).unwrap_or(false)
    }
}

// Keep hashes out of debug logs
impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Handles are matched exactly (case-sensitive), so whitespace is not allowed
/// anywhere in them.
pub fn validate_handle(handle: &str) -> StoreResult<&str> {
    if handle.is_empty()
        || handle.chars().count() > MAX_HANDLE_CHARS
        || handle.chars().any(char::is_whitespace)
    {
        return Err(StoreError::Validation("username"));
    }
    Ok(handle)
}

pub fn validate_secret(secret: &str) -> StoreResult<&str> {
    if secret.is_empty() {
        return Err(StoreError::Validation("password"));
    }
    Ok(secret)
}
