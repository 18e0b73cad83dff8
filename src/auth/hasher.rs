//! Salted PBKDF2-HMAC-SHA256 credential hashing.
//!
//! Hashes are stored as PHC strings (`$pbkdf2-sha256$i=<rounds>,l=32$<salt>$<hash>`)
//! so the salt and work factor travel with the hash and a change of the
//! configured rounds never invalidates existing accounts.

use pbkdf2::password_hash::rand_core::OsRng;
use pbkdf2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use std::sync::Arc;
use thiserror::Error;

/// Default PBKDF2 iteration count (OWASP 2023 recommendation for HMAC-SHA256).
pub const DEFAULT_HASH_ROUNDS: u32 = 600_000;

/// Lowest work factor accepted from configuration.
pub const MIN_HASH_ROUNDS: u32 = 100_000;

/// Derived key length in bytes.
const OUTPUT_LEN: usize = 32;

/// Secret hashed once per hasher to produce the decoy used by [`CredentialHasher::dummy_verify`].
const DECOY_SECRET: &str = "subtrack-decoy-credential";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("credential must not be empty")]
    InvalidInput,
    #[error("stored credential hash is not a recognizable PHC string")]
    CorruptHash,
    #[error("credential hashing failed: {0}")]
    Internal(String),
}

/// One-way credential hasher with a process-wide work factor.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    rounds: u32,
    /// Hash of [`DECOY_SECRET`] at `rounds`, computed up front so the first
    /// unknown-email sign-in costs the same as every later one.
    decoy: Arc<str>,
}

impl CredentialHasher {
    /// Runs one full hash to prepare the decoy.
    pub fn new(rounds: u32) -> Self {
        let decoy = derive(rounds, DECOY_SECRET).unwrap_or_else(|e| {
            tracing::warn!(rounds, error = %e, "Failed to prepare decoy credential hash");
            String::new()
        });
        Self {
            rounds,
            decoy: Arc::from(decoy),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Hash a plaintext credential with a fresh random salt.
    pub fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        derive(self.rounds, plaintext)
    }

    /// Check a plaintext credential against a stored PHC hash.
    ///
    /// Returns `Ok(false)` on mismatch. The digest comparison is constant-time.
    pub fn verify(&self, plaintext: &str, hashed: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(hashed).map_err(|_| HashError::CorruptHash)?;
        if parsed.salt.is_none() || parsed.hash.is_none() {
            return Err(HashError::CorruptHash);
        }

        match Pbkdf2.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(_) => Err(HashError::CorruptHash),
        }
    }

    /// Spend one full verification against a decoy hash.
    ///
    /// Called when no account matches, so an unknown email costs as much as
    /// a wrong password.
    pub fn dummy_verify(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.decoy);
    }

    /// [`Self::hash`] on the blocking pool.
    pub async fn hash_blocking(&self, plaintext: &str) -> Result<String, HashError> {
        let hasher = self.clone();
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| HashError::Internal(format!("hashing task failed: {e}")))?
    }

    /// [`Self::verify`] on the blocking pool.
    pub async fn verify_blocking(&self, plaintext: &str, hashed: &str) -> Result<bool, HashError> {
        let hasher = self.clone();
        let plaintext = plaintext.to_owned();
        let hashed = hashed.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hashed))
            .await
            .map_err(|e| HashError::Internal(format!("verification task failed: {e}")))?
    }

    /// [`Self::dummy_verify`] on the blocking pool.
    pub async fn dummy_verify_blocking(&self, plaintext: &str) {
        let hasher = self.clone();
        let plaintext = plaintext.to_owned();
        let _ = tokio::task::spawn_blocking(move || hasher.dummy_verify(&plaintext)).await;
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_ROUNDS)
    }
}

fn derive(rounds: u32, plaintext: &str) -> Result<String, HashError> {
    if plaintext.is_empty() {
        return Err(HashError::InvalidInput);
    }

    let params = Params {
        rounds,
        output_length: OUTPUT_LEN,
    };
    let salt = SaltString::generate(&mut OsRng);
    let hash = Pbkdf2
        .hash_password_customized(plaintext.as_bytes(), None, None, params, &salt)
        .map_err(|e| HashError::Internal(e.to_string()))?;

    Ok(hash.to_string())
}
