//! Stateless bearer tokens (HS256 JWT).
//!
//! A token is valid only if its signature verifies against the configured
//! secret and its expiry has not been reached. No server-side session table
//! exists, so a token cannot be revoked before it expires.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default token lifetime: 1 day (seconds).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 3600;

/// Claims embedded in every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signing secret is not configured")]
    SigningKeyMissing,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Mints and checks bearer tokens with a secret fixed at startup.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Option<Arc<str>>,
    lifetime: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl TokenIssuer {
    /// A blank secret is treated as missing.
    pub fn new(secret: Option<&str>, lifetime: Duration) -> Self {
        let secret = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Arc::from);
        Self { secret, lifetime }
    }

    pub fn default_lifetime(&self) -> Duration {
        self.lifetime
    }

    fn secret(&self) -> Result<&str, TokenError> {
        self.secret.as_deref().ok_or(TokenError::SigningKeyMissing)
    }

    /// Issue a token for `account_id` expiring `lifetime` from now.
    pub fn issue(&self, account_id: &str, lifetime: Duration) -> Result<String, TokenError> {
        self.issue_at(account_id, lifetime, Utc::now().timestamp())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(
        &self,
        account_id: &str,
        lifetime: Duration,
        now: i64,
    ) -> Result<String, TokenError> {
        let secret = self.secret()?;
        let lifetime_secs = i64::try_from(lifetime.as_secs())
            .map_err(|_| TokenError::Signing("token lifetime out of range".into()))?;

        let claims = Claims {
            sub: account_id.to_string(),
            iat: now,
            exp: now.saturating_add(lifetime_secs),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify a token and return the account id it was issued for.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a token as if the current time were `now` (unix seconds).
    pub fn verify_at(&self, token: &str, now: i64) -> Result<String, TokenError> {
        let claims = self.decode_claims(token)?;
        if now >= claims.exp {
            return Err(TokenError::TokenExpired);
        }
        if claims.sub.is_empty() {
            return Err(TokenError::TokenInvalid);
        }
        Ok(claims.sub)
    }

    /// Check the signature and structure only; expiry is left to the caller.
    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let secret = self.secret()?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against an explicit clock in verify_at.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| TokenError::TokenInvalid)
    }
}
