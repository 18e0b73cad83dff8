//! Account registration and credential verification.
//!
//! Provides:
//! - Account registration as one transaction (uniqueness check, hash, insert, commit)
//! - Sign-in with uniform failures for unknown email and wrong password
//! - Salted PBKDF2-HMAC-SHA256 credential hashes in PHC format
//! - Stateless HS256 bearer tokens
//! - SQLite-backed persistent storage behind the `AccountStore` trait
//!
//! ## Design Decisions
//! - Tokens are self-contained JWTs; no server-side session table, so they
//!   cannot be revoked before expiry.
//! - The store is the final arbiter of email uniqueness (`UNIQUE` column);
//!   a late `DuplicateKey` is reported exactly like an early duplicate.
//! - Signing secret, token lifetime and hash rounds are injected at startup
//!   and never read from the environment while serving requests.

pub mod error;
pub mod hasher;
pub mod registration;
pub mod store;
pub mod token;
pub mod validation;
pub mod verifier;

pub use error::AuthError;
pub use hasher::{CredentialHasher, HashError};
pub use registration::{AuthSession, Registrar, RegistrationPolicy, RegistrationState};
pub use store::{Account, AccountDraft, AccountStore, SqliteAccountStore, StoreError, TransactionScope};
pub use token::{Claims, TokenError, TokenIssuer};
pub use validation::{RegistrationRequest, SignInInput, SignInRequest, SignUpInput};
pub use verifier::CredentialVerifier;
