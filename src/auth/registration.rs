//! Account registration as a single unit of work.
//!
//! `Started → Checked → Hashed → Inserted → Committed`, or `Aborted` from any
//! step before the commit. The password is hashed before the transaction
//! opens, so SQLite's write lock is held only for the recheck, the insert
//! and the commit. The token is issued only after the commit, so a signing
//! failure can never undo a durable account.

use crate::auth::error::AuthError;
use crate::auth::hasher::CredentialHasher;
use crate::auth::store::{Account, AccountDraft, AccountStore, TransactionScope};
use crate::auth::token::TokenIssuer;
use crate::auth::validation::RegistrationRequest;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on commit and abort.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// An authenticated account and its freshly issued bearer token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub account: Account,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Started,
    Checked,
    Hashed,
    Inserted,
    Committed,
    Aborted,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::Checked => "checked",
            Self::Hashed => "hashed",
            Self::Inserted => "inserted",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Limits applied before a registration opens a transaction.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationPolicy {
    pub allow_registration: bool,
    /// 0 = unlimited.
    pub max_accounts: u64,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            allow_registration: true,
            max_accounts: 0,
        }
    }
}

/// Creates accounts exactly once per normalized email.
pub struct Registrar {
    store: Arc<dyn AccountStore>,
    hasher: CredentialHasher,
    tokens: TokenIssuer,
    transaction_timeout: Duration,
    policy: RegistrationPolicy,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn AccountStore>,
        hasher: CredentialHasher,
        tokens: TokenIssuer,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            transaction_timeout,
            policy: RegistrationPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a validated request and issue its first token.
    pub async fn register(&self, request: RegistrationRequest) -> Result<AuthSession, AuthError> {
        if !self.policy.allow_registration {
            return Err(AuthError::RegistrationClosed);
        }
        tracing::debug!(state = %RegistrationState::Started, "Registration started");

        // Early rejection only; the scoped check below is authoritative.
        if self
            .store
            .find_by_email(&request.email, None)
            .await?
            .is_some()
        {
            return Err(AuthError::AccountAlreadyExists);
        }
        tracing::debug!(state = %RegistrationState::Checked, "Email is free");

        let credential_hash = self.hasher.hash_blocking(&request.password).await?;
        tracing::debug!(state = %RegistrationState::Hashed, "Credential hashed");

        let scope = self.store.begin().await?;
        let account = match self.write_account(&scope, &request, credential_hash).await {
            Ok(account) => account,
            Err(err) => {
                tracing::debug!(state = %RegistrationState::Aborted, reason = %err, "Registration aborted");
                self.finish(scope, false).await?;
                return Err(err);
            }
        };

        self.finish(scope, true).await?;
        tracing::debug!(state = %RegistrationState::Committed, account_id = %account.id, "Registration committed");

        let token = self
            .tokens
            .issue(&account.id, self.tokens.default_lifetime())
            .map_err(|e| {
                tracing::error!(
                    account_id = %account.id,
                    error = %e,
                    "Account committed but token issuance failed"
                );
                AuthError::TokenIssuance {
                    account_id: account.id.clone(),
                }
            })?;

        tracing::info!(account_id = %account.id, "Account registered");
        Ok(AuthSession { account, token })
    }

    /// Everything that runs under the write lock and must be undone if any
    /// of it fails.
    async fn write_account(
        &self,
        scope: &TransactionScope,
        request: &RegistrationRequest,
        credential_hash: String,
    ) -> Result<Account, AuthError> {
        if self.policy.max_accounts > 0
            && self.store.count(Some(scope)).await? >= self.policy.max_accounts
        {
            return Err(AuthError::RegistrationClosed);
        }

        if self
            .store
            .find_by_email(&request.email, Some(scope))
            .await?
            .is_some()
        {
            return Err(AuthError::AccountAlreadyExists);
        }

        // DuplicateKey converts to AccountAlreadyExists.
        let account = self
            .store
            .insert(
                AccountDraft {
                    email: request.email.clone(),
                    credential_hash,
                    display_name: request.display_name.clone(),
                },
                Some(scope),
            )
            .await?;
        tracing::debug!(state = %RegistrationState::Inserted, account_id = %account.id, "Account row written");

        Ok(account)
    }

    /// Commit or abort within the configured timeout.
    async fn finish(&self, scope: TransactionScope, commit: bool) -> Result<(), AuthError> {
        let op = if commit {
            self.store.commit(scope)
        } else {
            self.store.abort(scope)
        };

        match tokio::time::timeout(self.transaction_timeout, op).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => {
                tracing::error!(
                    commit,
                    timeout_ms = self.transaction_timeout.as_millis() as u64,
                    "Transaction did not finish in time"
                );
                Err(AuthError::TransactionTimeout(self.transaction_timeout))
            }
        }
    }
}
