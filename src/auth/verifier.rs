//! Sign-in: lookup, credential check, token issuance. Performs no writes.

use crate::auth::error::AuthError;
use crate::auth::hasher::CredentialHasher;
use crate::auth::registration::AuthSession;
use crate::auth::store::{Account, AccountStore};
use crate::auth::token::TokenIssuer;
use crate::auth::validation::SignInRequest;
use std::sync::Arc;

pub struct CredentialVerifier {
    store: Arc<dyn AccountStore>,
    hasher: CredentialHasher,
    tokens: TokenIssuer,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn AccountStore>, hasher: CredentialHasher, tokens: TokenIssuer) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    /// Check credentials and issue a token. The first failing step returns.
    pub async fn sign_in(&self, request: SignInRequest) -> Result<AuthSession, AuthError> {
        let Some(account) = self.store.find_by_email(&request.email, None).await? else {
            // Same cost as a wrong password, same error.
            self.hasher.dummy_verify_blocking(&request.password).await;
            tracing::info!("Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let matches = self
            .hasher
            .verify_blocking(&request.password, &account.credential_hash)
            .await
            .map_err(|e| {
                tracing::error!(account_id = %account.id, error = %e, "Stored credential hash unusable");
                AuthError::from(e)
            })?;
        if !matches {
            tracing::info!("Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self
            .tokens
            .issue(&account.id, self.tokens.default_lifetime())?;

        tracing::info!(account_id = %account.id, "Account signed in");
        Ok(AuthSession { account, token })
    }

    /// Resolve a bearer token to the account it was issued for.
    ///
    /// A token whose account no longer exists is invalid.
    pub async fn authenticate_token(&self, token: &str) -> Result<Account, AuthError> {
        let account_id = self.tokens.verify(token)?;
        self.store
            .find_by_id(&account_id)
            .await?
            .ok_or(AuthError::TokenInvalid)
    }
}
