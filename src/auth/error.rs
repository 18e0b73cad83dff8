//! Error taxonomy for registration, sign-in and token checks.
//!
//! Each variant owns its HTTP status and the message callers are allowed to
//! see. Infrastructure details are logged, never returned.

use crate::auth::hasher::HashError;
use crate::auth::store::StoreError;
use crate::auth::token::TokenError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use thiserror::Error;

/// Message shared by unknown-email and wrong-password failures.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid credentials";

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    #[error("User already exists")]
    AccountAlreadyExists,

    /// Unknown email or wrong password; deliberately indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Registration is disabled")]
    RegistrationClosed,

    #[error("transaction did not finish within {0:?}")]
    TransactionTimeout(Duration),

    #[error("token signing secret is not configured")]
    SigningKeyMissing,

    /// The account was committed but no token could be issued for it.
    #[error("account {account_id} created but token issuance failed")]
    TokenIssuance { account_id: String },

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AccountAlreadyExists => StatusCode::CONFLICT,
            Self::InvalidCredentials | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Self::RegistrationClosed => StatusCode::FORBIDDEN,
            Self::TransactionTimeout(_)
            | Self::SigningKeyMissing
            | Self::TokenIssuance { .. }
            | Self::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Text safe to send to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::TokenIssuance { .. } => {
                "Account created but token issuance failed; sign in to obtain a token".into()
            }
            Self::TransactionTimeout(_) | Self::SigningKeyMissing | Self::Infrastructure(_) => {
                INTERNAL_ERROR_MESSAGE.into()
            }
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey => Self::AccountAlreadyExists,
            other => Self::Infrastructure(other.to_string()),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::SigningKeyMissing => Self::SigningKeyMissing,
            TokenError::TokenExpired => Self::TokenExpired,
            TokenError::TokenInvalid => Self::TokenInvalid,
            TokenError::Signing(detail) => Self::Infrastructure(detail),
        }
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::InvalidInput => Self::Validation("Password is required".into()),
            other => Self::Infrastructure(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed with server error");
        }

        let body = serde_json::json!({
            "success": false,
            "error": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}
