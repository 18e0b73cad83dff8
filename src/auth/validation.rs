//! Request-shape validation run before registration or sign-in.

use crate::auth::error::AuthError;
use crate::auth::store::normalize_email;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

const EMAIL_MIN_LEN: usize = 5;
const EMAIL_MAX_LEN: usize = 255;
const PASSWORD_MIN_LEN: usize = 6;
const PASSWORD_MAX_LEN: usize = 128;
const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 50;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("email pattern compiles"));

/// Body of `POST /sign-up`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Body of `POST /sign-in`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// A sign-up request that passed validation.
#[derive(Clone)]
pub struct RegistrationRequest {
    /// Already normalized.
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

/// A sign-in request that passed validation.
#[derive(Clone)]
pub struct SignInRequest {
    /// Already normalized.
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SignUpInput {
    pub fn validate(self) -> Result<RegistrationRequest, AuthError> {
        let email = validate_email(&self.email)?;

        let password_len = self.password.chars().count();
        if password_len == 0 {
            return Err(AuthError::Validation("Password is required".into()));
        }
        if password_len < PASSWORD_MIN_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at least {PASSWORD_MIN_LEN} characters"
            )));
        }
        if password_len > PASSWORD_MAX_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at most {PASSWORD_MAX_LEN} characters"
            )));
        }

        let display_name = match self.name.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => {
                let len = name.chars().count();
                if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
                    return Err(AuthError::Validation(format!(
                        "Name must be between {NAME_MIN_LEN} and {NAME_MAX_LEN} characters"
                    )));
                }
                Some(name.to_string())
            }
        };

        Ok(RegistrationRequest {
            email,
            password: self.password,
            display_name,
        })
    }
}

impl SignInInput {
    /// Only presence is checked for the password, so a short wrong password
    /// still fails as invalid credentials.
    pub fn validate(self) -> Result<SignInRequest, AuthError> {
        let email = validate_email(&self.email)?;
        if self.password.is_empty() {
            return Err(AuthError::Validation("Password is required".into()));
        }
        Ok(SignInRequest {
            email,
            password: self.password,
        })
    }
}

fn validate_email(raw: &str) -> Result<String, AuthError> {
    let email = normalize_email(raw);
    if email.is_empty() {
        return Err(AuthError::Validation("Email is required".into()));
    }
    let len = email.chars().count();
    if !(EMAIL_MIN_LEN..=EMAIL_MAX_LEN).contains(&len) || !EMAIL_PATTERN.is_match(&email) {
        return Err(AuthError::Validation(
            "Please provide a valid email address".into(),
        ));
    }
    Ok(email)
}
