//! Process-wide configuration, loaded once at startup.
//!
//! Sources, lowest priority first: built-in defaults, the TOML file,
//! `SUBTRACK_*` environment variables. Nothing here is consulted again
//! after the gateway starts.

use crate::auth::hasher::{DEFAULT_HASH_ROUNDS, MIN_HASH_ROUNDS};
use crate::auth::registration::{RegistrationPolicy, DEFAULT_TRANSACTION_TIMEOUT};
use crate::auth::store::DEFAULT_POOL_SIZE;
use crate::auth::token::DEFAULT_TOKEN_TTL_SECS;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HS256 keys shorter than the digest size weaken the signature.
const MIN_SECRET_LEN: usize = 32;

const ENV_JWT_SECRET: &str = "SUBTRACK_JWT_SECRET";
const ENV_TOKEN_TTL_SECS: &str = "SUBTRACK_TOKEN_TTL_SECS";
const ENV_HASH_ROUNDS: &str = "SUBTRACK_HASH_ROUNDS";
const ENV_DATABASE_PATH: &str = "SUBTRACK_DATABASE_PATH";
const ENV_HOST: &str = "SUBTRACK_HOST";
const ENV_PORT: &str = "SUBTRACK_PORT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Whole-request timeout enforced by the HTTP layer.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret. Required.
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    /// PBKDF2 work factor for new hashes.
    pub hash_rounds: u32,
    /// Bound on transaction commit and abort.
    pub transaction_timeout_ms: u64,
    pub allow_registration: bool,
    /// Maximum registered accounts (0 = unlimited).
    pub max_accounts: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            hash_rounds: DEFAULT_HASH_ROUNDS,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT.as_millis() as u64,
            allow_registration: true,
            max_accounts: 0,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("hash_rounds", &self.hash_rounds)
            .field("transaction_timeout_ms", &self.transaction_timeout_ms)
            .field("allow_registration", &self.allow_registration)
            .field("max_accounts", &self.max_accounts)
            .finish()
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn registration_policy(&self) -> RegistrationPolicy {
        RegistrationPolicy {
            allow_registration: self.allow_registration,
            max_accounts: self.max_accounts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("subtrack.db"),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl Config {
    /// Load from `path`, or from the platform config dir when `path` is
    /// `None`, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Environment values win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(secret) = lookup(ENV_JWT_SECRET) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(ttl) = lookup(ENV_TOKEN_TTL_SECS) {
            self.auth.token_ttl_secs = ttl
                .parse()
                .with_context(|| format!("{ENV_TOKEN_TTL_SECS} must be a number of seconds"))?;
        }
        if let Some(rounds) = lookup(ENV_HASH_ROUNDS) {
            self.auth.hash_rounds = rounds
                .parse()
                .with_context(|| format!("{ENV_HASH_ROUNDS} must be a positive integer"))?;
        }
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.gateway.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT} must be a port number"))?;
        }
        Ok(())
    }

    /// Reject configurations the service must not start with.
    pub fn validate(&self) -> Result<()> {
        match self.auth.jwt_secret.as_deref().map(str::trim) {
            None | Some("") => bail!(
                "auth.jwt_secret is not set. Fix: set [auth] jwt_secret in config.toml or export {ENV_JWT_SECRET}."
            ),
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                bail!("auth.jwt_secret must be at least {MIN_SECRET_LEN} bytes")
            }
            Some(_) => {}
        }
        if self.auth.token_ttl_secs == 0 {
            bail!("auth.token_ttl_secs must be greater than 0");
        }
        if self.auth.hash_rounds < MIN_HASH_ROUNDS {
            bail!(
                "auth.hash_rounds is {}, minimum is {MIN_HASH_ROUNDS}",
                self.auth.hash_rounds
            );
        }
        if self.auth.transaction_timeout_ms == 0 {
            bail!("auth.transaction_timeout_ms must be greater than 0");
        }
        if self.database.pool_size == 0 {
            bail!("database.pool_size must be greater than 0");
        }
        Ok(())
    }
}

/// `<platform config dir>/subtrack/config.toml`, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "subtrack").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(config.auth.token_ttl_secs, 86_400);
        assert_eq!(config.auth.hash_rounds, 600_000);
        assert_eq!(config.auth.transaction_timeout(), Duration::from_secs(5));
        assert!(config.auth.allow_registration);
        assert_eq!(config.database.pool_size, 8);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [auth]
            jwt_secret = "0123456789abcdef0123456789abcdef"
            token_ttl_secs = 600

            [database]
            path = "/var/lib/subtrack/accounts.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.token_ttl(), Duration::from_secs(600));
        assert_eq!(config.auth.hash_rounds, 600_000);
        assert_eq!(config.gateway.port, 3000);
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/subtrack/accounts.db")
        );
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::from_toml("[auth]\ntoken_ttl_secs = 600\n").unwrap();
        config
            .apply_env_overrides(env(&[
                (ENV_JWT_SECRET, SECRET),
                (ENV_TOKEN_TTL_SECS, "120"),
                (ENV_HASH_ROUNDS, "1000"),
                (ENV_PORT, "8080"),
                (ENV_HOST, "  "),
            ]))
            .unwrap();

        assert_eq!(config.auth.jwt_secret.as_deref(), Some(SECRET));
        assert_eq!(config.auth.token_ttl_secs, 120);
        assert_eq!(config.auth.hash_rounds, 1000);
        assert_eq!(config.gateway.port, 8080);
        // Blank values are ignored.
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn bad_env_number_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[(ENV_TOKEN_TTL_SECS, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TOKEN_TTL_SECS));
    }

    #[test]
    fn validate_requires_signing_secret() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("jwt_secret"));

        let mut short = Config::default();
        short.auth.jwt_secret = Some("too-short".into());
        assert!(short.validate().is_err());
    }

    #[test]
    fn validate_rejects_weak_hash_rounds() {
        let mut config = Config::default();
        config.auth.jwt_secret = Some(SECRET.into());

        for rounds in [0, 1, MIN_HASH_ROUNDS - 1] {
            config.auth.hash_rounds = rounds;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("hash_rounds"), "{rounds}");
        }

        config.auth.hash_rounds = MIN_HASH_ROUNDS;
        config.validate().unwrap();
    }

    #[test]
    fn weak_rounds_from_env_fail_validation() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[(ENV_JWT_SECRET, SECRET), (ENV_HASH_ROUNDS, "1")]))
            .unwrap();
        assert_eq!(config.auth.hash_rounds, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = Config::default();
        config.auth.jwt_secret = Some(SECRET.into());
        config.validate().unwrap();

        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());
        config.auth.token_ttl_secs = 1;

        config.database.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let mut config = Config::default();
        config.auth.jwt_secret = Some(SECRET.into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Config::from_file(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
