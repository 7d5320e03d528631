//! Runtime configuration for token issuance and storage access.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::error::ConfigError;

pub const ENV_JWT_SECRET: &str = "HRIS_JWT_SECRET";
pub const ENV_ACCESS_TTL_SECS: &str = "HRIS_ACCESS_TTL_SECS";
pub const ENV_REFRESH_TTL_SECS: &str = "HRIS_REFRESH_TTL_SECS";
pub const ENV_JWT_ISSUER: &str = "HRIS_JWT_ISSUER";
pub const ENV_STORAGE_TIMEOUT_MS: &str = "HRIS_STORAGE_TIMEOUT_MS";

/// Minimum HS256 secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const DEV_SECRET: &str = "dev-only-hris-signing-secret-change-me-0000";
const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_ISSUER: &str = "hris";
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret for access tokens.
    pub signing_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Value of the `iss` claim; tokens from any other issuer are rejected.
    pub issuer: String,
    /// Upper bound applied to every storage call.
    pub storage_timeout: StdDuration,
}

impl core::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_secret", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("issuer", &self.issuer)
            .field("storage_timeout", &self.storage_timeout)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: DEV_SECRET.to_string(),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_token_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            issuer: DEFAULT_ISSUER.to_string(),
            storage_timeout: StdDuration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
        }
    }
}

impl AuthConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let signing_secret = match lookup(ENV_JWT_SECRET) {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "{ENV_JWT_SECRET} not set, using insecure development secret"
                );
                defaults.signing_secret
            }
        };

        let access_token_ttl = match lookup(ENV_ACCESS_TTL_SECS) {
            Some(raw) => Duration::seconds(parse_positive(ENV_ACCESS_TTL_SECS, &raw)?),
            None => defaults.access_token_ttl,
        };
        let refresh_token_ttl = match lookup(ENV_REFRESH_TTL_SECS) {
            Some(raw) => Duration::seconds(parse_positive(ENV_REFRESH_TTL_SECS, &raw)?),
            None => defaults.refresh_token_ttl,
        };
        let issuer = lookup(ENV_JWT_ISSUER).unwrap_or(defaults.issuer);
        let storage_timeout = match lookup(ENV_STORAGE_TIMEOUT_MS) {
            Some(raw) => {
                let ms = parse_positive(ENV_STORAGE_TIMEOUT_MS, &raw)?;
                StdDuration::from_millis(ms as u64)
            }
            None => defaults.storage_timeout,
        };

        let config = Self {
            signing_secret,
            access_token_ttl,
            refresh_token_ttl,
            issuer,
            storage_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret {
                min: MIN_SECRET_LEN,
                actual: self.signing_secret.len(),
            });
        }
        if self.access_token_ttl <= Duration::zero() {
            return Err(invalid(ENV_ACCESS_TTL_SECS, "must be positive"));
        }
        if self.refresh_token_ttl <= Duration::zero() {
            return Err(invalid(ENV_REFRESH_TTL_SECS, "must be positive"));
        }
        if self.issuer.trim().is_empty() {
            return Err(invalid(ENV_JWT_ISSUER, "cannot be empty"));
        }
        if self.storage_timeout.is_zero() {
            return Err(invalid(ENV_STORAGE_TIMEOUT_MS, "must be positive"));
        }
        Ok(())
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<i64, ConfigError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(key, format!("'{raw}' is not an integer")))?;
    if value <= 0 {
        return Err(invalid(key, "must be positive"));
    }
    Ok(value)
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}
