//! Configuration loading from the process environment.

use chrono::Duration;

use gatehouse_auth::TokenPolicy;
use gatehouse_observability::LogFormat;

pub const PASSWORD_RESET_TTL_MINUTES: &str = "GATEHOUSE_PASSWORD_RESET_TTL_MINUTES";
pub const INVITATION_TTL_HOURS: &str = "GATEHOUSE_INVITATION_TTL_HOURS";
pub const MAGIC_LINK_TTL_MINUTES: &str = "GATEHOUSE_MAGIC_LINK_TTL_MINUTES";
pub const TOKEN_SECRET_BYTES: &str = "GATEHOUSE_TOKEN_SECRET_BYTES";
pub const LOG_FORMAT: &str = "GATEHOUSE_LOG_FORMAT";

/// Upper bound for any configured token lifetime.
pub const MAX_TOKEN_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub tokens: TokenPolicy,
    pub log_format: LogFormat,
}

impl AuthConfig {
    /// Read the configuration from environment variables.
    ///
    /// Unset variables keep their defaults. Unparsable values are logged and
    /// ignored rather than aborting startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Log format alone, read without logging so it can run before the
    /// subscriber is installed. Unknown values fall back to the default.
    pub fn log_format_from_env() -> LogFormat {
        Self::log_format_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn log_format_from_lookup<F>(lookup: F) -> LogFormat
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(LOG_FORMAT)
            .and_then(|raw| LogFormat::parse(&raw))
            .unwrap_or_default()
    }

    /// Same as [`AuthConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let tokens = &mut config.tokens;

        if let Some(ttl) = ttl(&lookup, PASSWORD_RESET_TTL_MINUTES, Duration::try_minutes) {
            tokens.password_reset_ttl = ttl;
        }
        if let Some(ttl) = ttl(&lookup, INVITATION_TTL_HOURS, Duration::try_hours) {
            tokens.invitation_ttl = ttl;
        }
        if let Some(ttl) = ttl(&lookup, MAGIC_LINK_TTL_MINUTES, Duration::try_minutes) {
            tokens.magic_link_ttl = ttl;
        }
        if let Some(bytes) = positive(&lookup, TOKEN_SECRET_BYTES) {
            // Minimum secret length is 16 bytes.
            if bytes >= 16 {
                tokens.secret_bytes = bytes as usize;
            } else {
                tracing::warn!(key = TOKEN_SECRET_BYTES, bytes, "value below minimum of 16, keeping default");
            }
        }

        if let Some(raw) = lookup(LOG_FORMAT) {
            match LogFormat::parse(&raw) {
                Some(format) => config.log_format = format,
                None => tracing::warn!(key = LOG_FORMAT, value = %raw, "unknown log format, keeping default"),
            }
        }

        config
    }
}

/// A positive lifetime no longer than [`MAX_TOKEN_TTL_DAYS`].
fn ttl<F>(lookup: &F, key: &str, unit: fn(i64) -> Option<Duration>) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = positive(lookup, key)?;
    match unit(value) {
        Some(ttl) if ttl <= Duration::days(MAX_TOKEN_TTL_DAYS) => Some(ttl),
        _ => {
            tracing::warn!(key, value, max_days = MAX_TOKEN_TTL_DAYS, "token lifetime too long, keeping default");
            None
        }
    }
}

fn positive<F>(lookup: &F, key: &str) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "expected a positive integer, keeping default");
            None
        }
    }
}
