use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_RATE_LIMIT_BY_TOKEN: u64 = 200;
const DEFAULT_RATE_LIMIT_BY_IP: u64 = 100;
const DEFAULT_WINDOW_SIZE_SECS: u64 = 3600;
// 十年，Redis EXPIRE 与 chrono 都能表示
const MAX_WINDOW_SIZE_SECS: u64 = 10 * 365 * 24 * 3600;
const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
const DEFAULT_SERVER_PORT: u16 = 3000;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {0} must not be empty")]
    Empty(&'static str),
}

/// Quota applied to one request: at most `limit` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u64,
    pub window_secs: u64,
}

/// Process-wide settings, read once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct Config {
    pub redis_url: String,
    pub auth_token: String,
    pub rate_limit_by_token: u64,
    pub rate_limit_by_ip: u64,
    pub window_size_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    /// Admit requests when the counter store cannot be reached.
    pub fail_open: bool,
    pub store_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let redis_url = lookup("REDIS_URL").ok_or(ConfigError::Missing("REDIS_URL"))?;
        let auth_token = lookup("AUTH_TOKEN").ok_or(ConfigError::Missing("AUTH_TOKEN"))?;
        if auth_token.trim().is_empty() {
            return Err(ConfigError::Empty("AUTH_TOKEN"));
        }

        let window_size_secs = match parse_or(&lookup, "WINDOW_SIZE_IN_SECONDS", DEFAULT_WINDOW_SIZE_SECS) {
            0 => {
                tracing::warn!("WINDOW_SIZE_IN_SECONDS must be positive, using {}", DEFAULT_WINDOW_SIZE_SECS);
                DEFAULT_WINDOW_SIZE_SECS
            }
            secs if secs > MAX_WINDOW_SIZE_SECS => {
                tracing::warn!("WINDOW_SIZE_IN_SECONDS {} is too large, using {}", secs, MAX_WINDOW_SIZE_SECS);
                MAX_WINDOW_SIZE_SECS
            }
            secs => secs,
        };

        Ok(Config {
            redis_url,
            auth_token,
            rate_limit_by_token: parse_or(&lookup, "RATE_LIMIT_BY_TOKEN", DEFAULT_RATE_LIMIT_BY_TOKEN),
            rate_limit_by_ip: parse_or(&lookup, "RATE_LIMIT_BY_IP", DEFAULT_RATE_LIMIT_BY_IP),
            window_size_secs,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.into()),
            server_port: parse_or(&lookup, "PORT", DEFAULT_SERVER_PORT),
            fail_open: parse_or(&lookup, "RATE_LIMIT_FAIL_OPEN", false),
            store_timeout_ms: parse_or(&lookup, "REDIS_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS),
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Authenticated callers get the token quota, everyone else the per-address one.
    pub fn policy(&self, authenticated: bool) -> RateLimitPolicy {
        let limit = if authenticated {
            self.rate_limit_by_token
        } else {
            self.rate_limit_by_ip
        };
        RateLimitPolicy {
            limit,
            window_secs: self.window_size_secs,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &self.redis_url)
            .field("auth_token", &"<redacted>")
            .field("rate_limit_by_token", &self.rate_limit_by_token)
            .field("rate_limit_by_ip", &self.rate_limit_by_ip)
            .field("window_size_secs", &self.window_size_secs)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("fail_open", &self.fail_open)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .finish()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value {:?} for {}, using {}", raw, key, default);
            default
        }),
        None => default,
    }
}
