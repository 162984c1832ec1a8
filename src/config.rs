//! SDK-wide configuration.
//!
//! Every field can be provided explicitly or read from `ETORO_`-prefixed environment variables
//! with [`Config::from_env`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::Credentials;
use crate::error::Error;
use crate::rate_limit::RateLimitConfig;
use crate::{DEFAULT_BASE_URL, DEFAULT_WS_URL, Result};

pub const API_KEY_VAR: &str = "ETORO_API_KEY";
pub const USER_KEY_VAR: &str = "ETORO_USER_KEY";
pub const MODE_VAR: &str = "ETORO_MODE";
pub const BASE_URL_VAR: &str = "ETORO_BASE_URL";
pub const WS_URL_VAR: &str = "ETORO_WS_URL";
pub const TIMEOUT_VAR: &str = "ETORO_TIMEOUT";
pub const RETRY_ATTEMPTS_VAR: &str = "ETORO_RETRY_ATTEMPTS";
pub const RETRY_DELAY_VAR: &str = "ETORO_RETRY_DELAY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Trading environment.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Paper trading
    #[default]
    Demo,
    /// Live trading
    Real,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Demo => f.write_str("demo"),
            Self::Real => f.write_str("real"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Ok(Self::Demo),
            "real" => Ok(Self::Real),
            other => Err(Error::validation(format!(
                "mode must be `demo` or `real`, got `{other}`"
            ))),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub mode: Mode,
    /// REST API base URL
    pub base_url: String,
    /// Streaming endpoint
    pub ws_url: String,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Maximum tries per request on transient failures, including the first one
    pub retry_attempts: u32,
    /// Base delay between retries
    pub retry_delay: Duration,
    /// Client-side throttling; `None` disables it
    pub rate_limit: Option<RateLimitConfig>,
}

impl Config {
    /// Creates a config with default endpoints and policies.
    pub fn new(api_key: &str, user_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::validation("api_key must not be empty"));
        }
        if user_key.is_empty() {
            return Err(Error::validation("user_key must not be empty"));
        }

        Ok(Self {
            credentials: Credentials::new(api_key.to_owned(), user_key.to_owned()),
            mode: Mode::default(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            ws_url: DEFAULT_WS_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            rate_limit: Some(RateLimitConfig::default()),
        })
    }

    /// Reads the config from `ETORO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::validation(format!("{name} is not set")))
        };

        let mut config = Self::new(&required(API_KEY_VAR)?, &required(USER_KEY_VAR)?)?;

        if let Some(mode) = lookup(MODE_VAR) {
            config.mode = mode.parse()?;
        }
        if let Some(base_url) = lookup(BASE_URL_VAR) {
            config.base_url = base_url;
        }
        if let Some(ws_url) = lookup(WS_URL_VAR) {
            config.ws_url = ws_url;
        }
        if let Some(timeout) = lookup(TIMEOUT_VAR) {
            config.timeout = parse_seconds(TIMEOUT_VAR, &timeout)?;
        }
        if let Some(attempts) = lookup(RETRY_ATTEMPTS_VAR) {
            config.retry_attempts = attempts.trim().parse().map_err(|e| {
                Error::validation(format!("{RETRY_ATTEMPTS_VAR} is not a count: {e}"))
            })?;
        }
        if let Some(delay) = lookup(RETRY_DELAY_VAR) {
            let delay = parse_seconds(RETRY_DELAY_VAR, &delay)?;
            if delay.is_zero() {
                return Err(Error::validation(format!(
                    "{RETRY_DELAY_VAR} must be greater than zero"
                )));
            }
            config.retry_delay = delay;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitConfig>) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Duration> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|e| Error::validation(format!("{name} is not a number of seconds: {e}")))?;

    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::validation(format!("{name} is out of range: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret as _;

    use super::*;
    use crate::error::Kind;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::new("key", "ukey").expect("valid config");

        assert_eq!(config.mode, Mode::Demo);
        assert_eq!(config.base_url, "https://public-api.etoro.com");
        assert_eq!(config.ws_url, "wss://ws.etoro.com/ws");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.rate_limit, Some(RateLimitConfig::default()));
    }

    #[test]
    fn empty_keys_are_rejected() {
        let err = Config::new("", "ukey").unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[test]
    fn from_env_reads_prefixed_variables() {
        let config = Config::from_lookup(lookup(&[
            (API_KEY_VAR, "env-api-key"),
            (USER_KEY_VAR, "env-user-key"),
            (MODE_VAR, "real"),
            (TIMEOUT_VAR, "2.5"),
            (RETRY_ATTEMPTS_VAR, "5"),
        ]))
        .expect("valid config");

        assert_eq!(config.credentials.api_key().expose_secret(), "env-api-key");
        assert_eq!(config.credentials.user_key().expose_secret(), "env-user-key");
        assert_eq!(config.mode, Mode::Real);
        assert_eq!(config.timeout, Duration::from_millis(2_500));
        assert_eq!(config.retry_attempts, 5);
    }

    #[test]
    fn from_env_requires_keys() {
        let err = Config::from_lookup(lookup(&[(API_KEY_VAR, "k")])).unwrap_err();

        assert_eq!(err.kind(), Kind::Validation);
        assert!(err.to_string().contains(USER_KEY_VAR));
    }

    #[test]
    fn from_env_rejects_bad_values() {
        let base = [(API_KEY_VAR, "k"), (USER_KEY_VAR, "u")];

        let mut vars = base.to_vec();
        vars.push((MODE_VAR, "paper"));
        Config::from_lookup(lookup(&vars)).unwrap_err();

        let mut vars = base.to_vec();
        vars.push((RETRY_DELAY_VAR, "0"));
        Config::from_lookup(lookup(&vars)).unwrap_err();

        let mut vars = base.to_vec();
        vars.push((TIMEOUT_VAR, "soon"));
        Config::from_lookup(lookup(&vars)).unwrap_err();
    }
}
