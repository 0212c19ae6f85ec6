use std::str::FromStr;
use std::time::Duration;

use mainserver_api::{ApiError, BuildMode, ClientOptions, Endpoints};
use tracing::{debug, warn};

use crate::gate::DEFAULT_TRY_INTERVAL;

/// Configuration for the availability gate and the clients it exposes.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Delay between failed checks.
    pub try_interval: Duration,
    /// Selects a tagged production host, e.g. `dev` → `dev.mainserver.failean.com`.
    pub env_tag: Option<String>,
    pub mode: BuildMode,
    /// Explicit backend base URL; wins over `mode` and `env_tag`.
    pub base_url: Option<String>,
    /// Build the combined HTTP/WebSocket GraphQL client once ready.
    pub graphql: bool,
    pub request_timeout: Option<Duration>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            try_interval: DEFAULT_TRY_INTERVAL,
            env_tag: None,
            mode: BuildMode::from_build_profile(),
            base_url: None,
            graphql: true,
            request_timeout: None,
        }
    }
}

impl GateConfig {
    /// Read `MAINSERVER_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            try_interval: env_millis("MAINSERVER_TRY_INTERVAL_MS")
                .unwrap_or(defaults.try_interval),
            env_tag: env_string("MAINSERVER_ENV_TAG"),
            mode: env_parsed("MAINSERVER_MODE").unwrap_or(defaults.mode),
            base_url: env_string("MAINSERVER_BASE_URL"),
            graphql: env_flag("MAINSERVER_GRAPHQL").unwrap_or(defaults.graphql),
            request_timeout: env_millis("MAINSERVER_REQUEST_TIMEOUT_MS"),
        }
    }

    /// Resolve the backend endpoints. Computed once per mount.
    pub fn endpoints(&self) -> Result<Endpoints, ApiError> {
        match &self.base_url {
            Some(base) => Endpoints::from_base(base),
            None => Endpoints::resolve(self.mode, self.env_tag.as_deref()),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            with_credentials: true,
            timeout: self.request_timeout,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = env_string(key)?;
    match value.parse::<T>() {
        Ok(parsed) => {
            debug!(key, %value, "using value from env");
            Some(parsed)
        }
        Err(e) => {
            warn!(key, %value, error = %e, "invalid value in env, using default");
            None
        }
    }
}

/// Positive millisecond durations only; zero would turn the retry loop into
/// a busy loop.
fn env_millis(key: &str) -> Option<Duration> {
    match env_parsed::<u64>(key)? {
        0 => {
            warn!(key, "zero duration in env, using default");
            None
        }
        millis => Some(Duration::from_millis(millis)),
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let value = env_string(key)?;
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => {
            warn!(key, %value, "invalid boolean in env, using default");
            None
        }
    }
}
