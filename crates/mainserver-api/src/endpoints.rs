use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::client::ApiError;

const DEVELOPMENT_BASE_URL: &str = "http://localhost:6555/";
const PRODUCTION_DOMAIN: &str = "mainserver.failean.com";
const GRAPHQL_PATH: &str = "graphql";

/// Which backend deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Development,
    Production,
}

impl BuildMode {
    /// Development for debug builds, production for release builds.
    pub fn from_build_profile() -> Self {
        if cfg!(debug_assertions) {
            BuildMode::Development
        } else {
            BuildMode::Production
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown build mode {0:?}, expected \"development\" or \"production\"")]
pub struct ParseBuildModeError(String);

impl FromStr for BuildMode {
    type Err = ParseBuildModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(BuildMode::Development),
            "production" | "prod" => Ok(BuildMode::Production),
            _ => Err(ParseBuildModeError(s.to_string())),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
        })
    }
}

/// Every URL the client needs, derived from a single base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// REST base; the health endpoint is resolved relative to it.
    pub base: Url,
    /// GraphQL over plain HTTP.
    pub graphql_http: Url,
    /// GraphQL subscriptions over WebSocket (`ws://` or `wss://`).
    pub graphql_ws: Url,
}

impl Endpoints {
    /// Select the backend for the given mode.
    ///
    /// Development always targets the local server. Production targets
    /// `https://{tag}.mainserver.failean.com/` when an environment tag is
    /// set, and the bare domain otherwise.
    pub fn resolve(mode: BuildMode, env_tag: Option<&str>) -> Result<Self, ApiError> {
        match mode {
            BuildMode::Development => Self::from_base(DEVELOPMENT_BASE_URL),
            BuildMode::Production => {
                let prefix = match env_tag.map(str::trim) {
                    Some(tag) if !tag.is_empty() => format!("{tag}."),
                    _ => String::new(),
                };
                Self::from_base(&format!("https://{prefix}{PRODUCTION_DOMAIN}/"))
            }
        }
    }

    /// Derive the endpoint set from an explicit `http(s)://` base URL.
    pub fn from_base(base: &str) -> Result<Self, ApiError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let ws_scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ApiError::UnsupportedScheme(other.to_string())),
        };

        let graphql_http = base.join(GRAPHQL_PATH)?;
        let mut graphql_ws = graphql_http.clone();
        graphql_ws
            .set_scheme(ws_scheme)
            .map_err(|()| ApiError::UnsupportedScheme(ws_scheme.to_string()))?;

        Ok(Self {
            base,
            graphql_http,
            graphql_ws,
        })
    }
}
