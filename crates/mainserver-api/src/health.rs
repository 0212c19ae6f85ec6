use std::fmt;

use serde::Deserialize;

use crate::client::ApiError;

/// The token the backend answers with when it is ready to serve.
pub const ALIVE_ANSWER: &str = "yes";

/// Body of the backend's liveness endpoint.
///
/// Both fields default so that an unexpected JSON object still decodes and
/// gets classified as a bad answer rather than a transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Liveness {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Uniform health-check interface for the availability gate.
///
/// Implementors perform one probe of the backend. `Ok` means the backend
/// answered (whatever it said), `Err` means it could not be reached or the
/// answer could not be decoded.
pub trait HealthCheck: Send + Sync {
    fn is_alive(&self) -> impl std::future::Future<Output = Result<Liveness, ApiError>> + Send;
}

/// Classified result of one health-check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { version: String },
    BadAnswer { answer: String },
    TransportError(String),
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }

    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            HealthOutcome::Healthy { .. } => "healthy",
            HealthOutcome::BadAnswer { .. } => "bad_answer",
            HealthOutcome::TransportError(_) => "transport_error",
        }
    }
}

impl From<Result<Liveness, ApiError>> for HealthOutcome {
    fn from(result: Result<Liveness, ApiError>) -> Self {
        match result {
            Ok(liveness) if liveness.answer == ALIVE_ANSWER => HealthOutcome::Healthy {
                version: liveness.version.unwrap_or_default(),
            },
            Ok(liveness) => HealthOutcome::BadAnswer {
                answer: liveness.answer,
            },
            Err(e) => HealthOutcome::TransportError(e.to_string()),
        }
    }
}

impl fmt::Display for HealthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthOutcome::Healthy { version } => write!(f, "healthy (version {version})"),
            HealthOutcome::BadAnswer { answer } => write!(f, "unhealthy answer {answer:?}"),
            HealthOutcome::TransportError(detail) => write!(f, "unreachable: {detail}"),
        }
    }
}
