use crate::client::{ApiError, ClientOptions, HttpClient};
use crate::health::{HealthCheck, Liveness};

const ALIVE_PATH: &str = "areyoualive";

/// Client for the mainserver backend.
///
/// The backend exposes `GET /areyoualive`, answering
/// `{"answer": "yes", "version": "<semver>"}` once it is ready to serve.
#[derive(Debug, Clone)]
pub struct MainserverClient {
    http: HttpClient,
}

impl MainserverClient {
    pub fn new(base_url: &str, options: &ClientOptions) -> Result<Self, ApiError> {
        Ok(Self {
            http: HttpClient::new(base_url, options)?,
        })
    }

    /// GET `/areyoualive`
    pub async fn alive(&self) -> Result<Liveness, ApiError> {
        self.http.get(ALIVE_PATH).await
    }

    /// GET `/areyoualive` and return only the reported version.
    pub async fn version(&self) -> Result<String, ApiError> {
        Ok(self.alive().await?.version.unwrap_or_default())
    }
}

impl HealthCheck for MainserverClient {
    async fn is_alive(&self) -> Result<Liveness, ApiError> {
        self.alive().await
    }
}
