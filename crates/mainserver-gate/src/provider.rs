use std::sync::{Arc, OnceLock};

use mainserver_api::{
    ApiError, ClientOptions, Endpoints, HealthCheck, HttpClient, HttpLink, MainserverClient,
    SplitClient, WsLink,
};
use tokio::sync::watch;
use tracing::info;

use crate::config::GateConfig;
use crate::gate::{AvailabilityGate, CHECKING_MESSAGE, GateError, Status};

const GRAPHQL_PATH: &str = "graphql";

/// Everything the application gets once the backend is confirmed alive.
#[derive(Debug)]
pub struct MainserverContext {
    pub http: HttpClient,
    pub graphql: Option<SplitClient>,
    pub version: String,
}

impl MainserverContext {
    fn build(
        endpoints: &Endpoints,
        options: &ClientOptions,
        with_graphql: bool,
        version: String,
    ) -> Result<Self, ApiError> {
        let http = HttpClient::new(endpoints.base.as_str(), options)?;
        let graphql = with_graphql.then(|| {
            SplitClient::new(
                HttpLink::new(http.clone(), GRAPHQL_PATH),
                WsLink::new(endpoints.graphql_ws.clone()),
            )
        });
        Ok(Self {
            http,
            graphql,
            version,
        })
    }
}

/// What to show in the application's place.
#[derive(Debug, Clone)]
pub enum View {
    Blocking(String),
    Content(Arc<MainserverContext>),
}

/// Gates the application on server availability and hands out the shared
/// context once ready.
///
/// Endpoints are resolved once at mount. The context is built on the first
/// access after the readiness transition and reused for the provider's
/// lifetime; before that no consumer can reach any client.
pub struct MainserverProvider<C = MainserverClient> {
    gate: AvailabilityGate<C>,
    endpoints: Endpoints,
    options: ClientOptions,
    graphql: bool,
    context: OnceLock<Arc<MainserverContext>>,
}

impl MainserverProvider<MainserverClient> {
    /// Resolve endpoints from `config`, then start checking the real backend.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn mount(config: GateConfig) -> Result<Self, ApiError> {
        let endpoints = config.endpoints()?;
        let checker = MainserverClient::new(endpoints.base.as_str(), &config.client_options())?;
        Ok(Self::with_checker(checker, endpoints, &config))
    }
}

impl<C: HealthCheck + 'static> MainserverProvider<C> {
    /// Start checking with a caller-supplied health check.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_checker(checker: C, endpoints: Endpoints, config: &GateConfig) -> Self {
        info!(base_url = %endpoints.base, mode = %config.mode, "mounting mainserver provider");
        let provider = Self {
            gate: AvailabilityGate::new(checker, config.try_interval),
            endpoints,
            options: config.client_options(),
            graphql: config.graphql,
            context: OnceLock::new(),
        };
        provider.gate.start();
        provider
    }

    pub fn status(&self) -> Status {
        self.gate.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.gate.subscribe()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn view(&self) -> Result<View, ApiError> {
        match self.gate.status() {
            Status::Ready { version } => Ok(View::Content(self.context_for(version)?)),
            status => Ok(View::Blocking(
                status.message().unwrap_or(CHECKING_MESSAGE).to_string(),
            )),
        }
    }

    /// The shared context, only once the backend is ready.
    pub fn context(&self) -> Result<Option<Arc<MainserverContext>>, ApiError> {
        match self.gate.status() {
            Status::Ready { version } => self.context_for(version).map(Some),
            _ => Ok(None),
        }
    }

    /// Wait for readiness and return the shared context.
    pub async fn ready(&self) -> Result<Arc<MainserverContext>, GateError> {
        let version = self.gate.ready().await?;
        Ok(self.context_for(version)?)
    }

    pub fn stop(&self) {
        self.gate.stop();
    }

    fn context_for(&self, version: String) -> Result<Arc<MainserverContext>, ApiError> {
        if let Some(context) = self.context.get() {
            return Ok(Arc::clone(context));
        }
        let built = Arc::new(MainserverContext::build(
            &self.endpoints,
            &self.options,
            self.graphql,
            version,
        )?);
        info!(version = %built.version, graphql = self.graphql, "mainserver context ready");
        Ok(Arc::clone(self.context.get_or_init(|| built)))
    }
}
