use futures::stream::BoxStream;

use crate::client::{ApiError, HttpClient};
use crate::graphql::{GraphQlRequest, GraphQlResponse};

/// Stream of results produced by a subscription.
pub type ResponseStream = BoxStream<'static, Result<GraphQlResponse, ApiError>>;

/// Request/response transport for queries and mutations.
pub trait RequestLink: Send + Sync {
    fn execute(
        &self,
        request: &GraphQlRequest,
    ) -> impl std::future::Future<Output = Result<GraphQlResponse, ApiError>> + Send;
}

/// Persistent duplex transport for subscriptions.
pub trait StreamingLink: Send + Sync {
    fn subscribe(
        &self,
        request: GraphQlRequest,
    ) -> impl std::future::Future<Output = Result<ResponseStream, ApiError>> + Send;
}

/// GraphQL over plain HTTP: `POST {base_url}/graphql`.
#[derive(Debug, Clone)]
pub struct HttpLink {
    http: HttpClient,
    path: String,
}

impl HttpLink {
    pub fn new(http: HttpClient, path: impl Into<String>) -> Self {
        Self {
            http,
            path: path.into(),
        }
    }
}

impl RequestLink for HttpLink {
    async fn execute(&self, request: &GraphQlRequest) -> Result<GraphQlResponse, ApiError> {
        self.http.post(&self.path, request).await
    }
}
