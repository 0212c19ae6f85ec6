use tracing::debug;

use crate::client::ApiError;
use crate::graphql::{GraphQlRequest, GraphQlResponse, OperationKind};
use crate::link::{HttpLink, RequestLink, ResponseStream, StreamingLink};
use crate::ws::WsLink;

/// Result of an operation routed through a [`SplitClient`].
pub enum Routed {
    /// Query or mutation answered over the standard link.
    Response(GraphQlResponse),
    /// Subscription events arriving over the streaming link.
    Stream(ResponseStream),
}

impl std::fmt::Debug for Routed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Routed::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Routed::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// GraphQL client that splits operations by kind: subscriptions go to the
/// streaming link, everything else to the standard request/response link.
#[derive(Debug)]
pub struct SplitClient<R = HttpLink, S = WsLink> {
    standard: R,
    streaming: S,
}

impl<R: RequestLink, S: StreamingLink> SplitClient<R, S> {
    pub fn new(standard: R, streaming: S) -> Self {
        Self {
            standard,
            streaming,
        }
    }

    pub async fn execute(&self, request: GraphQlRequest) -> Result<Routed, ApiError> {
        match request.kind() {
            OperationKind::Subscription => {
                debug!(operation = ?request.operation_name, "routing to streaming link");
                Ok(Routed::Stream(self.streaming.subscribe(request).await?))
            }
            kind => {
                debug!(?kind, operation = ?request.operation_name, "routing to standard link");
                Ok(Routed::Response(self.standard.execute(&request).await?))
            }
        }
    }

    pub fn streaming(&self) -> &S {
        &self.streaming
    }
}
