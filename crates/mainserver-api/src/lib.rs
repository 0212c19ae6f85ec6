pub mod client;
pub mod endpoints;
pub mod graphql;
pub mod health;
pub mod link;
pub mod mainserver;
pub mod split;
pub mod ws;

pub use client::{ApiError, ClientOptions, HttpClient};
pub use endpoints::{BuildMode, Endpoints};
pub use graphql::{GraphQlError, GraphQlRequest, GraphQlResponse, OperationKind};
pub use health::{HealthCheck, HealthOutcome, Liveness};
pub use link::{HttpLink, RequestLink, ResponseStream, StreamingLink};
pub use mainserver::MainserverClient;
pub use split::{Routed, SplitClient};
pub use ws::WsLink;
