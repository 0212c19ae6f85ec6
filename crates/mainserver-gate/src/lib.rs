pub mod config;
pub mod gate;
pub mod metrics;
pub mod provider;
pub mod telemetry;

pub use config::GateConfig;
pub use gate::{AvailabilityGate, GateError, Status};
pub use provider::{MainserverContext, MainserverProvider, View};
