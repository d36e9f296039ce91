//! Built-in services.
//!
//! Every [`crate::Server`] registers these next to the application services:
//! - `grpc.health.v1.Health`: per-service serving status
//! - `shoprpc.MetaService`: discovery of services and their methods

mod health_check;
pub use health_check::{
    Health, HealthCheckRequest, HealthCheckResponse, HealthReporter, ServingStatus, health,
};

mod meta;
pub use meta::{MetaService, MethodInfo, Reflection, ServiceInfo, meta_service};
