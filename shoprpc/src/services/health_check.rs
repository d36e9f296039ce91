use foldhash::fast::RandomState;
use serde::{Deserialize, Serialize};

use crate::{Context, Error, ErrorKind, ResponseSink, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
    ServiceUnknown,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthCheckRequest {
    /// Service to check. Empty means the server as a whole.
    #[serde(default)]
    pub service: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResponse {
    pub status: ServingStatus,
}

#[crate::service(package = "grpc.health.v1")]
pub trait Health {
    async fn check(&self, ctx: &Context, req: HealthCheckRequest) -> Result<HealthCheckResponse>;

    async fn watch(
        &self,
        ctx: &Context,
        req: HealthCheckRequest,
        sink: ResponseSink<HealthCheckResponse>,
    ) -> Result<()>;
}

/// Serving status of each service of a server.
///
/// `watch` is left unimplemented: status is polled with `check`.
#[derive(Debug, Default)]
pub struct HealthReporter {
    statuses: dashmap::DashMap<String, ServingStatus, RandomState>,
}

impl HealthReporter {
    pub fn set_status(&self, service: impl Into<String>, status: ServingStatus) {
        let service = service.into();
        tracing::info!("health of {:?} set to {:?}", service, status);
        self.statuses.insert(service, status);
    }

    /// Marks every known service, and the server itself, with `status`.
    pub fn set_all(&self, status: ServingStatus) {
        for mut entry in self.statuses.iter_mut() {
            *entry.value_mut() = status;
        }
    }

    #[must_use]
    pub fn status(&self, service: &str) -> Option<ServingStatus> {
        self.statuses.get(service).map(|s| *s)
    }
}

impl Health for HealthReporter {
    async fn check(&self, _: &Context, req: HealthCheckRequest) -> Result<HealthCheckResponse> {
        match self.status(&req.service) {
            Some(status) => Ok(HealthCheckResponse { status }),
            None => Err(Error::new(
                ErrorKind::NotFound,
                format!("unknown service {:?}", req.service),
            )),
        }
    }
}
