//! Health check stage

use super::{text_response, GatewayRequest, GatewayResponse, Next, Stage};
use crate::metrics;
use async_trait::async_trait;
use http::StatusCode;

/// Default health check path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Answers `200 OK` on an exact path match, for any method, without
/// consulting later stages.
#[derive(Debug, Clone)]
pub struct HealthCheckStage {
    path: String,
}

impl Default for HealthCheckStage {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_PATH)
    }
}

impl HealthCheckStage {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Stage for HealthCheckStage {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        if request.uri().path() == self.path {
            metrics::record_request(self.name(), StatusCode::OK);
            return text_response(StatusCode::OK, "OK");
        }
        next.run(request).await
    }
}
