//! Request pipeline
//!
//! A pipeline is an ordered list of [`Stage`]s. Each stage receives the
//! request and a [`Next`] handle to the rest of the chain; it either answers
//! the request itself or passes it (possibly modified) to `next`.
//!
//! ```text
//! LoggingStage -> HealthCheckStage -> AuthenticationStage -> PathRewriteStage -> ForwardingStage
//! ```
//!
//! `Next::run` consumes the handle, so a stage can call its delegate at most
//! once, and the delegate's response is only available by awaiting it.

use crate::auth::SharedClock;
use crate::config::PipelineConfig;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

pub mod auth;
pub mod forward;
pub mod health;
pub mod logging;
pub mod rewrite;

pub use auth::AuthenticationStage;
pub use forward::{ForwardError, ForwardingStage};
pub use health::HealthCheckStage;
pub use logging::{AccessLog, LoggingStage};
pub use rewrite::PathRewriteStage;

/// Request as seen by stages. The body is fully buffered.
pub type GatewayRequest = Request<Bytes>;

/// Response produced by a stage.
pub type GatewayResponse = Response<Full<Bytes>>;

/// Peer address of the connection a request arrived on.
///
/// Inserted into request extensions by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// One link in the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handle a request, either answering it or delegating to `next`.
    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> GatewayResponse;
}

/// The remainder of the chain after the current stage.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    /// Pass the request to the next stage.
    ///
    /// When no stage is left the chain answers `404 Not Found`.
    pub async fn run(self, request: GatewayRequest) -> GatewayResponse {
        match self.rest.split_first() {
            Some((stage, rest)) => stage.handle(request, Next { rest }).await,
            None => text_response(StatusCode::NOT_FOUND, "Not Found"),
        }
    }
}

/// An assembled chain of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Production chain: logging, health check, authentication, path rewrite,
    /// forwarding.
    pub fn standard(
        config: &PipelineConfig,
        clock: SharedClock,
        forwarder: ForwardingStage,
    ) -> Self {
        Self::builder()
            .stage(LoggingStage::new(Arc::clone(&clock), AccessLog::stdio()))
            .stage(HealthCheckStage::new(config.health_path.clone()))
            .stage(AuthenticationStage::new(
                config.auth_header.clone(),
                Arc::clone(&config.keys),
                clock,
            ))
            .stage(PathRewriteStage::new(config.strip_prefix.clone()))
            .stage(forwarder)
            .build()
    }

    /// Run a request through the whole chain.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        Next {
            rest: &self.stages,
        }
        .run(request)
        .await
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for [`Pipeline`]. Stages run in the order they are added.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// Plain-text response with the given status.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> GatewayResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
