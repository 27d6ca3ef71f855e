//! HTTP server module
//!
//! Accepts connections and feeds every request through the [`Pipeline`].

use crate::auth::{SharedClock, SystemClock};
use crate::config::Config;
use crate::pipeline::{
    text_response, ForwardError, ForwardingStage, GatewayResponse, Pipeline, RemoteAddr,
};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address {addr}: {source}")]
    BindError {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP Server
pub struct Server {
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
}

impl Server {
    /// Bind a listener for `pipeline`.
    pub async fn bind(addr: SocketAddr, pipeline: Pipeline) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindError { addr, source })?;

        Ok(Self {
            listener,
            pipeline: Arc::new(pipeline),
        })
    }

    /// Build the standard pipeline from `config` and bind all interfaces on
    /// the configured port.
    pub async fn from_config(config: &Config) -> Result<Self, ServerError> {
        let clock: SharedClock = Arc::new(SystemClock);
        let forwarder = ForwardingStage::new(&config.upstream, config.pipeline.auth_header.clone())?;
        let pipeline = Pipeline::standard(&config.pipeline, clock, forwarder);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        Self::bind(addr, pipeline).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::RuntimeError(e.to_string()))
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` completes. Connections already accepted finish
    /// on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            addr = %self.local_addr()?,
            stages = ?self.pipeline.stage_names(),
            "Starting server"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let pipeline = Arc::clone(&self.pipeline);
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let pipeline = Arc::clone(&pipeline);
                            async move { Ok::<_, Infallible>(dispatch(&pipeline, req, peer).await) }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(error = %e, peer = %peer, "Connection closed with error");
                        }
                    });
                }
            }
        }

        info!("Shutting down server");
        Ok(())
    }
}

/// Buffer the body, tag the peer address and run the pipeline.
async fn dispatch(pipeline: &Pipeline, request: Request<Incoming>, peer: SocketAddr) -> GatewayResponse {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, peer = %peer, "Failed to read request body");
            return text_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(RemoteAddr(peer));
    pipeline.handle(request).await
}
