//! Path prefix rewriting
//!
//! A load balancer sends `https://example.com/api/user?id=1` to us; the
//! backend expects `/user?id=1`. This stage strips the `/api` part.

use super::{text_response, GatewayRequest, GatewayResponse, Next, Stage};
use crate::metrics;
use async_trait::async_trait;
use http::uri::{PathAndQuery, Uri};
use http::StatusCode;
use thiserror::Error;
use tracing::error;

/// Rewrite errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Error trimming prefix '{prefix}' from '{original}', could not parse resulting URL of '{remainder}'")]
pub struct RewriteError {
    pub prefix: String,
    pub original: String,
    pub remainder: String,
}

/// Strips a configured prefix from the request path.
#[derive(Debug, Clone, Default)]
pub struct PathRewriteStage {
    prefix: String,
}

impl PathRewriteStage {
    /// An empty prefix disables rewriting. Separators at either end of the
    /// prefix are ignored, so `api`, `/api` and `/api/` all strip `/api`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Strip the prefix from a path-and-query string.
    ///
    /// The result always starts with exactly one `/`; the query is untouched.
    pub fn rewrite(&self, original: &str) -> Result<PathAndQuery, RewriteError> {
        let stripped = original.strip_prefix(&self.prefix).unwrap_or(original);
        let remainder = format!("/{}", stripped.trim_start_matches('/'));
        remainder.parse::<PathAndQuery>().map_err(|_| RewriteError {
            prefix: self.prefix.clone(),
            original: original.to_string(),
            remainder,
        })
    }
}

#[async_trait]
impl Stage for PathRewriteStage {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    async fn handle(&self, mut request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        if self.prefix.is_empty() {
            return next.run(request).await;
        }

        let original = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        let rewritten = self.rewrite(&original).and_then(|path_and_query| {
            let mut parts = request.uri().clone().into_parts();
            parts.path_and_query = Some(path_and_query);
            Uri::from_parts(parts).map_err(|_| RewriteError {
                prefix: self.prefix.clone(),
                original: original.clone(),
                remainder: original.clone(),
            })
        });

        match rewritten {
            Ok(uri) => {
                *request.uri_mut() = uri;
                next.run(request).await
            }
            Err(e) => {
                error!(error = %e, "Path rewrite failed");
                metrics::record_request(self.name(), StatusCode::INTERNAL_SERVER_ERROR);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}
