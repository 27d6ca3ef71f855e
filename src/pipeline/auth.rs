//! Authentication stage

use super::{text_response, GatewayRequest, GatewayResponse, Next, Stage};
use crate::auth::{
    AuthError, IssuerKeyStore, SharedClock, TokenExtractor, TokenValidator, ValidationOutcome,
};
use crate::metrics;
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, WWW_AUTHENTICATE};
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rejects requests without a valid bearer token; passes the rest through
/// unchanged.
#[derive(Debug, Clone)]
pub struct AuthenticationStage {
    extractor: TokenExtractor,
    validator: TokenValidator,
    clock: SharedClock,
}

impl AuthenticationStage {
    pub fn new(header: HeaderName, keys: Arc<IssuerKeyStore>, clock: SharedClock) -> Self {
        Self {
            extractor: TokenExtractor::new(header),
            validator: TokenValidator::new(keys),
            clock,
        }
    }

    /// Authenticate a request without running the rest of the chain.
    pub fn authenticate(&self, request: &GatewayRequest) -> ValidationOutcome {
        let token = self
            .extractor
            .extract(request.headers())?
            .ok_or(AuthError::TokenMissing)?;
        self.validator.validate(&token, self.clock.now())
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        match self.authenticate(&request) {
            Ok(authenticated) => {
                debug!(
                    issuer = %authenticated.issuer,
                    path = %request.uri().path(),
                    "Request authenticated"
                );
                metrics::record_auth_attempt(None);
                next.run(request).await
            }
            Err(error) => {
                let kind = error.kind();
                warn!(
                    reason = kind.as_str(),
                    error = %error,
                    path = %request.uri().path(),
                    "Authentication rejected"
                );
                metrics::record_auth_attempt(Some(kind));
                metrics::record_request(self.name(), StatusCode::UNAUTHORIZED);
                unauthorized(&error)
            }
        }
    }
}

fn unauthorized(error: &AuthError) -> GatewayResponse {
    let mut response = text_response(StatusCode::UNAUTHORIZED, error.kind().body());
    let challenge = match error {
        AuthError::TokenMissing => "Bearer",
        AuthError::MalformedAuthHeader => "Bearer error=\"invalid_request\"",
        _ => "Bearer error=\"invalid_token\"",
    };
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    response
}
