//! Bearer token extraction

use super::AuthError;
use http::header::{HeaderName, AUTHORIZATION};
use http::HeaderMap;

/// Pulls a bearer token out of a configurable request header.
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    header: HeaderName,
}

impl Default for TokenExtractor {
    fn default() -> Self {
        Self::new(AUTHORIZATION)
    }
}

impl TokenExtractor {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Extract the token.
    ///
    /// `Ok(None)` means the caller sent no credentials at all, which is not an
    /// error at this layer.
    pub fn extract(&self, headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        let Some(value) = headers.get(&self.header) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| AuthError::MalformedAuthHeader)?;
        if value.is_empty() {
            return Ok(None);
        }

        let mut fields = value.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                Ok(Some(token.to_string()))
            }
            _ => Err(AuthError::MalformedAuthHeader),
        }
    }
}
