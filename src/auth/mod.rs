//! Authentication module
//!
//! Bearer token extraction and RS256 validation against a multi-issuer
//! trust store. Every failure is an [`AuthError`] carrying the detailed
//! cause, and each cause maps onto exactly one user-facing [`RejectionKind`].

use thiserror::Error;

pub mod clock;
pub mod extractor;
pub mod jwt;
pub mod keystore;
pub mod token;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use extractor::TokenExtractor;
pub use jwt::TokenValidator;
pub use keystore::{IssuerKeyStore, KeyStoreError};
pub use token::{ParsedToken, RawToken, RegisteredClaims};

/// The only signature algorithm accepted.
pub const PINNED_ALGORITHM: &str = "RS256";

/// User-facing rejection classes. Each maps to a fixed 401 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    TokenMissing,
    MalformedAuthHeader,
    MalformedToken,
    UnsupportedSigningAlgorithm,
    ClaimsFormatInvalid,
    TokenExpired,
    IssuerNotTrusted,
}

impl RejectionKind {
    /// Response body sent with the 401.
    pub fn body(&self) -> &'static str {
        match self {
            RejectionKind::TokenMissing => "Required authorization token not found",
            RejectionKind::MalformedAuthHeader => {
                "Authorization header format must be Bearer {token}"
            }
            RejectionKind::MalformedToken => "invalid character",
            RejectionKind::UnsupportedSigningAlgorithm => {
                "invalid signing algorithm, expected \"RS256\""
            }
            RejectionKind::ClaimsFormatInvalid => "invalid claims",
            RejectionKind::TokenExpired => "token expired",
            RejectionKind::IssuerNotTrusted => "iss not valid",
        }
    }

    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::TokenMissing => "token_missing",
            RejectionKind::MalformedAuthHeader => "malformed_auth_header",
            RejectionKind::MalformedToken => "malformed_token",
            RejectionKind::UnsupportedSigningAlgorithm => "unsupported_signing_algorithm",
            RejectionKind::ClaimsFormatInvalid => "claims_format_invalid",
            RejectionKind::TokenExpired => "token_expired",
            RejectionKind::IssuerNotTrusted => "issuer_not_trusted",
        }
    }
}

/// Authentication errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Missing authentication")]
    TokenMissing,

    #[error("Authorization header is not of the form 'Bearer <token>'")]
    MalformedAuthHeader,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported signing algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    #[error("Token has no expiry")]
    MissingExpiry,

    #[error("Token expired at {expired_at}")]
    TokenExpired { expired_at: i64 },

    #[error("Token not valid before {not_before}")]
    NotYetValid { not_before: i64 },

    #[error("Token has no issuer")]
    MissingIssuer,

    #[error("Issuer '{0}' is not trusted")]
    UntrustedIssuer(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Signature could not be checked: {0}")]
    SignatureMalformed(String),
}

impl AuthError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            AuthError::TokenMissing => RejectionKind::TokenMissing,
            AuthError::MalformedAuthHeader => RejectionKind::MalformedAuthHeader,
            AuthError::MalformedToken(_) | AuthError::SignatureMalformed(_) => {
                RejectionKind::MalformedToken
            }
            AuthError::UnsupportedAlgorithm(_) | AuthError::SignatureInvalid(_) => {
                RejectionKind::UnsupportedSigningAlgorithm
            }
            AuthError::InvalidClaims(_) => RejectionKind::ClaimsFormatInvalid,
            AuthError::MissingExpiry
            | AuthError::TokenExpired { .. }
            | AuthError::NotYetValid { .. } => RejectionKind::TokenExpired,
            AuthError::MissingIssuer | AuthError::UntrustedIssuer(_) => {
                RejectionKind::IssuerNotTrusted
            }
        }
    }
}

/// A caller whose token passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct Authenticated {
    pub issuer: String,
    pub claims: RegisteredClaims,
}

/// Result of validating one token.
pub type ValidationOutcome = Result<Authenticated, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_bodies() {
        assert_eq!(
            RejectionKind::TokenMissing.body(),
            "Required authorization token not found"
        );
        assert_eq!(
            RejectionKind::UnsupportedSigningAlgorithm.body(),
            r#"invalid signing algorithm, expected "RS256""#
        );
        assert_eq!(RejectionKind::IssuerNotTrusted.body(), "iss not valid");
    }

    #[test]
    fn test_signature_failures_map_to_distinct_causes() {
        let crypto = AuthError::SignatureInvalid("InvalidSignature".into());
        let structural = AuthError::SignatureMalformed("Base64".into());
        assert_ne!(crypto, structural);
        assert_eq!(crypto.kind(), RejectionKind::UnsupportedSigningAlgorithm);
        assert_eq!(structural.kind(), RejectionKind::MalformedToken);
    }

    #[test]
    fn test_expiry_family_maps_to_token_expired() {
        for err in [
            AuthError::MissingExpiry,
            AuthError::TokenExpired { expired_at: 0 },
            AuthError::NotYetValid { not_before: 0 },
        ] {
            assert_eq!(err.kind(), RejectionKind::TokenExpired);
        }
    }
}
