//! JWT Validation
//!
//! RS256-only validation against an [`IssuerKeyStore`]. The declared
//! algorithm is pinned before any key is touched, so an RSA public key can
//! never be used as an HMAC secret and `alg: none` is never accepted.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. split and decode the compact serialization
//! 2. pin the header algorithm to RS256
//! 3. peek at the unverified claims (`exp` present, `iss` trusted)
//! 4. verify the signature with the issuer's key
//! 5. check `exp`/`nbf` on the claims returned by verification
//!
//! The peek in step 3 only selects the key; the accept decision is made on
//! verified claims alone.

use super::keystore::IssuerKeyStore;
use super::token::{RawToken, RegisteredClaims};
use super::{AuthError, Authenticated, ValidationOutcome, PINNED_ALGORITHM};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::sync::Arc;

/// RS256 token validator backed by a shared trust store.
///
/// # Example
///
/// ```
/// use jwtproxy::auth::{IssuerKeyStore, TokenValidator, RejectionKind};
/// use std::sync::Arc;
///
/// let validator = TokenValidator::new(Arc::new(IssuerKeyStore::default()));
/// let outcome = validator.validate("not-a-token", chrono::Utc::now());
/// assert_eq!(outcome.unwrap_err().kind(), RejectionKind::MalformedToken);
/// ```
#[derive(Debug, Clone)]
pub struct TokenValidator {
    keys: Arc<IssuerKeyStore>,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(keys: Arc<IssuerKeyStore>) -> Self {
        // Signature and algorithm only; time claims are checked against the
        // injected clock, not the system time jsonwebtoken would use.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims::<&str>(&[]);

        Self { keys, validation }
    }

    /// Validate a compact token as of `now`.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> ValidationOutcome {
        let parsed = RawToken::split(token)?.parse()?;

        let alg = parsed.algorithm();
        if alg != PINNED_ALGORITHM {
            return Err(AuthError::UnsupportedAlgorithm(alg.to_string()));
        }

        let unverified = parsed.unverified_claims()?;
        if unverified.exp.is_none() {
            return Err(AuthError::MissingExpiry);
        }
        let issuer = unverified.iss.ok_or(AuthError::MissingIssuer)?;
        let key = self
            .keys
            .get(&issuer)
            .ok_or_else(|| AuthError::UntrustedIssuer(issuer.clone()))?;

        let verified = self.verify_signature(token, key)?;

        if verified.iss.as_deref() != Some(issuer.as_str()) {
            return Err(AuthError::UntrustedIssuer(
                verified.iss.unwrap_or_default(),
            ));
        }
        check_time_claims(&verified, now)?;

        tracing::debug!(
            issuer = %issuer,
            subject = verified.sub.as_deref().unwrap_or(""),
            "Token validated"
        );

        Ok(Authenticated {
            issuer,
            claims: verified,
        })
    }

    fn verify_signature(
        &self,
        token: &str,
        key: &DecodingKey,
    ) -> Result<RegisteredClaims, AuthError> {
        let token_data =
            decode::<Map<String, Value>>(token, key, &self.validation).map_err(|e| match e
                .kind()
            {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::RsaFailedSigning
                | ErrorKind::Crypto(_) => AuthError::SignatureInvalid(e.to_string()),
                _ => AuthError::SignatureMalformed(e.to_string()),
            })?;

        RegisteredClaims::from_map(token_data.claims)
    }
}

/// Check `exp` and `nbf` against `now`.
///
/// A token is expired at its `exp` second, and a missing `exp` counts as
/// expired.
pub fn check_time_claims(claims: &RegisteredClaims, now: DateTime<Utc>) -> Result<(), AuthError> {
    let now = now.timestamp();

    let exp = claims.exp.ok_or(AuthError::MissingExpiry)?;
    if exp <= now {
        return Err(AuthError::TokenExpired { expired_at: exp });
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now {
            return Err(AuthError::NotYetValid { not_before: nbf });
        }
    }

    Ok(())
}
