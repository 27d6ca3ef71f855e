//! Compact token parsing
//!
//! Splits a `header.claims.signature` token into its segments and decodes
//! them without checking the signature. Nothing produced here is trusted:
//! the unverified claims are only used to pick a verification key and to
//! fail fast.

use super::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Maximum accepted token length in bytes (8KB).
///
/// Larger tokens are rejected before any decoding.
pub const MAX_TOKEN_BYTES: usize = 8192;

/// The three segments of a compact token, borrowed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawToken<'a> {
    pub header: &'a str,
    pub claims: &'a str,
    pub signature: &'a str,
}

impl<'a> RawToken<'a> {
    /// Split a token into exactly three non-empty segments.
    pub fn split(token: &'a str) -> Result<Self, AuthError> {
        if token.len() > MAX_TOKEN_BYTES {
            return Err(AuthError::MalformedToken(format!(
                "token is {} bytes, limit is {}",
                token.len(),
                MAX_TOKEN_BYTES
            )));
        }

        let mut segments = token.split('.');
        match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(header), Some(claims), Some(signature), None)
                if !header.is_empty() && !claims.is_empty() && !signature.is_empty() =>
            {
                Ok(Self {
                    header,
                    claims,
                    signature,
                })
            }
            _ => Err(AuthError::MalformedToken(
                "expected three non-empty segments".into(),
            )),
        }
    }

    /// Decode every segment and parse the header.
    pub fn parse(self) -> Result<ParsedToken, AuthError> {
        let header_bytes = decode_segment("header", self.header)?;
        let claims = decode_segment("claims", self.claims)?;
        let signature = decode_segment("signature", self.signature)?;

        let header = match serde_json::from_slice::<Value>(&header_bytes) {
            Ok(Value::Object(map)) => serde_json::from_value::<TokenHeader>(Value::Object(map))
                .map_err(|e| AuthError::MalformedToken(format!("header: {e}")))?,
            Ok(_) => {
                return Err(AuthError::MalformedToken(
                    "header is not a JSON object".into(),
                ))
            }
            Err(e) => return Err(AuthError::MalformedToken(format!("header: {e}"))),
        };

        Ok(ParsedToken {
            header,
            claims,
            signature,
        })
    }
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("{name} segment: {e}")))
}

/// JOSE header fields we look at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
}

/// A token whose structure is valid but whose signature is unchecked.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub header: TokenHeader,
    claims: Vec<u8>,
    signature: Vec<u8>,
}

impl ParsedToken {
    /// Declared signing algorithm, empty when the header has none.
    pub fn algorithm(&self) -> &str {
        self.header.alg.as_deref().unwrap_or_default()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Decode the claims WITHOUT verifying the signature.
    pub fn unverified_claims(&self) -> Result<RegisteredClaims, AuthError> {
        match serde_json::from_slice::<Value>(&self.claims) {
            Ok(Value::Object(map)) => RegisteredClaims::from_map(map),
            Ok(_) => Err(AuthError::InvalidClaims(
                "claims are not a JSON object".into(),
            )),
            Err(e) => Err(AuthError::InvalidClaims(e.to_string())),
        }
    }
}

/// `aud` is either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// Registered claims plus everything else the token carries.
///
/// Time claims are Unix seconds; fractional values are truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Private claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegisteredClaims {
    /// Interpret a claims object. Wrongly typed registered claims fail.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, AuthError> {
        serde_json::from_value(Value::Object(map))
            .map_err(|e| AuthError::InvalidClaims(e.to_string()))
    }
}

fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<f64>::deserialize(deserializer)?;
    Ok(secs.map(|s| s.trunc() as i64))
}
