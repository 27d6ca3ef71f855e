//! Issuer trust store
//!
//! Maps each trusted issuer to the RSA public key its tokens must be signed
//! with. Keys are parsed once when the store is built, so a bad PEM is a
//! startup error rather than a per-request one.

use jsonwebtoken::DecodingKey;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Trust store construction errors
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Invalid RSA public key for issuer '{issuer}': {reason}")]
    InvalidKey { issuer: String, reason: String },

    #[error("Issuer name cannot be empty")]
    EmptyIssuer,
}

/// Immutable `issuer -> public key` mapping.
#[derive(Clone, Default)]
pub struct IssuerKeyStore {
    keys: HashMap<String, DecodingKey>,
}

impl IssuerKeyStore {
    /// Build a store from PEM-encoded RSA public keys keyed by issuer.
    pub fn from_pem_map<I, K, V>(entries: I) -> Result<Self, KeyStoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut keys = HashMap::new();
        for (issuer, pem) in entries {
            let issuer = issuer.into();
            if issuer.is_empty() {
                return Err(KeyStoreError::EmptyIssuer);
            }
            let key = DecodingKey::from_rsa_pem(pem.as_ref().as_bytes()).map_err(|e| {
                KeyStoreError::InvalidKey {
                    issuer: issuer.clone(),
                    reason: e.to_string(),
                }
            })?;
            keys.insert(issuer, key);
        }
        Ok(Self { keys })
    }

    /// Look up the verification key for an issuer (exact match).
    pub fn get(&self, issuer: &str) -> Option<&DecodingKey> {
        self.keys.get(issuer)
    }

    pub fn contains(&self, issuer: &str) -> bool {
        self.keys.contains_key(issuer)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Trusted issuers, sorted.
    pub fn issuers(&self) -> Vec<&str> {
        let mut issuers: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        issuers.sort_unstable();
        issuers
    }
}

impl fmt::Debug for IssuerKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerKeyStore")
            .field("issuers", &self.issuers())
            .finish()
    }
}

impl TryFrom<BTreeMap<String, String>> for IssuerKeyStore {
    type Error = KeyStoreError;

    fn try_from(entries: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pem_map(entries)
    }
}
