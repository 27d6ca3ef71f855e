//! Configuration module for jwtproxy
//!
//! Settings come from command line flags and `JWTPROXY_*` environment
//! variables (environment wins), plus an optional JSON trust-store file.
//! Everything is resolved once at startup into an immutable [`Config`].

use crate::auth::{IssuerKeyStore, KeyStoreError};
use crate::pipeline::health::DEFAULT_HEALTH_PATH;
use http::header::{HeaderName, AUTHORIZATION};
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

mod cli;
mod loader;

pub use cli::Cli;
pub use loader::{environment_pairs, parse_bool, ConfigLoader};

/// Default prefix required of a non-default auth header.
pub const DEFAULT_CUSTOM_HEADER_PREFIX: &str = "X-";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{env} environment variable or --{flag} command line flag not found")]
    Missing {
        env: &'static str,
        flag: &'static str,
    },

    #[error("failed to parse remote URL {url} with error {reason}")]
    InvalidRemoteUrl { url: String, reason: String },

    #[error("Invalid port '{value}' in {name}")]
    InvalidPort { name: &'static str, value: String },

    #[error("could not load {name} with value '{value}', please use a valid boolean value")]
    InvalidBool { name: &'static str, value: String },

    #[error("Non default HTTP Header {header} should start with {prefix}")]
    CustomHeaderPrefix { header: String, prefix: String },

    #[error("Invalid HTTP header name '{0}'")]
    InvalidHeaderName(String),

    #[error("Environment variable {0} is not valid unicode")]
    NonUnicodeEnv(String),

    #[error("could not find a matching JWTPROXY_PUBLIC_KEY_{0} value for JWTPROXY_ISSUER_{0}")]
    UnpairedIssuer(String),

    #[error("Failed to read file {path} with error {source}")]
    KeysFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON file {path} with error {source}")]
    KeysFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error("No trusted issuers configured")]
    NoIssuers,

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete startup configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub pipeline: PipelineConfig,
    pub log_level: String,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub metrics_port: Option<u16>,
}

/// Backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub remote_url: Url,
    /// Host header override; `None` sends the remote URL's host.
    pub host_header: Option<String>,
    pub strict_tls: bool,
}

/// Settings shared by the request stages
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub auth_header: HeaderName,
    pub strip_prefix: String,
    pub health_path: String,
    pub keys: Arc<IssuerKeyStore>,
}

impl PipelineConfig {
    /// Defaults for everything but the trust store.
    pub fn new(keys: Arc<IssuerKeyStore>) -> Self {
        Self {
            auth_header: AUTHORIZATION,
            strip_prefix: String::new(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            keys,
        }
    }
}

impl Config {
    /// Resolve from the parsed flags and the process environment.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let env = environment_pairs(std::env::vars_os())?;
        ConfigLoader::resolve(cli, &env)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.upstream.remote_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidRemoteUrl {
                url: self.upstream.remote_url.to_string(),
                reason: "scheme must be http or https".into(),
            });
        }

        if self.upstream.remote_url.host_str().is_none() {
            return Err(ConfigError::InvalidRemoteUrl {
                url: self.upstream.remote_url.to_string(),
                reason: "missing host".into(),
            });
        }

        if self.pipeline.keys.is_empty() {
            return Err(ConfigError::NoIssuers);
        }

        if !self.pipeline.health_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "Health check path '{}' must start with '/'",
                self.pipeline.health_path
            )));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}': must be one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.server.metrics_port.is_some_and(|p| p != 0 && p == self.server.port) {
            return Err(ConfigError::ValidationError(format!(
                "Metrics port {} collides with the listen port",
                self.server.port
            )));
        }

        Ok(())
    }
}

/// Check a configured auth header name and turn it into a [`HeaderName`].
///
/// `Authorization` is always accepted. Any other name must start with
/// `required_prefix` (ASCII case-insensitive) unless the prefix is empty.
pub fn auth_header_name(name: &str, required_prefix: &str) -> Result<HeaderName, ConfigError> {
    let is_default = name.eq_ignore_ascii_case(AUTHORIZATION.as_str());
    let has_prefix = name
        .get(..required_prefix.len())
        .is_some_and(|start| start.eq_ignore_ascii_case(required_prefix));

    if !is_default && !has_prefix {
        return Err(ConfigError::CustomHeaderPrefix {
            header: name.to_string(),
            prefix: required_prefix.to_string(),
        });
    }

    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))
}
