//! Configuration loader
//!
//! Merges command line flags with `JWTPROXY_*` environment variables. The
//! environment is passed in as a list of pairs so resolution never reads
//! process state directly.

use super::{
    auth_header_name, Cli, Config, ConfigError, PipelineConfig, ServerConfig, UpstreamConfig,
    DEFAULT_CUSTOM_HEADER_PREFIX, DEFAULT_LOG_LEVEL,
};
use crate::auth::IssuerKeyStore;
use crate::pipeline::health::DEFAULT_HEALTH_PATH;
use reqwest::Url;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ENV_REMOTE_URL: &str = "JWTPROXY_REMOTE_URL";
pub const ENV_REMOTE_HOST_HEADER: &str = "JWTPROXY_REMOTE_HOST_HEADER";
pub const ENV_CONFIG: &str = "JWTPROXY_CONFIG";
pub const ENV_LISTEN_PORT: &str = "JWTPROXY_LISTEN_PORT";
pub const ENV_HEALTHCHECK_URI: &str = "JWTPROXY_HEALTHCHECK_URI";
pub const ENV_PREFIX: &str = "JWTPROXY_PREFIX";
pub const ENV_HEADER: &str = "JWTPROXY_HEADER";
pub const ENV_CUSTOM_HEADER_PREFIX: &str = "JWTPROXY_CUSTOM_HEADER_PREFIX";
pub const ENV_STRICT_SSL: &str = "JWTPROXY_STRICT_SSL";
pub const ENV_METRICS_PORT: &str = "JWTPROXY_METRICS_PORT";
pub const ENV_LOG_LEVEL: &str = "JWTPROXY_LOG_LEVEL";

const ENV_PREFIX_ALL: &str = "JWTPROXY_";
const ISSUER_PREFIX: &str = "JWTPROXY_ISSUER_";
const PUBLIC_KEY_PREFIX: &str = "JWTPROXY_PUBLIC_KEY_";

/// Configuration loader
pub struct ConfigLoader<'a> {
    cli: &'a Cli,
    env: BTreeMap<&'a str, &'a str>,
}

impl<'a> ConfigLoader<'a> {
    /// Resolve and validate a [`Config`].
    pub fn resolve(cli: &'a Cli, env: &'a [(String, String)]) -> Result<Config, ConfigError> {
        let loader = Self {
            cli,
            env: env
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        };

        let remote_url = loader.remote_url()?;
        let port = loader.port()?;
        let metrics_port = loader.metrics_port()?;
        let auth_header = loader.auth_header()?;
        let strict_tls = loader.strict_tls()?;

        let config = Config {
            server: ServerConfig { port, metrics_port },
            upstream: UpstreamConfig {
                remote_url,
                host_header: loader.setting(ENV_REMOTE_HOST_HEADER, &cli.remote_host_header),
                strict_tls,
            },
            pipeline: PipelineConfig {
                auth_header,
                strip_prefix: loader
                    .setting(ENV_PREFIX, &cli.prefix)
                    .unwrap_or_default(),
                health_path: loader
                    .setting(ENV_HEALTHCHECK_URI, &cli.health)
                    .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string()),
                keys: Arc::new(loader.keys()?),
            },
            log_level: loader
                .setting(ENV_LOG_LEVEL, &cli.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Non-empty environment value.
    fn env(&self, name: &str) -> Option<&'a str> {
        self.env.get(name).copied().filter(|v| !v.is_empty())
    }

    /// Environment first, then the flag.
    fn setting(&self, name: &str, flag: &Option<String>) -> Option<String> {
        self.env(name)
            .map(str::to_string)
            .or_else(|| flag.clone().filter(|v| !v.is_empty()))
    }

    fn remote_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .setting(ENV_REMOTE_URL, &self.cli.remote_url)
            .ok_or(ConfigError::Missing {
                env: ENV_REMOTE_URL,
                flag: "remote-url",
            })?;
        Url::parse(&raw).map_err(|e| ConfigError::InvalidRemoteUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })
    }

    fn port(&self) -> Result<u16, ConfigError> {
        match self.env(ENV_LISTEN_PORT) {
            Some(value) => parse_port(ENV_LISTEN_PORT, value),
            None => self.cli.port.ok_or(ConfigError::Missing {
                env: ENV_LISTEN_PORT,
                flag: "port",
            }),
        }
    }

    fn metrics_port(&self) -> Result<Option<u16>, ConfigError> {
        match self.env(ENV_METRICS_PORT) {
            Some(value) => parse_port(ENV_METRICS_PORT, value).map(Some),
            None => Ok(self.cli.metrics_port),
        }
    }

    fn strict_tls(&self) -> Result<bool, ConfigError> {
        match self.env.get(ENV_STRICT_SSL) {
            Some(value) => parse_bool(value).ok_or_else(|| ConfigError::InvalidBool {
                name: ENV_STRICT_SSL,
                value: value.to_string(),
            }),
            None => Ok(self.cli.strict_tls.unwrap_or(true)),
        }
    }

    fn auth_header(&self) -> Result<http::HeaderName, ConfigError> {
        let name = self
            .setting(ENV_HEADER, &self.cli.auth_header)
            .unwrap_or_else(|| http::header::AUTHORIZATION.to_string());
        // An explicitly empty prefix disables the check, so read it unfiltered.
        let prefix = self
            .env
            .get(ENV_CUSTOM_HEADER_PREFIX)
            .map(|v| v.to_string())
            .or_else(|| self.cli.custom_header_prefix.clone())
            .unwrap_or_else(|| DEFAULT_CUSTOM_HEADER_PREFIX.to_string());
        auth_header_name(&name, &prefix)
    }

    /// Environment pairs first; entries from the JSON file replace them.
    fn keys(&self) -> Result<IssuerKeyStore, ConfigError> {
        let mut pems = keys_from_environment(self.env.iter().map(|(k, v)| (*k, *v)))?;

        let path = self
            .env(ENV_CONFIG)
            .map(PathBuf::from)
            .or_else(|| self.cli.keys.clone());
        if let Some(path) = path {
            pems.extend(keys_from_file(&path)?);
        }

        if pems.is_empty() {
            return Err(ConfigError::NoIssuers);
        }
        Ok(IssuerKeyStore::try_from(pems)?)
    }
}

/// Convert raw process environment entries into string pairs.
///
/// Entries that are not valid unicode are skipped unless they belong to us,
/// in which case they are an error.
pub fn environment_pairs(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    for (name, value) in vars {
        match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => pairs.push((name, value)),
            (Ok(name), Err(_)) if name.starts_with(ENV_PREFIX_ALL) => {
                return Err(ConfigError::NonUnicodeEnv(name));
            }
            (Err(name), _) if name.to_string_lossy().starts_with(ENV_PREFIX_ALL) => {
                return Err(ConfigError::NonUnicodeEnv(
                    name.to_string_lossy().into_owned(),
                ));
            }
            _ => {}
        }
    }
    Ok(pairs)
}

/// Zip `JWTPROXY_ISSUER_<suffix>` with `JWTPROXY_PUBLIC_KEY_<suffix>`.
///
/// Every issuer needs a key with the same suffix. Keys without an issuer
/// are ignored.
pub fn keys_from_environment<'a>(
    env: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut issuers = BTreeMap::new();
    let mut keys = BTreeMap::new();

    for (name, value) in env {
        if let Some(suffix) = name.strip_prefix(ISSUER_PREFIX) {
            issuers.insert(suffix, value);
        } else if let Some(suffix) = name.strip_prefix(PUBLIC_KEY_PREFIX) {
            keys.insert(suffix, value);
        }
    }

    issuers
        .into_iter()
        .map(|(suffix, issuer)| {
            keys.get(suffix)
                .map(|key| (issuer.to_string(), key.to_string()))
                .ok_or_else(|| ConfigError::UnpairedIssuer(suffix.to_string()))
        })
        .collect()
}

/// Read an `issuer -> PEM` JSON object.
pub fn keys_from_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let data = std::fs::read(path).map_err(|source| ConfigError::KeysFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ConfigError::KeysFileParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Boolean spellings accepted for `JWTPROXY_STRICT_SSL`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_port(name: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidPort {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_keys_from_environment() {
        let keys = keys_from_environment([
            ("JWTPROXY_ISSUER_0", "example.com"),
            ("JWTPROXY_PUBLIC_KEY_0", "dsfdsfdsfdsf"),
        ])
        .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["example.com"], "dsfdsfdsfdsf");

        assert!(keys_from_environment([("unrelated", "something")])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unpaired_issuer_names_suffix() {
        let err = keys_from_environment([
            ("JWTPROXY_ISSUER_1", "example.com"),
            ("JWTPROXY_PUBLIC_KEY_0", "dsfdsfdsfdsf"),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not find a matching JWTPROXY_PUBLIC_KEY_1 value for JWTPROXY_ISSUER_1"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_environment() {
        use std::os::unix::ffi::OsStringExt;

        let junk = || OsString::from_vec(vec![0xff, 0xfe]);

        // Foreign variables are skipped.
        let pairs = environment_pairs([
            (OsString::from("UNRELATED_JUNK"), junk()),
            (junk(), OsString::from("value")),
            (OsString::from("JWTPROXY_LISTEN_PORT"), OsString::from("9090")),
        ])
        .unwrap();
        assert_eq!(
            pairs,
            vec![("JWTPROXY_LISTEN_PORT".to_string(), "9090".to_string())]
        );

        let err = environment_pairs([(OsString::from("JWTPROXY_PREFIX"), junk())]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Environment variable JWTPROXY_PREFIX is not valid unicode"
        );
    }

    #[test]
    fn test_parse_bool() {
        for v in ["1", "t", "T", "true", "TRUE", "True"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["0", "f", "F", "false", "FALSE", "False"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        for v in ["", "yes", "tRuE", "2"] {
            assert_eq!(parse_bool(v), None, "{v}");
        }
    }

    #[test]
    fn test_missing_remote_url() {
        let err = ConfigLoader::resolve(&Cli::default(), &pairs(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "JWTPROXY_REMOTE_URL environment variable or --remote-url command line flag not found"
        );
    }

    #[test]
    fn test_missing_port() {
        let env = pairs(&[("JWTPROXY_REMOTE_URL", "http://backend")]);
        let err = ConfigLoader::resolve(&Cli::default(), &env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                env: ENV_LISTEN_PORT,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_strict_ssl() {
        let env = pairs(&[
            ("JWTPROXY_REMOTE_URL", "http://backend"),
            ("JWTPROXY_LISTEN_PORT", "9090"),
            ("JWTPROXY_STRICT_SSL", "maybe"),
        ]);
        let err = ConfigLoader::resolve(&Cli::default(), &env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not load JWTPROXY_STRICT_SSL with value 'maybe', please use a valid boolean value"
        );
    }

    #[test]
    fn test_non_prefixed_header_is_fatal() {
        let env = pairs(&[
            ("JWTPROXY_REMOTE_URL", "http://backend"),
            ("JWTPROXY_LISTEN_PORT", "9090"),
            ("JWTPROXY_HEADER", "Token"),
        ]);
        let err = ConfigLoader::resolve(&Cli::default(), &env).unwrap_err();
        assert!(matches!(err, ConfigError::CustomHeaderPrefix { .. }));
    }

    #[test]
    fn test_no_issuers_is_fatal() {
        let env = pairs(&[
            ("JWTPROXY_REMOTE_URL", "http://backend"),
            ("JWTPROXY_LISTEN_PORT", "9090"),
        ]);
        let err = ConfigLoader::resolve(&Cli::default(), &env).unwrap_err();
        assert!(matches!(err, ConfigError::NoIssuers));
    }

    #[test]
    fn test_missing_keys_file() {
        let cli = Cli {
            keys: Some(PathBuf::from("/nonexistent/keys.json")),
            ..Cli::default()
        };
        let env = pairs(&[
            ("JWTPROXY_REMOTE_URL", "http://backend"),
            ("JWTPROXY_LISTEN_PORT", "9090"),
        ]);
        let err = ConfigLoader::resolve(&cli, &env).unwrap_err();
        assert!(matches!(err, ConfigError::KeysFileRead { .. }));
    }
}
