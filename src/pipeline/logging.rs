//! Access logging stage
//!
//! Writes one JSON line per request before delegating. Logging is best
//! effort: a record that cannot be serialized or written is reported on the
//! error writer and the request carries on regardless.

use super::{GatewayRequest, GatewayResponse, Next, RemoteAddr, Stage};
use crate::auth::SharedClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// One access log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestLogEntry {
    pub date: DateTime<Utc>,
    pub remote_address: String,
    pub forwarded_for: String,
    pub user_agent: String,
    pub method: String,
    pub url: String,
}

impl RequestLogEntry {
    pub fn from_request(request: &GatewayRequest, date: DateTime<Utc>) -> Self {
        let header = |name: &'static str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        Self {
            date,
            remote_address: request
                .extensions()
                .get::<RemoteAddr>()
                .map(|addr| addr.0.to_string())
                .unwrap_or_default(),
            forwarded_for: header("x-forwarded-for"),
            user_agent: header("user-agent"),
            method: request.method().to_string(),
            url: request.uri().to_string(),
        }
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Record and error writers for the access log.
#[derive(Clone)]
pub struct AccessLog {
    records: SharedWriter,
    errors: SharedWriter,
}

impl fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLog").finish_non_exhaustive()
    }
}

impl AccessLog {
    pub fn new(records: impl Write + Send + 'static, errors: impl Write + Send + 'static) -> Self {
        Self {
            records: Arc::new(Mutex::new(Box::new(records))),
            errors: Arc::new(Mutex::new(Box::new(errors))),
        }
    }

    /// Records to stdout, errors to stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Write a record; failures go to the error writer.
    pub fn write(&self, entry: &RequestLogEntry) {
        let result = serde_json::to_vec(entry)
            .map_err(io::Error::from)
            .and_then(|mut line| {
                line.push(b'\n');
                let mut records = self.records.lock();
                records.write_all(&line)?;
                records.flush()
            });

        if let Err(e) = result {
            self.report(&e);
        }
    }

    fn report(&self, error: &io::Error) {
        let mut errors = self.errors.lock();
        if writeln!(errors, "{error}").and_then(|_| errors.flush()).is_err() {
            tracing::warn!(error = %error, "Access log record dropped");
        }
    }
}

/// Logs every request, then delegates.
#[derive(Debug, Clone)]
pub struct LoggingStage {
    clock: SharedClock,
    log: AccessLog,
}

impl LoggingStage {
    pub fn new(clock: SharedClock, log: AccessLog) -> Self {
        Self { clock, log }
    }
}

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        let entry = RequestLogEntry::from_request(&request, self.clock.now());
        self.log.write(&entry);
        next.run(request).await
    }
}
