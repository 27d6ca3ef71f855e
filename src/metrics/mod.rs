//! Metrics module
//!
//! Prometheus counters for requests, authentication results and upstream
//! latency. Registered in the default registry so the metrics server can
//! gather them.

pub mod server;

use crate::auth::RejectionKind;
use http::StatusCode;
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram, CounterVec, Histogram};

lazy_static! {
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "jwtproxy_requests_total",
        "Requests answered, by the stage that answered them",
        &["stage", "status"]
    ).unwrap();

    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "jwtproxy_auth_attempts_total",
        "Authentication attempts",
        &["result"]  // "accepted" or a rejection kind
    ).unwrap();

    pub static ref UPSTREAM_DURATION: Histogram = register_histogram!(
        "jwtproxy_upstream_duration_seconds",
        "Backend round trip in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();
}

/// Record a response produced by `stage`
pub fn record_request(stage: &str, status: StatusCode) {
    REQUESTS_TOTAL
        .with_label_values(&[stage, status.as_str()])
        .inc();
}

/// Record an authentication attempt; `None` means the token was accepted
pub fn record_auth_attempt(rejection: Option<RejectionKind>) {
    let result = rejection.map_or("accepted", |kind| kind.as_str());
    AUTH_ATTEMPTS.with_label_values(&[result]).inc();
}

/// Record the duration of one backend round trip
pub fn record_upstream_duration(duration_secs: f64) {
    UPSTREAM_DURATION.observe(duration_secs);
}
