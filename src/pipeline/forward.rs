//! Forwarding stage
//!
//! Terminal stage of the chain. Sends the (authenticated, rewritten) request
//! to the backend and relays whatever comes back.
//!
//! A request for `/user?id=1` against a remote URL of
//! `https://api.example.org/v1?tenant=a` becomes
//! `https://api.example.org/v1/user?tenant=a&id=1`.

use super::{text_response, GatewayRequest, GatewayResponse, Next, RemoteAddr, Stage};
use crate::config::UpstreamConfig;
use crate::metrics;
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST};
use http::{Response, StatusCode, Uri};
use http_body_util::Full;
use reqwest::Url;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwarding errors
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Invalid host header override '{0}'")]
    InvalidHostHeader(String),

    #[error("Could not build backend URL from '{uri}': {reason}")]
    InvalidTarget { uri: String, reason: String },

    #[error("Backend request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    #[error("Failed to read backend response: {0}")]
    ResponseBody(#[source] reqwest::Error),
}

/// Reverse proxy to a single backend.
#[derive(Debug, Clone)]
pub struct ForwardingStage {
    client: reqwest::Client,
    remote: Url,
    host_header: Option<HeaderValue>,
    auth_header: HeaderName,
}

impl ForwardingStage {
    /// `auth_header` is removed from every forwarded request.
    pub fn new(upstream: &UpstreamConfig, auth_header: HeaderName) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!upstream.strict_tls)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ForwardError::Client)?;

        let host_header = upstream
            .host_header
            .as_deref()
            .map(|host| {
                HeaderValue::from_str(host)
                    .map_err(|_| ForwardError::InvalidHostHeader(host.to_string()))
            })
            .transpose()?;

        Ok(Self {
            client,
            remote: upstream.remote_url.clone(),
            host_header,
            auth_header,
        })
    }

    pub fn remote(&self) -> &Url {
        &self.remote
    }

    /// Backend URL for an inbound request target.
    pub fn target_url(&self, uri: &Uri) -> Result<Url, ForwardError> {
        if self.remote.cannot_be_a_base() {
            return Err(ForwardError::InvalidTarget {
                uri: uri.to_string(),
                reason: "remote URL cannot carry a path".into(),
            });
        }

        // Dot segments are resolved in the request path alone, so they can
        // never climb above the remote's base path.
        let path = resolve_dot_segments(uri.path());
        let mut url = self.remote.clone();
        url.set_path(&single_joining_slash(self.remote.path(), &path));
        url.set_query(merge_queries(self.remote.query(), uri.query()).as_deref());
        Ok(url)
    }

    /// Headers to send to the backend.
    pub fn outbound_headers(&self, request: &GatewayRequest) -> HeaderMap {
        let mut headers = request.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(&self.auth_header);
        headers.remove(CONTENT_LENGTH);
        headers.remove(HOST);

        if let Some(host) = &self.host_header {
            headers.insert(HOST, host.clone());
        }

        if let Some(RemoteAddr(peer)) = request.extensions().get::<RemoteAddr>() {
            let client_ip = peer.ip().to_string();
            let forwarded = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
                Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
                _ => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert("x-forwarded-for", value);
            }
        }

        headers
    }

    /// Send the request to the backend and buffer its response.
    pub async fn forward(&self, request: GatewayRequest) -> Result<GatewayResponse, ForwardError> {
        let url = self.target_url(request.uri())?;
        let headers = self.outbound_headers(&request);
        let method = request.method().clone();

        debug!(method = %method, url = %url, "Forwarding request");

        let started = Instant::now();
        let upstream = self
            .client
            .request(method, url)
            .headers(headers)
            .body(request.into_body())
            .send()
            .await
            .map_err(ForwardError::Upstream)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        let body = upstream.bytes().await.map_err(ForwardError::ResponseBody)?;
        metrics::record_upstream_duration(started.elapsed().as_secs_f64());

        strip_hop_by_hop(&mut headers);
        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

#[async_trait]
impl Stage for ForwardingStage {
    fn name(&self) -> &'static str {
        "forward"
    }

    async fn handle(&self, request: GatewayRequest, _next: Next<'_>) -> GatewayResponse {
        match self.forward(request).await {
            Ok(response) => {
                metrics::record_request(self.name(), response.status());
                response
            }
            Err(e) => {
                error!(error = %e, remote = %self.remote, "Forwarding failed");
                metrics::record_request(self.name(), StatusCode::BAD_GATEWAY);
                text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    }
}

/// Join two path pieces with exactly one `/` between them.
///
/// ```
/// use jwtproxy::pipeline::forward::single_joining_slash;
///
/// assert_eq!(single_joining_slash("/v1/", "/user"), "/v1/user");
/// assert_eq!(single_joining_slash("v1", "user"), "v1/user");
/// ```
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Resolve `.` and `..` segments (plain or percent-encoded) in an absolute
/// path. `..` at the root stays at the root.
pub fn resolve_dot_segments(path: &str) -> String {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;

    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.into_iter().enumerate() {
        if is_single_dot(segment) {
            if i == last {
                out.push("");
            }
        } else if is_double_dot(segment) {
            out.pop();
            if i == last {
                out.push("");
            }
        } else {
            out.push(segment);
        }
    }
    format!("/{}", out.join("/"))
}

fn is_single_dot(segment: &str) -> bool {
    segment == "." || segment.eq_ignore_ascii_case("%2e")
}

fn is_double_dot(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        ".." | ".%2e" | "%2e." | "%2e%2e"
    )
}

/// Remote query first, then the request's own query.
fn merge_queries(remote: Option<&str>, request: Option<&str>) -> Option<String> {
    match (remote.filter(|q| !q.is_empty()), request.filter(|q| !q.is_empty())) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::request;
    use http::header::AUTHORIZATION;

    fn stage(remote: &str, host_header: Option<&str>) -> ForwardingStage {
        let upstream = UpstreamConfig {
            remote_url: remote.parse().unwrap(),
            host_header: host_header.map(String::from),
            strict_tls: true,
        };
        ForwardingStage::new(&upstream, AUTHORIZATION).unwrap()
    }

    #[test]
    fn test_paths_are_joined_with_a_slash() {
        let cases = [
            ("/test/", "/b/", "/test/b/"),
            ("test", "b", "test/b"),
            ("test", "/b", "test/b"),
            ("test/", "b", "test/b"),
        ];
        for (a, b, expected) in cases {
            assert_eq!(single_joining_slash(a, b), expected, "joining {a:?} and {b:?}");
        }
    }

    #[test]
    fn test_merge_queries() {
        assert_eq!(merge_queries(Some("a=1"), Some("b=2")).as_deref(), Some("a=1&b=2"));
        assert_eq!(merge_queries(None, Some("b=2")).as_deref(), Some("b=2"));
        assert_eq!(merge_queries(Some("a=1"), Some("")).as_deref(), Some("a=1"));
        assert_eq!(merge_queries(None, None), None);
    }

    #[test]
    fn test_target_url() {
        let stage = stage("http://backend.internal:8080", None);
        let url = stage.target_url(&"/user?id=1".parse().unwrap()).unwrap();
        assert_eq!(url.as_str(), "http://backend.internal:8080/user?id=1");

        let stage = self::stage("https://api.example.org/v1?tenant=a", None);
        let url = stage.target_url(&"/user?id=1".parse().unwrap()).unwrap();
        assert_eq!(url.as_str(), "https://api.example.org/v1/user?tenant=a&id=1");
    }

    #[test]
    fn test_resolve_dot_segments() {
        let cases = [
            ("/", "/"),
            ("/user", "/user"),
            ("/x/../admin", "/admin"),
            ("/../../admin", "/admin"),
            ("/a/./b/", "/a/b/"),
            ("/a/b/..", "/a/"),
            ("/a/.", "/a/"),
            ("/a//b", "/a//b"),
            ("/a/%2E%2e/b", "/b"),
            ("/a/..b/c", "/a/..b/c"),
        ];
        for (path, expected) in cases {
            assert_eq!(resolve_dot_segments(path), expected, "{path}");
        }
    }

    /// Dot segments in the request never escape the remote base path
    #[test]
    fn test_target_url_stays_under_remote_path() {
        let stage = stage("http://b/base", None);
        for path in ["/x/../admin", "/../admin", "/x/%2e%2e/%2E%2E/admin"] {
            let url = stage.target_url(&path.parse().unwrap()).unwrap();
            assert_eq!(url.as_str(), "http://b/base/admin", "{path}");
        }
    }

    #[test]
    fn test_outbound_headers() {
        let stage = stage("http://backend.internal", Some("api.example.org"));
        let mut req = request("/user");
        let headers = req.headers_mut();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(HOST, HeaderValue::from_static("gateway.example.com"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("x-session", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("accept", HeaderValue::from_static("text/plain"));
        req.extensions_mut()
            .insert(RemoteAddr("192.168.1.7:40000".parse().unwrap()));

        let out = stage.outbound_headers(&req);

        assert!(out.get(AUTHORIZATION).is_none());
        assert!(out.get(CONNECTION).is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("x-session").is_none());
        assert_eq!(out.get(HOST).unwrap(), "api.example.org");
        assert_eq!(out.get("x-forwarded-for").unwrap(), "10.0.0.1, 192.168.1.7");
        assert_eq!(out.get("accept").unwrap(), "text/plain");
    }

    #[test]
    fn test_host_defaults_to_remote() {
        let stage = stage("http://backend.internal", None);
        let mut req = request("/user");
        req.headers_mut()
            .insert(HOST, HeaderValue::from_static("gateway.example.com"));

        // Left to the client, which derives it from the target URL.
        assert!(stage.outbound_headers(&req).get(HOST).is_none());
    }

    #[test]
    fn test_invalid_host_override() {
        let upstream = UpstreamConfig {
            remote_url: "http://backend.internal".parse().unwrap(),
            host_header: Some("bad\nhost".into()),
            strict_tls: false,
        };
        assert!(matches!(
            ForwardingStage::new(&upstream, AUTHORIZATION),
            Err(ForwardError::InvalidHostHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        // Port 1 on loopback refuses connections.
        let stage = stage("http://127.0.0.1:1", None);
        let pipeline = crate::pipeline::Pipeline::builder().stage(stage).build();

        let response = pipeline.handle(request("/user")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
