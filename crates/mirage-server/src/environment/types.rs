//! Type definitions for mock environments.
//!
//! An [`Environment`] is supplied by the surrounding application, usually as
//! JSON or YAML. Runtime state lives in the manager, never in the definition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Environment
// ============================================================================

/// A named mock server definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default = "generate_uuid")]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_prefix: Option<String>,
    #[serde(default)]
    pub cors: bool,
    /// Global latency in milliseconds, applied before route dispatch.
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub proxy_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Query parameter name fragments ignored when disambiguating duplicates.
    #[serde(default = "default_volatile_query_params")]
    pub volatile_query_params: Vec<String>,
    /// Request header whose value keys the response rotation sequence.
    #[serde(default = "default_caller_token_header")]
    pub caller_token_header: String,
}

impl Environment {
    /// Recompute `duplicates` on every route.
    ///
    /// Two routes are duplicates when they share a method and normalize to
    /// the same router pattern once the query string is removed.
    pub fn refresh_duplicates(&mut self) {
        let prefix = self.endpoint_prefix.as_deref();
        let keys: Vec<(HttpMethod, String)> = self
            .routes
            .iter()
            .map(|r| {
                let path = crate::routing::to_router_pattern(prefix, r.endpoint_path())
                    .unwrap_or_else(|_| r.endpoint_path().trim_matches('/').to_string());
                (r.method, path)
            })
            .collect();

        for (i, route) in self.routes.iter_mut().enumerate() {
            route.duplicates = keys
                .iter()
                .enumerate()
                .filter(|(j, key)| *j != i && **key == keys[i])
                .map(|(j, _)| j)
                .collect();
        }
    }
}

fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn default_volatile_query_params() -> Vec<String> {
    ["lat", "lng", "address_id", "card_seen_count"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub(crate) fn default_caller_token_header() -> String {
    "sid".to_string()
}

// ============================================================================
// Route Types
// ============================================================================

/// HTTP methods a route can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        match *method {
            hyper::Method::GET => Some(HttpMethod::Get),
            hyper::Method::POST => Some(HttpMethod::Post),
            hyper::Method::PUT => Some(HttpMethod::Put),
            hyper::Method::PATCH => Some(HttpMethod::Patch),
            hyper::Method::DELETE => Some(HttpMethod::Delete),
            hyper::Method::HEAD => Some(HttpMethod::Head),
            hyper::Method::OPTIONS => Some(HttpMethod::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One method + path + response rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default = "generate_uuid")]
    pub uuid: String,
    #[serde(default)]
    pub documentation: String,
    pub method: HttpMethod,
    /// Path relative to the environment prefix. A literal query string is
    /// used only to tell duplicates apart.
    pub endpoint: String,
    #[serde(
        default = "default_status_code",
        deserialize_with = "deserialize_status_code"
    )]
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Per-route latency in milliseconds.
    #[serde(default)]
    pub latency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<RouteFile>,
    /// Alternate bodies served in turn after the primary body.
    #[serde(default)]
    pub alternate_routes: Vec<String>,
    /// Indices of sibling routes sharing this method and path.
    #[serde(default)]
    pub duplicates: Vec<usize>,
}

impl Route {
    /// Endpoint without its literal query string.
    pub fn endpoint_path(&self) -> &str {
        self.endpoint
            .split_once('?')
            .map_or(self.endpoint.as_str(), |(path, _)| path)
    }

    /// Literal query string declared on the endpoint, if any.
    pub fn endpoint_query(&self) -> Option<&str> {
        self.endpoint.split_once('?').map(|(_, query)| query)
    }
}

/// File served in place of the route body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteFile {
    /// Path on disk, may be a template.
    pub path: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    /// Send inline instead of as an attachment.
    #[serde(default)]
    pub send_as_body: bool,
}

/// A response header. The value may be a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(default = "generate_uuid")]
    pub uuid: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            uuid: generate_uuid(),
            key: key.into(),
            value: value.into(),
        }
    }
}

pub(crate) fn default_status_code() -> u16 {
    200
}

/// Accept `statusCode` as either a number or a numeric string.
pub(crate) fn deserialize_status_code<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| D::Error::custom("invalid status code number")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| D::Error::custom(format!("invalid status code string: {s}"))),
        _ => Err(D::Error::custom("statusCode must be a number or string")),
    }
}

// ============================================================================
// Request Log Types
// ============================================================================

/// One captured inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    /// Normalized URL including the query string.
    pub url: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub client_address: String,
    /// Set when the request was handed to the upstream.
    pub proxied: bool,
}

// ============================================================================
// Runtime Status
// ============================================================================

/// Lifecycle phase of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Stopped,
    Starting,
    Running,
}

/// Snapshot of an environment's runtime state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub uuid: String,
    pub phase: Phase,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub log_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(method: HttpMethod, endpoint: &str) -> Route {
        serde_json::from_value(serde_json::json!({
            "method": method,
            "endpoint": endpoint,
        }))
        .unwrap()
    }

    #[test]
    fn test_environment_defaults() {
        let env: Environment = serde_json::from_str(r#"{"port": 3000}"#).unwrap();
        assert_eq!(env.port, 3000);
        assert!(!env.https);
        assert!(!env.cors);
        assert_eq!(env.caller_token_header, "sid");
        assert_eq!(
            env.volatile_query_params,
            vec!["lat", "lng", "address_id", "card_seen_count"]
        );
        assert!(!env.uuid.is_empty());
    }

    #[test]
    fn test_status_code_accepts_string() {
        let route: Route = serde_json::from_str(
            r#"{"method": "get", "endpoint": "status", "statusCode": "201"}"#,
        )
        .unwrap();
        assert_eq!(route.status_code, 201);
    }

    #[test]
    fn test_status_code_defaults_to_200() {
        let route = route(HttpMethod::Get, "status");
        assert_eq!(route.status_code, 200);
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let result: Result<Route, _> =
            serde_json::from_str(r#"{"method": "trace", "endpoint": "status"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_split() {
        let route = route(HttpMethod::Get, "items?type=a&page=1");
        assert_eq!(route.endpoint_path(), "items");
        assert_eq!(route.endpoint_query(), Some("type=a&page=1"));

        let plain = self::route(HttpMethod::Get, "items");
        assert_eq!(plain.endpoint_query(), None);
    }

    #[test]
    fn test_refresh_duplicates() {
        let mut env: Environment = serde_json::from_str(r#"{"port": 3000}"#).unwrap();
        env.routes = vec![
            route(HttpMethod::Get, "items?type=a"),
            route(HttpMethod::Get, "items?type=b"),
            route(HttpMethod::Post, "items"),
            route(HttpMethod::Get, "/items/"),
        ];
        env.refresh_duplicates();

        assert_eq!(env.routes[0].duplicates, vec![1, 3]);
        assert_eq!(env.routes[1].duplicates, vec![0, 3]);
        assert!(env.routes[2].duplicates.is_empty());
        assert_eq!(env.routes[3].duplicates, vec![0, 1]);
    }

    #[test]
    fn test_refresh_duplicates_collapses_empty_segments() {
        let mut env: Environment =
            serde_json::from_str(r#"{"port": 3000, "endpointPrefix": "api"}"#).unwrap();
        env.routes = vec![
            route(HttpMethod::Get, "a//b"),
            route(HttpMethod::Get, "a/b?x=1"),
            route(HttpMethod::Get, "a/b/c"),
        ];
        env.refresh_duplicates();

        assert_eq!(env.routes[0].duplicates, vec![1]);
        assert_eq!(env.routes[1].duplicates, vec![0]);
        assert!(env.routes[2].duplicates.is_empty());
    }

    #[test]
    fn test_yaml_environment() {
        let yaml = r#"
name: demo
port: 3001
cors: true
headers:
  - key: Content-Type
    value: application/json
routes:
  - method: get
    endpoint: status
    statusCode: 200
    body: '{"ok": true}'
    alternateRoutes:
      - '{"ok": false}'
"#;
        let env: Environment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(env.name, "demo");
        assert_eq!(env.headers[0].key, "Content-Type");
        assert_eq!(env.routes[0].alternate_routes.len(), 1);
        assert_eq!(env.routes[0].method, HttpMethod::Get);
    }
}
