//! Response header rules.

use crate::environment::Header;
use crate::template::{RequestData, TemplateEngine, TemplateError};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::HeaderMap;
use tracing::debug;

pub const TEXT_PLAIN: &str = "text/plain";

pub const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Methods",
        "GET,POST,PUT,PATCH,DELETE,HEAD,OPTIONS",
    ),
    (
        "Access-Control-Allow-Headers",
        "Content-Type, Origin, Accept, Authorization, Content-Length, X-Requested-With",
    ),
];

/// HTTP token characters allowed in a header name.
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// Whether a configured header may be sent. Empty keys or values and keys
/// with characters outside the token set are dropped.
pub fn is_valid_header(key: &str, value: &str) -> bool {
    !key.is_empty() && !value.is_empty() && key.chars().all(is_token_char)
}

/// Render environment headers, then route headers over them.
///
/// A route header replaces an environment header of the same name.
pub fn resolve_headers(
    environment: &[Header],
    route: &[Header],
    engine: &TemplateEngine,
    request: &RequestData,
) -> Result<HeaderMap, TemplateError> {
    let mut resolved = HeaderMap::new();
    for header in environment.iter().chain(route) {
        if !is_valid_header(&header.key, &header.value) {
            debug!("Dropping invalid header '{}'", header.key);
            continue;
        }
        let value = engine.render(&header.value, request)?;
        match (
            HeaderName::from_bytes(header.key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                resolved.insert(name, value);
            }
            _ => debug!("Dropping header '{}' with unencodable value", header.key),
        }
    }
    Ok(resolved)
}

/// Content-Type among resolved headers, if any.
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// MIME essence of a content type, lowercased and without parameters.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestData {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("t-1"));
        RequestData::new("GET", "/", None, &headers, b"")
    }

    #[test]
    fn test_header_validity() {
        assert!(is_valid_header("Content-Type", "text/plain"));
        assert!(is_valid_header("X-Custom_Header.v1~", "x"));
        assert!(!is_valid_header("Bad Header", "x"));
        assert!(!is_valid_header("Bad:Header", "x"));
        assert!(!is_valid_header("Bad(Header)", "x"));
        assert!(!is_valid_header("", "x"));
        assert!(!is_valid_header("X-Empty", ""));
    }

    #[test]
    fn test_route_headers_override_environment() {
        let engine = TemplateEngine::new();
        let env = vec![
            Header::new("Content-Type", "application/json"),
            Header::new("X-Env", "env"),
        ];
        let route = vec![
            Header::new("content-type", "text/plain"),
            Header::new("X-Trace", "{{header \"x-trace\"}}"),
            Header::new("Invalid Key", "dropped"),
        ];

        let headers = resolve_headers(&env, &route, &engine, &request()).unwrap();
        assert_eq!(content_type(&headers), Some("text/plain"));
        assert_eq!(headers.get("x-env").unwrap(), "env");
        assert_eq!(headers.get("x-trace").unwrap(), "t-1");
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_header_template_error() {
        let engine = TemplateEngine::new();
        let route = vec![Header::new("X-Bad", "{{nope 1}}")];
        let err = resolve_headers(&[], &route, &engine, &request()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingHelper(_)));
    }

    #[test]
    fn test_mime_essence() {
        assert_eq!(mime_essence("Application/JSON; charset=utf-8"), "application/json");
        assert_eq!(mime_essence("text/html"), "text/html");
    }
}
