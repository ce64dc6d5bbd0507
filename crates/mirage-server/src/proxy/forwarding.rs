//! Forwarding buffered requests to the upstream.

use super::client::HttpClient;
use super::headers::{is_hop_by_hop, strip_hop_by_hop};
use crate::error::ResponseError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{HeaderMap, Method, Request, Response, Uri};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Parsed upstream base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    scheme: String,
    authority: String,
    /// Path prefix of the upstream URL, without trailing `/`.
    base_path: String,
}

impl ProxyTarget {
    /// Parse an absolute `http` or `https` URL.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let uri: Uri = raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid upstream URL '{raw}': {e}"))?;

        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https") => {
                s.to_ascii_lowercase()
            }
            Some(s) => return Err(format!("unsupported upstream scheme '{s}'")),
            None => return Err(format!("upstream URL '{raw}' has no scheme")),
        };
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| format!("upstream URL '{raw}' has no host"))?;

        Ok(Self {
            scheme,
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute upstream URL for a request path and query.
    pub fn url_for(&self, path_and_query: &str) -> String {
        let path_and_query = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{path_and_query}")
        };
        format!(
            "{}://{}{}{}",
            self.scheme, self.authority, self.base_path, path_and_query
        )
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.base_path)
    }
}

/// Forward a request whose body has already been buffered.
///
/// The exact buffered bytes are replayed with a matching `Content-Length`,
/// and `Host` is rewritten to the upstream.
pub async fn forward_request_with_body(
    http_client: &HttpClient,
    target: &ProxyTarget,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
    timeout: Duration,
) -> Result<Response<Full<Bytes>>, ResponseError> {
    let full_uri = target.url_for(path_and_query);
    debug!("Forwarding {} to: {}", method, full_uri);

    let mut upstream_req = Request::builder().method(method).uri(full_uri.as_str());
    for (key, value) in headers.iter() {
        if key != HOST && key != CONTENT_LENGTH && !is_hop_by_hop(key) {
            upstream_req = upstream_req.header(key, value);
        }
    }
    upstream_req = upstream_req.header(HOST, target.authority());
    if !body.is_empty() || headers.contains_key(CONTENT_LENGTH) {
        upstream_req = upstream_req.header(CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    let upstream_req = upstream_req
        .body(Full::new(body))
        .map_err(|e| ResponseError::Upstream(format!("invalid upstream request: {e}")))?;

    let upstream_response = match tokio::time::timeout(timeout, http_client.request(upstream_req)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!("Failed to forward request to {}: {}", full_uri, e);
            return Err(ResponseError::Upstream(e.to_string()));
        }
        Err(_) => {
            error!("Upstream {} timed out after {:?}", full_uri, timeout);
            return Err(ResponseError::Upstream(format!(
                "upstream timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    let (mut parts, body) = upstream_response.into_parts();
    let body_bytes = body.collect().await.map_err(|e| {
        error!("Failed to collect upstream response body: {}", e);
        ResponseError::Upstream(format!("failed to read upstream response: {e}"))
    })?;
    strip_hop_by_hop(&mut parts.headers);

    Ok(Response::from_parts(parts, Full::new(body_bytes.to_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let target = ProxyTarget::parse("https://example.test").unwrap();
        assert_eq!(target.authority(), "example.test");
        assert_eq!(target.url_for("/a?b=1"), "https://example.test/a?b=1");

        let with_base = ProxyTarget::parse("http://localhost:8080/api/").unwrap();
        assert_eq!(with_base.url_for("/users"), "http://localhost:8080/api/users");
        assert_eq!(with_base.to_string(), "http://localhost:8080/api");
    }

    #[test]
    fn test_invalid_targets() {
        assert!(ProxyTarget::parse("").is_err());
        assert!(ProxyTarget::parse("not a url").is_err());
        assert!(ProxyTarget::parse("example.test").is_err());
        assert!(ProxyTarget::parse("/relative/path").is_err());
        assert!(ProxyTarget::parse("ftp://example.test").is_err());
    }
}
