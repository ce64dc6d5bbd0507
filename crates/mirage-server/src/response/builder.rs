use super::headers::{CORS_HEADERS, TEXT_PLAIN};
use crate::error::ResponseError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::CONTENT_TYPE;
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use std::str::FromStr;

pub struct ResponseBuilder {
    status: StatusCode,
    body: Bytes,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder {
            status,
            body: Bytes::new(),
            headers: HeaderMap::new(),
        }
    }

    /// Builder for a configured status code. Codes outside 100..=999 become 500.
    pub fn from_code(status_code: u16) -> Self {
        Self::new(StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Merge `headers`, replacing existing values for the same names.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut last = None;
        for (name, value) in headers {
            // `None` names continue the previous header's values
            let name = match name {
                Some(name) => {
                    self.headers.remove(&name);
                    last = Some(name.clone());
                    name
                }
                None => match &last {
                    Some(name) => name.clone(),
                    None => continue,
                },
            };
            self.headers.append(name, value);
        }
        self
    }

    pub fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.contains_key(name)
    }

    pub fn build(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Plain-text response.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    ResponseBuilder::new(status)
        .header(CONTENT_TYPE.as_str(), TEXT_PLAIN)
        .body(body)
        .build()
}

/// Response for a request no route, preflight or proxy handled.
pub fn not_found_response(method: &str, path: &str) -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, format!("Cannot {method} {path}"))
}

/// Answer to a CORS preflight.
pub fn cors_preflight_response() -> Response<Full<Bytes>> {
    CORS_HEADERS
        .iter()
        .fold(ResponseBuilder::new(StatusCode::OK), |builder, (name, value)| {
            builder.header(name, value)
        })
        .body("OK")
        .build()
}

/// Plain-text error body sent with the route's status code.
pub fn error_response(status_code: u16, err: &ResponseError) -> Response<Full<Bytes>> {
    ResponseBuilder::from_code(status_code)
        .header(CONTENT_TYPE.as_str(), TEXT_PLAIN)
        .body(err.to_string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, SET_COOKIE};

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_builder() {
        let response = ResponseBuilder::new(StatusCode::CREATED)
            .header("X-Test", "1")
            .header("bad header", "ignored")
            .body("created")
            .build();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-test").unwrap(), "1");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(body_string(response).await, "created");
    }

    #[test]
    fn test_invalid_status_code_becomes_500() {
        let response = ResponseBuilder::from_code(42).build();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_merge_headers_replaces_and_keeps_multi_values() {
        let mut extra = HeaderMap::new();
        extra.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        extra.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        extra.insert("x-env", HeaderValue::from_static("route"));

        let response = ResponseBuilder::new(StatusCode::OK)
            .header("X-Env", "env")
            .headers(extra)
            .build();

        assert_eq!(response.headers().get("x-env").unwrap(), "route");
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn test_not_found() {
        let response = not_found_response("GET", "/nope");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), TEXT_PLAIN);
        assert_eq!(body_string(response).await, "Cannot GET /nope");
    }

    #[test]
    fn test_cors_preflight() {
        let response = cors_preflight_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(response.headers().len(), 3);
    }

    #[tokio::test]
    async fn test_error_response_uses_route_status() {
        let err = ResponseError::FileNotFound("/tmp/missing.json".to_string());
        let response = error_response(200, &err);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), TEXT_PLAIN);
        assert_eq!(body_string(response).await, "File not found: /tmp/missing.json");
    }
}
