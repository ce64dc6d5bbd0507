//! Request pipeline for a running environment.
//!
//! Stages run in a fixed order over one [`RequestContext`]:
//! entry event, URL normalization, body buffering, request log, global
//! latency, route dispatch, CORS preflight, proxy fallback, then 404. Each
//! stage after logging either answers the request or lets it continue.

use super::core::MockEnvironment;
use super::types::{HttpMethod, RequestLogEntry, Route};
use crate::behaviors::apply_latency;
use crate::error::ResponseError;
use crate::events::EngineEvent;
use crate::proxy::forward_request_with_body;
use crate::response::{
    content_type, cors_preflight_response, error_response, mime_essence, not_found_response,
    resolve_headers, serve_file, text_response, ResponseBuilder,
};
use crate::routing::{parse_query_string, ResolvedRoute};
use crate::template::RequestData;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a pipeline stage.
enum Flow {
    Continue,
    Respond(Response<Full<Bytes>>),
}

/// Everything later stages need, captured once up front.
#[derive(Debug)]
struct RequestContext {
    method: Method,
    /// Path with repeated `/` collapsed
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    /// Buffered request body, replayed by the proxy
    body: Bytes,
    client_addr: SocketAddr,
    resolved: Option<ResolvedRoute>,
}

impl RequestContext {
    /// Normalized URL including the query string.
    fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    fn request_data(&self) -> RequestData {
        let data = RequestData::new(
            self.method.as_str(),
            &self.path,
            self.query.as_deref(),
            &self.headers,
            &self.body,
        );
        match &self.resolved {
            Some(resolved) => data.with_params(resolved.path_params.clone()),
            None => data,
        }
    }
}

/// Collapse runs of `/` into one.
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

/// Handle one request to a running environment.
pub async fn handle_environment_request<B>(
    req: Request<B>,
    env: Arc<MockEnvironment>,
    client_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Display,
{
    env.events.emit(EngineEvent::EnteringRequest {
        environment: env.uuid().to_string(),
    });

    let (parts, body) = req.into_parts();
    let path = collapse_slashes(parts.uri.path());
    let query = parts.uri.query().map(str::to_string);

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body for {} {}: {}", parts.method, path, e);
            Bytes::new()
        }
    };

    let resolved = HttpMethod::from_hyper(&parts.method)
        .and_then(|method| env.routes.resolve(method, &path, query.as_deref()));

    let ctx = RequestContext {
        method: parts.method,
        path,
        query,
        headers: parts.headers,
        body,
        client_addr,
        resolved,
    };

    log_request(&env, &ctx);

    apply_latency(env.definition.latency).await;

    if let Flow::Respond(response) = dispatch_route(&env, &ctx).await {
        return Ok(response);
    }
    if let Flow::Respond(response) = cors_preflight(&env, &ctx) {
        return Ok(response);
    }
    if let Flow::Respond(response) = proxy_fallback(&env, &ctx).await {
        return Ok(response);
    }

    debug!("No route for {} {}", ctx.method, ctx.path);
    Ok(not_found_response(ctx.method.as_str(), &ctx.path))
}

fn is_cors_preflight(env: &MockEnvironment, ctx: &RequestContext) -> bool {
    env.definition.cors && ctx.method == Method::OPTIONS
}

fn log_request(env: &MockEnvironment, ctx: &RequestContext) {
    let headers = ctx
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();

    let entry = RequestLogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        method: ctx.method.to_string(),
        url: ctx.url(),
        path: ctx.path.clone(),
        query: parse_query_string(ctx.query.as_deref()),
        headers,
        body: (!ctx.body.is_empty()).then(|| String::from_utf8_lossy(&ctx.body).into_owned()),
        client_address: ctx.client_addr.ip().to_string(),
        proxied: env.proxy.is_some() && ctx.resolved.is_none() && !is_cors_preflight(env, ctx),
    };

    debug!("{} {} from {}", entry.method, entry.url, entry.client_address);
    env.state.logs.push(entry.clone());
    env.events.emit(EngineEvent::RequestLogged {
        environment: env.uuid().to_string(),
        entry,
    });
}

async fn dispatch_route(env: &MockEnvironment, ctx: &RequestContext) -> Flow {
    let Some(resolved) = &ctx.resolved else {
        return Flow::Continue;
    };
    let Some(route) = env.definition.routes.get(resolved.route_index) else {
        return Flow::Continue;
    };

    apply_latency(route.latency).await;

    let body_template = if route.alternate_routes.is_empty() {
        route.body.as_deref()
    } else {
        let token = env.caller_token(&ctx.headers);
        let index =
            env.state
                .rotator
                .next_index(&route.endpoint, &token, route.alternate_routes.len());
        debug!("Rotation index {} for {} (caller '{}')", index, route.endpoint, token);
        match index {
            0 => route.body.as_deref(),
            n => route.alternate_routes.get(n - 1).map(String::as_str),
        }
    };

    let request = ctx.request_data();
    match route_response(env, route, body_template, &request).await {
        Ok(response) => Flow::Respond(response),
        Err(e) => {
            warn!("Error serving {} {}: {}", route.method, route.endpoint, e);
            env.events.error(env.uuid(), e.kind(), e.to_string());
            Flow::Respond(error_response(route.status_code, &e))
        }
    }
}

async fn route_response(
    env: &MockEnvironment,
    route: &Route,
    body_template: Option<&str>,
    request: &RequestData,
) -> Result<Response<Full<Bytes>>, ResponseError> {
    let headers = resolve_headers(
        &env.definition.headers,
        &route.headers,
        &env.templates,
        request,
    )?;

    let declared_type = content_type(&headers).map(str::to_string);
    if let Some(declared) = &declared_type {
        declared
            .parse::<mime_guess::Mime>()
            .map_err(|_| ResponseError::InvalidContentType(declared.clone()))?;
    }

    let mut builder = ResponseBuilder::from_code(route.status_code).headers(headers);

    if let Some(file) = &route.file {
        let served = serve_file(file, &env.templates, request).await?;
        if declared_type.is_none() {
            builder = builder.header(CONTENT_TYPE.as_str(), &served.content_type);
        }
        if let Some(disposition) = &served.content_disposition {
            if !builder.has_header(&CONTENT_DISPOSITION) {
                builder = builder.header(CONTENT_DISPOSITION.as_str(), disposition);
            }
        }
        return Ok(builder.body(served.body).build());
    }

    let body = match body_template {
        Some(template) => env.templates.render(template, request)?,
        None => String::new(),
    };

    let is_json = declared_type
        .as_deref()
        .is_some_and(|t| mime_essence(t) == "application/json");
    if is_json && !body.trim().is_empty() {
        serde_json::from_str::<serde_json::Value>(&body)
            .map_err(|e| ResponseError::JsonParse(e.to_string()))?;
    }

    Ok(builder.body(body).build())
}

fn cors_preflight(env: &MockEnvironment, ctx: &RequestContext) -> Flow {
    if is_cors_preflight(env, ctx) {
        debug!("Answering CORS preflight for {}", ctx.path);
        Flow::Respond(cors_preflight_response())
    } else {
        Flow::Continue
    }
}

async fn proxy_fallback(env: &MockEnvironment, ctx: &RequestContext) -> Flow {
    let Some(proxy) = &env.proxy else {
        return Flow::Continue;
    };

    let result = forward_request_with_body(
        &proxy.client,
        &proxy.target,
        ctx.method.clone(),
        &ctx.url(),
        &ctx.headers,
        ctx.body.clone(),
        env.proxy_timeout,
    )
    .await;

    match result {
        Ok(response) => Flow::Respond(response),
        Err(e) => {
            env.events.error(env.uuid(), e.kind(), e.to_string());
            Flow::Respond(text_response(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}
