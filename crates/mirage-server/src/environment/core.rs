//! Per-environment runtime state.
//!
//! [`EnvironmentState`] survives start/stop cycles and holds the request log,
//! rotation counters and lifecycle phase. [`MockEnvironment`] is built on each
//! start and holds everything the request pipeline reads.

use super::logs::RequestLog;
use super::types::{Environment, EnvironmentStatus, Phase};
use crate::behaviors::ResponseRotator;
use crate::error::EngineError;
use crate::events::{ErrorKind, EventBus};
use crate::proxy::{create_http_client, HttpClient, ProxyTarget};
use crate::routing::RouteTable;
use crate::template::TemplateEngine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Lifecycle {
    phase: Phase,
    started_at: Option<DateTime<Utc>>,
    port: Option<u16>,
}

/// State kept for an environment across start/stop cycles.
#[derive(Debug)]
pub struct EnvironmentState {
    pub logs: RequestLog,
    pub rotator: ResponseRotator,
    lifecycle: Mutex<Lifecycle>,
}

impl EnvironmentState {
    pub fn new(max_logs: usize) -> Self {
        Self {
            logs: RequestLog::new(max_logs),
            rotator: ResponseRotator::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.lock().phase
    }

    pub(crate) fn set_starting(&self) {
        self.lifecycle.lock().phase = Phase::Starting;
    }

    pub(crate) fn set_running(&self, port: u16) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.phase = Phase::Running;
        lifecycle.started_at = Some(Utc::now());
        lifecycle.port = Some(port);
    }

    /// Clear the running flag and start timestamp. Logs and rotation
    /// counters are kept.
    pub(crate) fn set_stopped(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.phase = Phase::Stopped;
        lifecycle.started_at = None;
        lifecycle.port = None;
    }

    /// Drop captured requests and rotation counters.
    pub fn clear_logs(&self) {
        self.logs.clear();
        self.rotator.reset_all();
    }

    pub fn status(&self, uuid: &str) -> EnvironmentStatus {
        let lifecycle = self.lifecycle.lock();
        EnvironmentStatus {
            uuid: uuid.to_string(),
            phase: lifecycle.phase,
            running: lifecycle.phase == Phase::Running,
            started_at: lifecycle.started_at.map(|t| t.to_rfc3339()),
            port: lifecycle.port,
            log_count: self.logs.len(),
        }
    }
}

/// Resolved proxy upstream for an environment.
pub struct ProxyUpstream {
    pub target: ProxyTarget,
    pub client: HttpClient,
}

/// A started environment.
pub struct MockEnvironment {
    pub definition: Environment,
    pub routes: RouteTable,
    pub templates: TemplateEngine,
    /// `None` when proxy mode is off or the upstream URL is unusable.
    pub proxy: Option<ProxyUpstream>,
    pub state: Arc<EnvironmentState>,
    pub events: EventBus,
    pub proxy_timeout: Duration,
}

impl MockEnvironment {
    /// Build routing and proxy state for `definition`.
    ///
    /// Invalid routes and an invalid upstream URL are reported as events and
    /// otherwise ignored.
    pub fn new(
        mut definition: Environment,
        state: Arc<EnvironmentState>,
        events: EventBus,
        proxy_timeout: Duration,
    ) -> Result<Self, EngineError> {
        definition.refresh_duplicates();

        let (routes, errors) = RouteTable::build(&definition);
        for err in errors {
            events.error(&definition.uuid, ErrorKind::RouteRegistration, err.to_string());
        }

        let proxy = Self::resolve_proxy(&definition, &events, proxy_timeout)?;

        Ok(Self {
            definition,
            routes,
            templates: TemplateEngine::new(),
            proxy,
            state,
            events,
            proxy_timeout,
        })
    }

    fn resolve_proxy(
        definition: &Environment,
        events: &EventBus,
        proxy_timeout: Duration,
    ) -> Result<Option<ProxyUpstream>, EngineError> {
        if !definition.proxy_mode {
            return Ok(None);
        }

        let raw = definition.proxy_host.as_deref().unwrap_or("");
        let target = match ProxyTarget::parse(raw) {
            Ok(target) => target,
            Err(reason) => {
                warn!(
                    "Proxy disabled for environment '{}': {}",
                    definition.name, reason
                );
                events.error(&definition.uuid, ErrorKind::InvalidUpstreamUrl, reason);
                return Ok(None);
            }
        };

        let client =
            create_http_client(proxy_timeout).map_err(|e| EngineError::Tls(e.to_string()))?;
        info!("Environment '{}' proxies to {}", definition.name, target);
        Ok(Some(ProxyUpstream { target, client }))
    }

    pub fn uuid(&self) -> &str {
        &self.definition.uuid
    }

    /// Caller token used to key response rotation. Empty when absent.
    pub fn caller_token(&self, headers: &hyper::HeaderMap) -> String {
        let name = self.definition.caller_token_header.to_ascii_lowercase();
        headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }
}
