//! Lifecycle, request and error notifications for the surrounding application.

use crate::environment::RequestLogEntry;
use crate::error::BindErrorReason;
use serde::Serialize;
use tokio::sync::broadcast;

/// Category of a non-fatal error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    RouteRegistration,
    Template,
    JsonParse,
    FileNotFound,
    FileRead,
    InvalidContentType,
    InvalidUpstreamUrl,
    Upstream,
}

/// Notification emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    EnteringRequest { environment: String },
    #[serde(rename_all = "camelCase")]
    Started { environment: String, port: u16 },
    #[serde(rename_all = "camelCase")]
    Stopped { environment: String },
    #[serde(rename_all = "camelCase")]
    BindError {
        environment: String,
        reason: BindErrorReason,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    RequestLogged {
        environment: String,
        entry: RequestLogEntry,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        environment: String,
        kind: ErrorKind,
        message: String,
    },
}

/// Fan-out channel for [`EngineEvent`]s.
///
/// Sending never fails: events with no subscriber are dropped, and slow
/// subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, environment: &str, kind: ErrorKind, message: impl Into<String>) {
        self.emit(EngineEvent::Error {
            environment: environment.to_string(),
            kind,
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
