//! EnvironmentManager - lifecycle management for multiple environments.
//!
//! Each running environment owns one listener task. Logs and rotation
//! counters outlive a stop and are only dropped by `clear_logs` or `delete`.

use super::core::{EnvironmentState, MockEnvironment};
use super::server::{bind, spawn_server};
use super::types::{Environment, EnvironmentStatus, RequestLogEntry};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::proxy::create_tls_acceptor;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

struct RunningEnvironment {
    port: u16,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Starts, stops and tracks environments by uuid.
pub struct EnvironmentManager {
    config: EngineConfig,
    events: EventBus,
    states: RwLock<HashMap<String, Arc<EnvironmentState>>>,
    running: Mutex<HashMap<String, RunningEnvironment>>,
}

impl EnvironmentManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            events: EventBus::default(),
            states: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn state_for(&self, uuid: &str) -> Arc<EnvironmentState> {
        if let Some(state) = self.states.read().get(uuid) {
            return Arc::clone(state);
        }
        let mut states = self.states.write();
        Arc::clone(
            states
                .entry(uuid.to_string())
                .or_insert_with(|| Arc::new(EnvironmentState::new(self.config.max_logs_per_environment))),
        )
    }

    fn existing_state(&self, uuid: &str) -> Result<Arc<EnvironmentState>, EngineError> {
        self.states
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))
    }

    /// Start serving `environment`. Returns the bound port.
    ///
    /// Starting an environment that is already running replaces the
    /// running instance.
    pub async fn start(&self, environment: Environment) -> Result<u16, EngineError> {
        let uuid = environment.uuid.clone();
        if self.running.lock().contains_key(&uuid) {
            warn!("Environment '{}' is already running, restarting", environment.name);
            self.stop(&uuid).await?;
        }

        let state = self.state_for(&uuid);
        state.set_starting();

        match self.launch(environment, Arc::clone(&state)).await {
            Ok(running) => {
                let port = running.port;
                state.set_running(port);
                self.running.lock().insert(uuid.clone(), running);
                self.events.emit(EngineEvent::Started {
                    environment: uuid,
                    port,
                });
                Ok(port)
            }
            Err(e) => {
                state.set_stopped();
                if let Some(reason) = e.bind_reason() {
                    self.events.emit(EngineEvent::BindError {
                        environment: uuid.clone(),
                        reason,
                        message: e.to_string(),
                    });
                }
                error!("Failed to start environment {}: {}", uuid, e);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        environment: Environment,
        state: Arc<EnvironmentState>,
    ) -> Result<RunningEnvironment, EngineError> {
        let tls = if environment.https {
            Some(self.tls_acceptor()?)
        } else {
            None
        };
        let scheme = if tls.is_some() { "https" } else { "http" };
        let name = environment.name.clone();
        let requested_port = environment.port;

        let env = Arc::new(MockEnvironment::new(
            environment,
            state,
            self.events.clone(),
            self.config.proxy_timeout(),
        )?);

        let listener = bind(&self.config.host, requested_port).await?;
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .map_err(|e| EngineError::from_bind(requested_port, &e))?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_server(listener, env, tls, shutdown_rx);

        info!(
            "Environment '{}' listening on {}://{}:{}",
            name, scheme, self.config.host, port
        );
        Ok(RunningEnvironment {
            port,
            shutdown_tx,
            handle,
        })
    }

    fn tls_acceptor(&self) -> Result<TlsAcceptor, EngineError> {
        let tls = self.config.tls.as_ref().ok_or_else(|| {
            EngineError::Tls("https environments require 'tls.cert_path' and 'tls.key_path'".to_string())
        })?;
        create_tls_acceptor(&tls.cert_path, &tls.key_path).map_err(|e| EngineError::Tls(e.to_string()))
    }

    /// Stop a running environment. Stopping a stopped environment is a no-op.
    pub async fn stop(&self, uuid: &str) -> Result<(), EngineError> {
        let state = self.existing_state(uuid)?;
        let Some(running) = self.running.lock().remove(uuid) else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.handle.await {
            error!("Listener task for {} ended abnormally: {}", uuid, e);
        }

        state.set_stopped();
        info!("Environment {} on port {} stopped", uuid, running.port);
        self.events.emit(EngineEvent::Stopped {
            environment: uuid.to_string(),
        });
        Ok(())
    }

    pub async fn stop_all(&self) {
        let uuids: Vec<String> = self.running.lock().keys().cloned().collect();
        for uuid in uuids {
            if let Err(e) = self.stop(&uuid).await {
                warn!("Failed to stop environment {}: {}", uuid, e);
            }
        }
    }

    /// Drop request logs and rotation counters.
    pub fn clear_logs(&self, uuid: &str) -> Result<(), EngineError> {
        self.existing_state(uuid)?.clear_logs();
        Ok(())
    }

    /// Stop the environment if needed and forget all of its state.
    pub async fn delete(&self, uuid: &str) -> Result<(), EngineError> {
        self.stop(uuid).await?;
        self.states.write().remove(uuid);
        info!("Environment {} deleted", uuid);
        Ok(())
    }

    /// Captured requests, newest first.
    pub fn logs(&self, uuid: &str) -> Result<Vec<RequestLogEntry>, EngineError> {
        Ok(self.existing_state(uuid)?.logs.snapshot())
    }

    pub fn status(&self, uuid: &str) -> Result<EnvironmentStatus, EngineError> {
        Ok(self.existing_state(uuid)?.status(uuid))
    }

    pub fn list(&self) -> Vec<EnvironmentStatus> {
        self.states
            .read()
            .iter()
            .map(|(uuid, state)| state.status(uuid))
            .collect()
    }
}
