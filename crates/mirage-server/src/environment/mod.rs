//! Mock environments.
//!
//! This module provides:
//! - `EnvironmentManager`: start, stop and inspect environments by uuid
//! - `MockEnvironment`: one started environment with its routes and upstream
//! - `Environment`: the definition supplied by the caller
//!
//! ## Module Structure
//!
//! - `types`: definition and status types
//! - `logs`: bounded request log
//! - `core`: per-environment runtime state
//! - `handler`: request pipeline
//! - `server`: listener and accept loop
//! - `manager`: lifecycle management

mod core;
mod handler;
mod logs;
mod manager;
mod server;
mod types;


pub use core::{EnvironmentState, MockEnvironment, ProxyUpstream};
pub use handler::{collapse_slashes, handle_environment_request};
pub use logs::RequestLog;
pub use manager::EnvironmentManager;
pub use server::{bind, spawn_server};
pub use types::{
    Environment, EnvironmentStatus, Header, HttpMethod, Phase, RequestLogEntry, Route, RouteFile,
};
