//! Mirage: a mock HTTP environment engine.
//!
//! Each [`Environment`] is served on its own port with route matching,
//! templated responses, per-caller response rotation, latency simulation,
//! CORS preflight handling and an optional proxy fallback.

pub mod behaviors;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod proxy;
pub mod response;
pub mod routing;
pub mod template;

pub use config::{load_environments, EngineConfig, TlsConfig};
pub use environment::{
    Environment, EnvironmentManager, EnvironmentStatus, Header, HttpMethod, Phase,
    RequestLogEntry, Route, RouteFile,
};
pub use error::{BindErrorReason, EngineError, ResponseError, RouteRegistrationError};
pub use events::{EngineEvent, ErrorKind, EventBus};
pub use template::{TemplateEngine, TemplateError};
