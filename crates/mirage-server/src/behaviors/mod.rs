//! Per-request behaviors applied around route dispatch.
//!
//! - `rotator` - serve a route's alternate bodies in turn, per caller
//! - `wait` - non-blocking latency

mod rotator;
mod wait;

pub use rotator::ResponseRotator;
pub use wait::apply_latency;
