//! Proxy fallback to a real upstream.
//!
//! Requests no route claims are replayed, with their buffered body, against
//! the environment's upstream. TLS verification toward the upstream is
//! disabled.

mod client;
mod forwarding;
mod headers;
mod tls;

pub use client::{create_http_client, HttpClient};
pub use forwarding::{forward_request_with_body, ProxyTarget};
pub use headers::{is_hop_by_hop, strip_hop_by_hop};
pub use tls::{create_tls_acceptor, NoVerifier};
