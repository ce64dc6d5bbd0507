//! HTTP client used for proxying to upstreams.

use super::tls::insecure_client_config;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Create a pooled HTTP/1.1 client for http and https upstreams.
///
/// Certificate verification is disabled.
pub fn create_http_client(connect_timeout: Duration) -> Result<HttpClient, rustls::Error> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(connect_timeout));
    http_connector.enforce_http(false);

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(insecure_client_config()?)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .build(https_connector);

    debug!(
        "Upstream client created (HTTP/1.1, connect timeout {}s)",
        connect_timeout.as_secs()
    );
    Ok(client)
}
