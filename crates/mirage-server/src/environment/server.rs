//! Listener and accept loop for one environment.

use super::core::MockEnvironment;
use super::handler::handle_environment_request;
use crate::error::EngineError;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Bind the environment's port. Port 0 picks a free port.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, EngineError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| EngineError::from_bind(port, &e))
}

/// Serve `env` on `listener` until a shutdown signal arrives.
///
/// On shutdown the listener is closed and open connections finish their
/// in-flight response before closing.
pub fn spawn_server(
    listener: TcpListener,
    env: Arc<MockEnvironment>,
    tls: Option<TlsAcceptor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let env = Arc::clone(&env);
                            let tls = tls.clone();
                            let conn_shutdown = shutdown_rx.resubscribe();
                            tokio::spawn(async move {
                                match tls {
                                    Some(acceptor) => match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            serve_connection(tls_stream, env, addr, conn_shutdown).await
                                        }
                                        Err(e) => debug!("TLS handshake with {} failed: {}", addr, e),
                                    },
                                    None => serve_connection(stream, env, addr, conn_shutdown).await,
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on port {}: {}", port, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Environment on port {} shutting down", port);
                    break;
                }
            }
        }
    })
}

async fn serve_connection<S>(
    stream: S,
    env: Arc<MockEnvironment>,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let env = Arc::clone(&env);
        async move { handle_environment_request(req, env, addr).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!("Connection error from {}: {}", addr, e);
    }
}
