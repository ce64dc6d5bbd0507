use anyhow::Context;
use clap::Parser;
use mirage_server::{load_environments, EngineConfig, EngineEvent, EnvironmentManager};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mirage",
    version,
    about = "Serve mock HTTP environments from YAML or JSON definitions"
)]
struct Args {
    /// Environment definition file (repeatable)
    #[arg(short, long = "environment", env = "MIRAGE_ENVIRONMENT", value_delimiter = ',', required = true)]
    environments: Vec<PathBuf>,

    /// Engine configuration file (YAML)
    #[arg(short, long, env = "MIRAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "MIRAGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let default_directive: Directive = level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Mirror engine events into the log.
fn spawn_event_logger(manager: &EnvironmentManager) -> tokio::task::JoinHandle<()> {
    let mut rx = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(EngineEvent::RequestLogged { environment, entry }) => {
                    info!(
                        "[{}] {} {} from {}{}",
                        environment,
                        entry.method,
                        entry.url,
                        entry.client_address,
                        if entry.proxied { " (proxied)" } else { "" }
                    );
                }
                Ok(EngineEvent::Error {
                    environment,
                    kind,
                    message,
                }) => {
                    warn!("[{}] {:?}: {}", environment, kind, message);
                }
                Ok(EngineEvent::BindError {
                    environment,
                    reason,
                    message,
                }) => {
                    error!("[{}] bind failed ({:?}): {}", environment, reason, message);
                }
                Ok(event) => debug!("{:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut environments = Vec::new();
    for path in &args.environments {
        let loaded = load_environments(path)
            .with_context(|| format!("loading environments from {}", path.display()))?;
        info!("Loaded {} environment(s) from {}", loaded.len(), path.display());
        environments.extend(loaded);
    }

    let manager = EnvironmentManager::new(config);
    let logger = spawn_event_logger(&manager);

    let mut started = 0;
    for environment in environments {
        let name = environment.name.clone();
        match manager.start(environment).await {
            Ok(port) => {
                info!("Started '{}' on port {}", name, port);
                started += 1;
            }
            Err(e) => error!("Could not start '{}': {}", name, e),
        }
    }
    if started == 0 {
        anyhow::bail!("no environment could be started");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");

    manager.stop_all().await;
    logger.abort();
    Ok(())
}
