//! `brokerlink run`: start the messaging service.
//!
//! Loads the configuration registry from file, starts any embedded
//! in-vm brokers, builds the connection registry, and serves the
//! messaging and health endpoints until SIGTERM / Ctrl+C. On shutdown
//! every connection manager is closed before the brokers stop.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::cli::RunArgs;
use crate::config::model::ConfigRegistry;
use crate::config::sources;
use crate::error::BrokerlinkError;
use crate::factory::ConnectionFactoryProvider;
use crate::health::{HealthAggregator, HealthProbe};
use crate::logging;
use crate::manager::ConnectionRegistry;
use crate::server::{self, AppState};
use crate::transport::memory::{BrokerRegistry, VmTransport};

const CANDIDATES: [&str; 4] = [
    "brokerlink.yaml",
    "brokerlink.yml",
    "brokerlink.json",
    "brokerlink.toml",
];

pub async fn execute(args: RunArgs) -> Result<(), BrokerlinkError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let registry = load_registry(args.config.as_deref()).await?;

    let brokers = BrokerRegistry::new();
    for id in &args.embedded {
        brokers.start(id);
    }

    let mut provider =
        ConnectionFactoryProvider::new().with_transport(VmTransport::new(Arc::clone(&brokers)));
    if let Some(id) = args.embedded.first() {
        let url = Url::parse(&format!("vm://{id}")).map_err(|e| BrokerlinkError::UriParse {
            source: Box::new(e),
        })?;
        provider = provider.with_default_url(url);
    }

    let resolved = registry.resolve();
    let connections = Arc::new(ConnectionRegistry::build(&resolved, &provider));

    let health = health_aggregator(&registry, &connections, args.probe_timeout);
    if registry.is_empty() {
        tracing::info!("no configuration found, messaging subsystem inactive");
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&connections),
        Duration::from_millis(args.receive_timeout),
    ));
    let health_routes = health.is_some();
    let router = server::build_router(state, health, args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        configurations = resolved.len(),
        embedded_brokers = args.embedded.len(),
        health = health_routes,
        "brokerlink started"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    connections.shutdown().await;
    brokers.stop_all();

    tracing::info!("brokerlink stopped");
    Ok(())
}

/// Health routes exist only for a non-empty registry with checks enabled.
fn health_aggregator(
    registry: &ConfigRegistry,
    connections: &Arc<ConnectionRegistry>,
    probe_timeout_ms: u64,
) -> Option<HealthAggregator> {
    if registry.is_empty() || !registry.is_health_check_enabled() {
        return None;
    }
    let probe: Arc<dyn HealthProbe> = Arc::clone(connections) as Arc<dyn HealthProbe>;
    Some(HealthAggregator::new(
        probe,
        Duration::from_millis(probe_timeout_ms),
    ))
}

/// Load from `explicit`, else the first candidate file in the working
/// directory, else an empty registry.
pub async fn load_registry(explicit: Option<&Path>) -> Result<ConfigRegistry, BrokerlinkError> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => detect_config_file().await,
    };

    let Some(path) = path else {
        return Ok(ConfigRegistry::default());
    };

    let source = sources::for_path(&path)?;
    let registry = source.load().await?;
    tracing::info!(
        path = %path.display(),
        format = source.name(),
        configurations = registry.resolve().len(),
        health_checks = registry.is_health_check_enabled(),
        "config loaded"
    );
    Ok(registry)
}

async fn detect_config_file() -> Option<PathBuf> {
    for name in CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return Some(path);
        }
    }
    None
}
