//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding the connection
//! registry, transaction manager and receive timeout), [`build_router`]
//! for assembling the messaging and health routes with middleware
//! layers, and [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::endpoint;
use crate::health::{self, HealthAggregator};
use crate::manager::ConnectionRegistry;
use crate::transaction::TransactionManager;

pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub transactions: TransactionManager,
    pub receive_timeout: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, receive_timeout: Duration) -> Self {
        Self {
            registry,
            transactions: TransactionManager::new(),
            receive_timeout,
        }
    }
}

/// Health routes are mounted only when an aggregator is given.
pub fn build_router(
    state: Arc<AppState>,
    health: Option<HealthAggregator>,
    max_body: usize,
) -> Router {
    let mut router = endpoint::router();
    if let Some(aggregator) = health {
        router = router.merge(health::router(aggregator));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
