//! Liveness and readiness checks across every configuration.
//!
//! [`HealthAggregator`] probes each configuration through a
//! [`HealthProbe`] concurrently, bounds each probe with its own timeout,
//! and folds the per-name results into a [`HealthStatus`]. Nothing is
//! cached: each check probes again. The HTTP handlers expose
//! `GET /health`, `/health/live` and `/health/ready`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::MessagingError;
use crate::manager::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Liveness,
    Readiness,
}

/// Something that can check one named configuration.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn probe_names(&self) -> Vec<String>;
    async fn probe(&self, name: &str) -> Result<(), MessagingError>;
}

#[async_trait]
impl HealthProbe for ConnectionRegistry {
    fn probe_names(&self) -> Vec<String> {
        ConnectionRegistry::probe_names(self)
            .map(str::to_string)
            .collect()
    }

    async fn probe(&self, name: &str) -> Result<(), MessagingError> {
        ConnectionRegistry::probe(self, name).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub kind: ProbeKind,
    pub up: bool,
    pub checks: BTreeMap<String, bool>,
}

impl HealthStatus {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.checks.keys().map(String::as_str)
    }

    pub fn failing(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|(_, up)| !**up)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Clone)]
pub struct HealthAggregator {
    probe: Arc<dyn HealthProbe>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    #[must_use]
    pub fn new(probe: Arc<dyn HealthProbe>, probe_timeout: Duration) -> Self {
        Self {
            probe,
            probe_timeout,
        }
    }

    /// Probe every configuration and AND the results. An empty set is up.
    pub async fn check(&self, kind: ProbeKind) -> HealthStatus {
        let names = self.probe.probe_names();
        let probes = names.iter().map(|name| async move {
            let outcome = tokio::time::timeout(self.probe_timeout, self.probe.probe(name)).await;
            let up = match outcome {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(config = %name, kind = ?kind, error = %e, "health probe failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        config = %name,
                        kind = ?kind,
                        timeout = ?self.probe_timeout,
                        "health probe timed out"
                    );
                    false
                }
            };
            (name.clone(), up)
        });

        let checks: BTreeMap<String, bool> = futures::future::join_all(probes)
            .await
            .into_iter()
            .collect();
        let up = checks.values().all(|up| *up);

        HealthStatus { kind, up, checks }
    }
}

const UP: &str = "UP";
const DOWN: &str = "DOWN";

fn label(up: bool) -> String {
    let label = if up { UP } else { DOWN };
    label.to_string()
}

fn status_code(up: bool) -> StatusCode {
    if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub checks: BTreeMap<String, String>,
}

impl From<HealthStatus> for ComponentHealth {
    fn from(status: HealthStatus) -> Self {
        Self {
            status: label(status.up),
            checks: status
                .checks
                .into_iter()
                .map(|(name, up)| (name, label(up)))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthComponents {
    pub liveness: ComponentHealth,
    pub readiness: ComponentHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HealthComponents,
}

/// Routes for the three health endpoints, bound to `aggregator`.
pub fn router<S>(aggregator: HealthAggregator) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(aggregator)
}

pub async fn health_handler(
    State(aggregator): State<HealthAggregator>,
) -> (StatusCode, Json<HealthResponse>) {
    let (liveness, readiness) = tokio::join!(
        aggregator.check(ProbeKind::Liveness),
        aggregator.check(ProbeKind::Readiness)
    );
    let up = liveness.up && readiness.up;

    (
        status_code(up),
        Json(HealthResponse {
            status: label(up),
            components: HealthComponents {
                liveness: liveness.into(),
                readiness: readiness.into(),
            },
        }),
    )
}

pub async fn liveness_handler(
    State(aggregator): State<HealthAggregator>,
) -> (StatusCode, Json<ComponentHealth>) {
    let status = aggregator.check(ProbeKind::Liveness).await;
    (status_code(status.up), Json(status.into()))
}

pub async fn readiness_handler(
    State(aggregator): State<HealthAggregator>,
) -> (StatusCode, Json<ComponentHealth>) {
    let status = aggregator.check(ProbeKind::Readiness).await;
    (status_code(status.up), Json(status.into()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeProbe {
        names: Vec<&'static str>,
        failing: BTreeSet<&'static str>,
        hanging: BTreeSet<&'static str>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeProbe {
        fn new(names: &[&'static str]) -> Self {
            Self {
                names: names.to_vec(),
                failing: BTreeSet::new(),
                hanging: BTreeSet::new(),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for FakeProbe {
        fn probe_names(&self) -> Vec<String> {
            self.names.iter().map(ToString::to_string).collect()
        }

        async fn probe(&self, name: &str) -> Result<(), MessagingError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.hanging.contains(name) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(name) {
                Err(MessagingError::ConnectionLost(format!("{name} is down")))
            } else {
                Ok(())
            }
        }
    }

    fn aggregator(probe: FakeProbe) -> (HealthAggregator, Arc<FakeProbe>) {
        let probe = Arc::new(probe);
        let aggregator = HealthAggregator::new(
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
            Duration::from_millis(200),
        );
        (aggregator, probe)
    }

    #[tokio::test]
    async fn empty_set_is_up_with_no_names() {
        let (aggregator, _) = aggregator(FakeProbe::new(&[]));
        let status = aggregator.check(ProbeKind::Readiness).await;
        assert!(status.up);
        assert_eq!(status.names().count(), 0);
    }

    #[tokio::test]
    async fn one_failing_probe_makes_verdict_down() {
        let mut probe = FakeProbe::new(&["<default>", "named-1"]);
        probe.failing.insert("named-1");
        let (aggregator, _) = aggregator(probe);

        let status = aggregator.check(ProbeKind::Liveness).await;
        assert!(!status.up);
        assert_eq!(status.failing().collect::<Vec<_>>(), vec!["named-1"]);
        assert!(status.checks["<default>"]);
    }

    #[tokio::test]
    async fn hanging_probe_is_reported_down_after_timeout() {
        let mut probe = FakeProbe::new(&["named-1", "named-2"]);
        probe.hanging.insert("named-2");
        let (aggregator, _) = aggregator(probe);

        let status = aggregator.check(ProbeKind::Readiness).await;
        assert!(!status.up);
        assert_eq!(status.failing().collect::<Vec<_>>(), vec!["named-2"]);
    }

    #[tokio::test]
    async fn probes_run_concurrently_with_sequential_result() {
        let names = ["a", "b", "c", "d"];
        let mut concurrent = FakeProbe::new(&names);
        concurrent.delay = Duration::from_millis(30);
        concurrent.failing.insert("c");
        let (aggregator, probe) = aggregator(concurrent);

        let status = aggregator.check(ProbeKind::Readiness).await;
        assert!(probe.max_in_flight.load(Ordering::SeqCst) > 1);

        let mut sequential = BTreeMap::new();
        for name in names {
            sequential.insert(name.to_string(), probe.probe(name).await.is_ok());
        }
        assert_eq!(status.checks, sequential);
    }

    #[test]
    fn component_health_labels_checks() {
        let status = HealthStatus {
            kind: ProbeKind::Liveness,
            up: false,
            checks: BTreeMap::from([("a".to_string(), true), ("b".to_string(), false)]),
        };
        let component = ComponentHealth::from(status);
        assert_eq!(component.status, "DOWN");
        assert_eq!(component.checks["a"], "UP");
        assert_eq!(component.checks["b"], "DOWN");
    }
}
