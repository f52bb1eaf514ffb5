//! Per-configuration connection managers.
//!
//! [`ConnectionRegistry`] is built once from the resolved configurations.
//! It creates the factories for every name up front and opens the
//! [`ConsumerManager`] and [`ProducerManager`] for a name the first time
//! each is asked for. A name whose entry is invalid or whose factory
//! cannot be built stays in the registry with its error, which every
//! later request for it returns; the other names are unaffected.

mod consumer;
mod producer;

pub use consumer::ConsumerManager;
pub use producer::ProducerManager;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;

use crate::config::model::{ConfigEntry, ResolvedConfigs};
use crate::config::validation::entry_errors;
use crate::error::MessagingError;
use crate::factory::ConnectionFactoryProvider;
use crate::transport::{ConnectionFactory, XaConnectionFactory};

struct Factories {
    standard: Arc<dyn ConnectionFactory>,
    xa: Option<Arc<dyn XaConnectionFactory>>,
}

/// One lazily opened manager. `opening` serializes opens; `current` is
/// only locked briefly, so closing never waits on an open in progress.
struct Cached<M> {
    current: StdMutex<Option<Arc<M>>>,
    opening: Mutex<()>,
}

impl<M> Cached<M> {
    fn new() -> Self {
        Self {
            current: StdMutex::new(None),
            opening: Mutex::new(()),
        }
    }

    fn get(&self) -> Option<Arc<M>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take(&self) -> Option<Arc<M>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Store `manager` unless the registry has started shutting down.
    fn install(&self, manager: &Arc<M>, closing: &AtomicBool) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if closing.load(Ordering::SeqCst) {
            return false;
        }
        *current = Some(Arc::clone(manager));
        true
    }
}

struct Slot {
    destination: String,
    health_excluded: bool,
    factories: Result<Factories, MessagingError>,
    consumer: Cached<ConsumerManager>,
    producer: Cached<ProducerManager>,
}

pub struct ConnectionRegistry {
    slots: BTreeMap<String, Slot>,
    closing: AtomicBool,
}

fn factories(
    name: &str,
    entry: &ConfigEntry,
    provider: &ConnectionFactoryProvider,
) -> Result<Factories, MessagingError> {
    let invalid = entry_errors(name, entry);
    if !invalid.is_empty() {
        let message = invalid
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(MessagingError::configuration(name, message));
    }

    let standard = provider.create_factory(name, entry)?;
    let xa = if entry.is_xa_enabled() {
        Some(provider.create_xa_factory(name, entry)?)
    } else {
        None
    };
    Ok(Factories { standard, xa })
}

impl ConnectionRegistry {
    /// Build factories for every configuration. Nothing connects yet.
    #[must_use]
    pub fn build(resolved: &ResolvedConfigs, provider: &ConnectionFactoryProvider) -> Self {
        let slots = resolved
            .iter()
            .map(|(name, entry)| {
                let factories = factories(name, entry, provider);

                match &factories {
                    Ok(f) => tracing::info!(
                        config = %name,
                        url = %f.standard.url(),
                        xa = f.xa.is_some(),
                        "connection factory ready"
                    ),
                    Err(e) => tracing::error!(
                        config = %name,
                        error = %e,
                        "connection factory unavailable, configuration disabled"
                    ),
                }

                let slot = Slot {
                    destination: entry.destination_or(name).to_string(),
                    health_excluded: entry.is_health_excluded(),
                    factories,
                    consumer: Cached::new(),
                    producer: Cached::new(),
                };
                (name.clone(), slot)
            })
            .collect();

        Self {
            slots,
            closing: AtomicBool::new(false),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Names that take part in health checks.
    pub fn probe_names(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .filter(|(_, slot)| !slot.health_excluded)
            .map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, name: &str) -> Result<(&Slot, &Factories), MessagingError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(MessagingError::Closed("connection registry"));
        }
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| MessagingError::configuration(name, "no such configuration"))?;
        let factories = slot.factories.as_ref().map_err(Clone::clone)?;
        Ok((slot, factories))
    }

    async fn get_or_open<M, F, Fut>(
        &self,
        cached: &Cached<M>,
        close: impl FnOnce(Arc<M>) -> Fut,
        open: F,
    ) -> Result<Arc<M>, MessagingError>
    where
        F: Future<Output = Result<M, MessagingError>>,
        Fut: Future<Output = Result<(), MessagingError>>,
    {
        if let Some(manager) = cached.get() {
            return Ok(manager);
        }
        let _opening = cached.opening.lock().await;
        if let Some(manager) = cached.get() {
            return Ok(manager);
        }

        let manager = Arc::new(open.await?);
        if cached.install(&manager, &self.closing) {
            Ok(manager)
        } else {
            let _ = close(manager).await;
            Err(MessagingError::Closed("connection registry"))
        }
    }

    /// The consumer for `name`, opened on first use.
    pub async fn consumer(&self, name: &str) -> Result<Arc<ConsumerManager>, MessagingError> {
        let (slot, factories) = self.slot(name)?;
        self.get_or_open(
            &slot.consumer,
            |manager| async move { manager.close().await },
            ConsumerManager::open(name, &slot.destination, factories.standard.as_ref()),
        )
        .await
    }

    /// The producer for `name`, opened on first use.
    pub async fn producer(&self, name: &str) -> Result<Arc<ProducerManager>, MessagingError> {
        let (slot, factories) = self.slot(name)?;
        self.get_or_open(
            &slot.producer,
            |manager| async move { manager.close().await },
            ProducerManager::open(
                name,
                &slot.destination,
                factories.standard.as_ref(),
                factories.xa.as_deref(),
            ),
        )
        .await
    }

    /// Ping the broker behind `name` without touching its managers or
    /// their connection pool.
    pub async fn probe(&self, name: &str) -> Result<(), MessagingError> {
        let (_, factories) = self.slot(name)?;
        factories.standard.ping().await
    }

    /// Close and forget both managers of `name`. The next request opens
    /// fresh ones.
    pub async fn release(&self, name: &str) -> Result<(), MessagingError> {
        let Some(slot) = self.slots.get(name) else {
            return Ok(());
        };
        let producer = slot.producer.take();
        let consumer = slot.consumer.take();

        let mut result = Ok(());
        if let Some(producer) = producer {
            result = result.and(producer.close().await);
        }
        if let Some(consumer) = consumer {
            result = result.and(consumer.close().await);
        }
        if let Err(ref e) = result {
            tracing::warn!(config = %name, error = %e, "failed to close connection manager");
        }
        result
    }

    /// Release every configuration and refuse to open new managers. A
    /// failure on one name does not stop the others from closing.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let mut failed = 0usize;
        for name in self.slots.keys() {
            if self.release(name).await.is_err() {
                failed += 1;
            }
        }
        tracing::info!(configs = self.slots.len(), failed, "connection managers closed");
    }
}
