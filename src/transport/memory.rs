//! In-process brokers reachable through `vm://<id>` URLs.
//!
//! A [`MemoryBroker`] keeps one FIFO queue per destination. Brokers live
//! in a [`BrokerRegistry`] that the [`VmTransport`] resolves URLs
//! against when a connection is opened, so a factory may be built before
//! its broker is started. Stopping a broker fails pending receives with
//! `ConnectionLost` and makes new operations fail the same way.
//!
//! XA sessions buffer sends per transaction branch and only deliver them
//! to the queues when the branch commits.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use url::Url;

use super::{
    Connection, ConnectionFactory, Session, XaConnection, XaConnectionFactory, XaSession,
};
use crate::error::{MessagingError, XaError};
use crate::factory::{FactorySettings, Transport};
use crate::transaction::{Vote, XaResource, Xid};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Queue {
    messages: Mutex<VecDeque<Bytes>>,
    available: Notify,
}

impl Queue {
    fn push(&self, payload: Bytes) {
        lock(&self.messages).push_back(payload);
        self.available.notify_one();
    }

    async fn pop(&self) -> Bytes {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = lock(&self.messages).pop_front();
            if let Some(payload) = next {
                return payload;
            }
            notified.await;
        }
    }
}

pub struct MemoryBroker {
    id: String,
    credentials: Option<(String, String)>,
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    running: watch::Sender<bool>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(id.into(), None))
    }

    /// A broker that rejects connections without these credentials.
    #[must_use]
    pub fn with_credentials(
        id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            id.into(),
            Some((username.into(), password.into())),
        ))
    }

    fn build(id: String, credentials: Option<(String, String)>) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            id,
            credentials,
            queues: Mutex::new(HashMap::new()),
            running,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Stop accepting work. Queued messages are kept.
    pub fn stop(&self) {
        if self.running.send_replace(false) {
            tracing::info!(broker = %self.id, "in-vm broker stopped");
        }
    }

    pub fn start(&self) {
        if !self.running.send_replace(true) {
            tracing::info!(broker = %self.id, "in-vm broker started");
        }
    }

    /// Number of messages waiting on `destination`.
    #[must_use]
    pub fn depth(&self, destination: &str) -> usize {
        lock(&self.queues)
            .get(destination)
            .map_or(0, |q| lock(&q.messages).len())
    }

    fn queue(&self, destination: &str) -> Arc<Queue> {
        Arc::clone(lock(&self.queues).entry(destination.to_string()).or_default())
    }

    fn ensure_running(&self) -> Result<(), MessagingError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(self.lost())
        }
    }

    fn lost(&self) -> MessagingError {
        MessagingError::ConnectionLost(format!("broker vm://{} is stopped", self.id))
    }

    fn authenticate(&self, settings: &Credentials) -> Result<(), MessagingError> {
        match &self.credentials {
            None => Ok(()),
            Some((user, pass))
                if settings.username.as_deref() == Some(user.as_str())
                    && settings.password.as_deref() == Some(pass.as_str()) =>
            {
                Ok(())
            }
            Some(_) => Err(MessagingError::Authentication(
                settings
                    .username
                    .clone()
                    .unwrap_or_else(|| "<anonymous>".into()),
            )),
        }
    }

    fn deliver(&self, destination: &str, payload: Bytes) {
        self.queue(destination).push(payload);
    }

    async fn receive(
        &self,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError> {
        self.ensure_running()?;
        let queue = self.queue(destination);
        let mut running = self.running.subscribe();

        let wait = async {
            tokio::select! {
                payload = queue.pop() => Ok(payload),
                () = async {
                    let _ = running.wait_for(|up| !*up).await;
                } => Err(self.lost()),
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| MessagingError::ReceiveTimeout(limit))?,
            None => wait.await,
        }
    }
}

/// The embedded brokers a [`VmTransport`] can reach.
#[derive(Default)]
pub struct BrokerRegistry {
    brokers: Mutex<HashMap<String, Arc<MemoryBroker>>>,
}

impl BrokerRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start the broker with `id`, creating it if needed.
    pub fn start(&self, id: &str) -> Arc<MemoryBroker> {
        let broker = Arc::clone(
            lock(&self.brokers)
                .entry(id.to_string())
                .or_insert_with(|| MemoryBroker::new(id)),
        );
        broker.start();
        broker
    }

    /// Add a pre-built broker, replacing any broker with the same id.
    pub fn register(&self, broker: Arc<MemoryBroker>) {
        lock(&self.brokers).insert(broker.id().to_string(), broker);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<MemoryBroker>> {
        lock(&self.brokers).get(id).cloned()
    }

    pub fn stop_all(&self) {
        for broker in lock(&self.brokers).values() {
            broker.stop();
        }
    }
}

pub struct VmTransport {
    brokers: Arc<BrokerRegistry>,
}

impl VmTransport {
    #[must_use]
    pub fn new(brokers: Arc<BrokerRegistry>) -> Self {
        Self { brokers }
    }

    fn endpoint(&self, settings: &FactorySettings) -> Result<VmEndpoint, MessagingError> {
        let broker_id = settings
            .url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                MessagingError::configuration(
                    &settings.name,
                    format!("'{}' does not name a broker", settings.url),
                )
            })?
            .to_string();

        Ok(VmEndpoint {
            url: settings.url.clone(),
            broker_id,
            brokers: Arc::clone(&self.brokers),
            credentials: Credentials {
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
            pool: settings.pool_size.map(|n| Arc::new(Semaphore::new(n))),
            client_id: settings
                .properties
                .get("client-id")
                .cloned()
                .unwrap_or_else(|| settings.name.clone()),
        })
    }
}

impl Transport for VmTransport {
    fn scheme(&self) -> &'static str {
        "vm"
    }

    fn create_factory(
        &self,
        settings: &FactorySettings,
    ) -> Result<Arc<dyn ConnectionFactory>, MessagingError> {
        Ok(Arc::new(self.endpoint(settings)?))
    }

    fn create_xa_factory(
        &self,
        settings: &FactorySettings,
    ) -> Result<Arc<dyn XaConnectionFactory>, MessagingError> {
        Ok(Arc::new(self.endpoint(settings)?))
    }
}

#[derive(Clone)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

/// Factory for `vm://` connections; serves both the plain and XA role.
struct VmEndpoint {
    url: Url,
    broker_id: String,
    brokers: Arc<BrokerRegistry>,
    credentials: Credentials,
    pool: Option<Arc<Semaphore>>,
    client_id: String,
}

impl VmEndpoint {
    fn reach(&self) -> Result<Arc<MemoryBroker>, MessagingError> {
        let broker = self.brokers.get(&self.broker_id).ok_or_else(|| {
            MessagingError::ConnectionLost(format!("no broker listening at {}", self.url))
        })?;
        broker.ensure_running()?;
        broker.authenticate(&self.credentials)?;
        Ok(broker)
    }

    async fn connect(&self) -> Result<VmConnection, MessagingError> {
        let broker = self.reach()?;

        let permit = match &self.pool {
            Some(pool) => Some(
                Arc::clone(pool)
                    .acquire_owned()
                    .await
                    .map_err(|_| MessagingError::Closed("connection pool"))?,
            ),
            None => None,
        };

        tracing::trace!(client_id = %self.client_id, url = %self.url, "vm connection opened");
        Ok(VmConnection {
            broker,
            closed: Arc::new(AtomicBool::new(false)),
            permit: Mutex::new(permit),
        })
    }
}

#[async_trait]
impl ConnectionFactory for VmEndpoint {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>, MessagingError> {
        Ok(Box::new(self.connect().await?))
    }

    async fn ping(&self) -> Result<(), MessagingError> {
        self.reach().map(drop)
    }
}

#[async_trait]
impl XaConnectionFactory for VmEndpoint {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn create_xa_connection(&self) -> Result<Box<dyn XaConnection>, MessagingError> {
        Ok(Box::new(self.connect().await?))
    }
}

struct VmConnection {
    broker: Arc<MemoryBroker>,
    closed: Arc<AtomicBool>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl VmConnection {
    fn session(&self) -> Result<VmSession, MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::Closed("connection"));
        }
        self.broker.ensure_running()?;
        Ok(VmSession {
            broker: Arc::clone(&self.broker),
            connection_closed: Arc::clone(&self.closed),
            closed: AtomicBool::new(false),
        })
    }

    fn xa_session(&self) -> Result<VmXaSession, MessagingError> {
        let session = self.session()?;
        let resource = Arc::new(VmXaResource {
            name: format!("vm://{}", self.broker.id()),
            broker: Arc::clone(&self.broker),
            branches: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        });
        Ok(VmXaSession { session, resource })
    }

    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.permit).take();
    }
}

#[async_trait]
impl Connection for VmConnection {
    async fn create_session(&self) -> Result<Box<dyn Session>, MessagingError> {
        Ok(Box::new(self.session()?))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.shut();
        Ok(())
    }
}

#[async_trait]
impl XaConnection for VmConnection {
    async fn create_xa_session(&self) -> Result<Box<dyn XaSession>, MessagingError> {
        Ok(Box::new(self.xa_session()?))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.shut();
        Ok(())
    }
}

struct VmSession {
    broker: Arc<MemoryBroker>,
    connection_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl VmSession {
    fn check(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::Closed("session"));
        }
        if self.connection_closed.load(Ordering::Acquire) {
            return Err(MessagingError::Closed("connection"));
        }
        self.broker.ensure_running()
    }
}

#[async_trait]
impl Session for VmSession {
    async fn send(&self, destination: &str, payload: Bytes) -> Result<(), MessagingError> {
        self.check()?;
        self.broker.deliver(destination, payload);
        Ok(())
    }

    async fn receive(
        &self,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError> {
        self.check()?;
        self.broker.receive(destination, timeout).await
    }

    async fn ping(&self) -> Result<(), MessagingError> {
        self.check()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Default)]
struct Branch {
    pending: Vec<(String, Bytes)>,
    prepared: bool,
}

struct VmXaResource {
    name: String,
    broker: Arc<MemoryBroker>,
    branches: Mutex<HashMap<Xid, Branch>>,
    active: Mutex<Option<Xid>>,
}

impl VmXaResource {
    /// Buffer `payload` on the active branch. Hands the payload back when
    /// no branch is active.
    fn buffer(&self, destination: &str, payload: Bytes) -> Option<Bytes> {
        let active = lock(&self.active).clone();
        let Some(xid) = active else {
            return Some(payload);
        };
        match lock(&self.branches).get_mut(&xid) {
            Some(branch) => {
                branch.pending.push((destination.to_string(), payload));
                None
            }
            None => Some(payload),
        }
    }

    #[cfg(test)]
    fn open_branches(&self) -> usize {
        lock(&self.branches).len()
    }

    fn unavailable(&self) -> Result<(), XaError> {
        if self.broker.is_running() {
            Ok(())
        } else {
            Err(XaError::ResourceUnavailable(self.name.clone()))
        }
    }
}

#[async_trait]
impl XaResource for VmXaResource {
    fn resource_name(&self) -> &str {
        &self.name
    }

    async fn start(&self, xid: &Xid) -> Result<(), XaError> {
        self.unavailable()?;
        let mut branches = lock(&self.branches);
        if branches.get(xid).is_some_and(|b| b.prepared) {
            return Err(XaError::Protocol(format!("branch {xid} is already prepared")));
        }
        branches.entry(xid.clone()).or_default();
        *lock(&self.active) = Some(xid.clone());
        Ok(())
    }

    async fn end(&self, xid: &Xid) -> Result<(), XaError> {
        if !lock(&self.branches).contains_key(xid) {
            return Err(XaError::UnknownXid(xid.to_string()));
        }
        let mut active = lock(&self.active);
        if active.as_ref() == Some(xid) {
            *active = None;
        }
        Ok(())
    }

    async fn prepare(&self, xid: &Xid) -> Result<Vote, XaError> {
        self.unavailable()?;
        let mut branches = lock(&self.branches);
        let branch = branches
            .get_mut(xid)
            .ok_or_else(|| XaError::UnknownXid(xid.to_string()))?;
        if branch.pending.is_empty() {
            branches.remove(xid);
            return Ok(Vote::ReadOnly);
        }
        branch.prepared = true;
        Ok(Vote::Commit)
    }

    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError> {
        let branch = lock(&self.branches)
            .remove(xid)
            .ok_or_else(|| XaError::UnknownXid(xid.to_string()))?;

        if one_phase {
            self.unavailable()?;
        } else if !branch.prepared {
            return Err(XaError::Protocol(format!(
                "two-phase commit of unprepared branch {xid}"
            )));
        }

        for (destination, payload) in branch.pending {
            self.broker.deliver(&destination, payload);
        }
        Ok(())
    }

    async fn rollback(&self, xid: &Xid) -> Result<(), XaError> {
        if let Some(branch) = lock(&self.branches).remove(xid) {
            tracing::debug!(
                resource = %self.name,
                xid = %xid,
                discarded = branch.pending.len(),
                "branch rolled back"
            );
        }
        let mut active = lock(&self.active);
        if active.as_ref() == Some(xid) {
            *active = None;
        }
        Ok(())
    }
}

struct VmXaSession {
    session: VmSession,
    resource: Arc<VmXaResource>,
}

#[async_trait]
impl Session for VmXaSession {
    async fn send(&self, destination: &str, payload: Bytes) -> Result<(), MessagingError> {
        self.session.check()?;
        if let Some(payload) = self.resource.buffer(destination, payload) {
            self.session.broker.deliver(destination, payload);
        }
        Ok(())
    }

    async fn receive(
        &self,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError> {
        self.session.receive(destination, timeout).await
    }

    async fn ping(&self) -> Result<(), MessagingError> {
        self.session.ping().await
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.session.close().await
    }
}

impl XaSession for VmXaSession {
    fn xa_resource(&self) -> Arc<dyn XaResource> {
        Arc::clone(&self.resource) as Arc<dyn XaResource>
    }
}
