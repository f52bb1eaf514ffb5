//! Client-side messaging abstractions.
//!
//! A [`ConnectionFactory`] opens [`Connection`]s, which open
//! [`Session`]s that send and receive on named destinations. The XA
//! variants mirror the same shape, with [`XaSession`] additionally
//! exposing the [`XaResource`] a transaction manager drives.
//!
//! Factories do no I/O when they are built; connections are opened when a
//! manager asks for one, and health checks go through
//! [`ConnectionFactory::ping`]. Transports for concrete brokers
//! plug in through [`Transport`](crate::factory::Transport). The built-in
//! [`memory`] transport serves `vm://` URLs from in-process brokers.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::MessagingError;
use crate::transaction::XaResource;

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    fn url(&self) -> &Url;
    async fn create_connection(&self) -> Result<Box<dyn Connection>, MessagingError>;

    /// Round trip to the broker with this factory's settings. Does not
    /// take a slot from the factory's connection pool.
    async fn ping(&self) -> Result<(), MessagingError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_session(&self) -> Result<Box<dyn Session>, MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// A single-threaded unit of work against the broker.
///
/// Callers serialize access; a session is never driven from two tasks at
/// once.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send(&self, destination: &str, payload: Bytes) -> Result<(), MessagingError>;

    /// Wait for one message. `None` waits until a message arrives or the
    /// connection is lost.
    async fn receive(
        &self,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError>;

    /// Cheapest possible round trip that proves the session is usable.
    async fn ping(&self) -> Result<(), MessagingError>;

    async fn close(&self) -> Result<(), MessagingError>;
}

#[async_trait]
pub trait XaConnectionFactory: Send + Sync {
    fn url(&self) -> &Url;
    async fn create_xa_connection(&self) -> Result<Box<dyn XaConnection>, MessagingError>;
}

#[async_trait]
pub trait XaConnection: Send + Sync {
    async fn create_xa_session(&self) -> Result<Box<dyn XaSession>, MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// A session whose sends join whichever transaction branch its resource
/// is currently associated with.
pub trait XaSession: Session {
    fn xa_resource(&self) -> Arc<dyn XaResource>;
}
