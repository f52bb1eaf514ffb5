use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::MessagingError;
use crate::transaction::Transaction;
use crate::transport::{
    Connection, ConnectionFactory, Session, XaConnection, XaConnectionFactory, XaSession,
};

struct XaChannel {
    connection: Box<dyn XaConnection>,
    session: Mutex<Box<dyn XaSession>>,
}

/// Sends to the destination bound to one configuration.
///
/// Plain sends go through a standard session. When the configuration has
/// XA enabled the producer also holds an XA session whose resource is
/// enlisted into the caller's ambient transaction by [`send_xa`].
///
/// [`send_xa`]: ProducerManager::send_xa
pub struct ProducerManager {
    name: String,
    destination: String,
    connection: Box<dyn Connection>,
    session: Mutex<Box<dyn Session>>,
    xa: Option<XaChannel>,
}

impl ProducerManager {
    pub(crate) async fn open(
        name: &str,
        destination: &str,
        factory: &dyn ConnectionFactory,
        xa_factory: Option<&dyn XaConnectionFactory>,
    ) -> Result<Self, MessagingError> {
        let connection = factory.create_connection().await?;
        let session = match connection.create_session().await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        let xa = match xa_factory {
            Some(xa_factory) => match open_xa(xa_factory).await {
                Ok(channel) => Some(channel),
                Err(e) => {
                    let _ = session.close().await;
                    let _ = connection.close().await;
                    return Err(e);
                }
            },
            None => None,
        };

        tracing::debug!(
            config = %name,
            destination = %destination,
            xa = xa.is_some(),
            "producer opened"
        );

        Ok(Self {
            name: name.to_string(),
            destination: destination.to_string(),
            connection,
            session: Mutex::new(session),
            xa,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub fn is_xa_enabled(&self) -> bool {
        self.xa.is_some()
    }

    /// Send outside any transaction. Failures are returned, never retried.
    pub async fn send(&self, payload: Bytes) -> Result<(), MessagingError> {
        let bytes = payload.len();
        self.session
            .lock()
            .await
            .send(&self.destination, payload)
            .await?;
        tracing::trace!(config = %self.name, destination = %self.destination, bytes, "message sent");
        Ok(())
    }

    /// Send as part of the transaction bound to the current task.
    ///
    /// The message becomes visible only if that transaction commits. Fails
    /// with [`MessagingError::NoActiveTransaction`] before touching the
    /// broker when no transaction is bound. A transport failure marks the
    /// transaction rollback-only.
    pub async fn send_xa(&self, payload: Bytes) -> Result<(), MessagingError> {
        let tx = Transaction::current().ok_or(MessagingError::NoActiveTransaction)?;
        let xa = self
            .xa
            .as_ref()
            .ok_or_else(|| MessagingError::configuration(&self.name, "XA is not enabled"))?;

        // Enlist and send under one lock so the send lands on this
        // transaction's branch.
        let session = xa.session.lock().await;
        tx.enlist(session.xa_resource())
            .await
            .map_err(|e| MessagingError::EnlistmentFailure(e.to_string()))?;

        if let Err(e) = session.send(&self.destination, payload).await {
            tx.set_rollback_only();
            return Err(e);
        }
        tracing::trace!(
            config = %self.name,
            destination = %self.destination,
            xid = %tx.xid(),
            "message sent in transaction"
        );
        Ok(())
    }

    /// Close every session and connection. All are attempted; the first
    /// failure is returned.
    pub async fn close(&self) -> Result<(), MessagingError> {
        let mut results = vec![
            self.session.lock().await.close().await,
            self.connection.close().await,
        ];
        if let Some(xa) = &self.xa {
            results.push(xa.session.lock().await.close().await);
            results.push(xa.connection.close().await);
        }
        results.into_iter().collect()
    }
}

async fn open_xa(factory: &dyn XaConnectionFactory) -> Result<XaChannel, MessagingError> {
    let connection = factory.create_xa_connection().await?;
    match connection.create_xa_session().await {
        Ok(session) => Ok(XaChannel {
            connection,
            session: Mutex::new(session),
        }),
        Err(e) => {
            let _ = connection.close().await;
            Err(e)
        }
    }
}
