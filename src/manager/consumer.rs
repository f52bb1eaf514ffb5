use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{watch, Mutex};

use crate::error::MessagingError;
use crate::transport::{Connection, ConnectionFactory, Session};

/// Receives from the destination bound to one configuration.
///
/// Owns one connection and one session. Concurrent callers queue on the
/// session lock, so at most one receive is in flight per manager. A
/// caller's timeout covers its time in that queue.
pub struct ConsumerManager {
    name: String,
    destination: String,
    connection: Box<dyn Connection>,
    session: Mutex<Box<dyn Session>>,
    closed: watch::Sender<bool>,
}

impl ConsumerManager {
    pub(crate) async fn open(
        name: &str,
        destination: &str,
        factory: &dyn ConnectionFactory,
    ) -> Result<Self, MessagingError> {
        let connection = factory.create_connection().await?;
        let session = match connection.create_session().await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };
        tracing::debug!(config = %name, destination = %destination, "consumer opened");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            name: name.to_string(),
            destination: destination.to_string(),
            connection,
            session: Mutex::new(session),
            closed,
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

    /// Take exactly one message from the bound destination.
    ///
    /// `None` waits until a message arrives, the connection drops or the
    /// manager is closed.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Bytes, MessagingError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(MessagingError::Closed("session"));
        }

        let wait = async {
            tokio::select! {
                result = async {
                    let session = self.session.lock().await;
                    session.receive(&self.destination, timeout).await
                } => result,
                _ = closed.wait_for(|done| *done) => Err(MessagingError::Closed("session")),
            }
        };

        let payload = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| MessagingError::ReceiveTimeout(limit))??,
            None => wait.await?,
        };
        tracing::trace!(
            config = %self.name,
            destination = %self.destination,
            bytes = payload.len(),
            "message received"
        );
        Ok(payload)
    }

    /// Close the session and connection. Pending receives fail with
    /// `Closed` instead of holding the session.
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.closed.send_replace(true);
        let session_result = self.session.lock().await.close().await;
        let connection_result = self.connection.close().await;
        session_result.and(connection_result)
    }
}
