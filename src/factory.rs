//! Connection factory construction from resolved configuration entries.
//!
//! [`ConnectionFactoryProvider`] maps an entry's URL scheme to a
//! registered [`Transport`] and asks it for a standard or XA-capable
//! factory. Nothing here touches the network.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use url::Url;

use crate::config::model::ConfigEntry;
use crate::error::MessagingError;
use crate::transport::{ConnectionFactory, XaConnectionFactory};

/// Everything a transport needs to build a factory for one configuration.
#[derive(Debug, Clone)]
pub struct FactorySettings {
    pub name: String,
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pool_size: Option<usize>,
    pub properties: BTreeMap<String, String>,
}

pub trait Transport: Send + Sync {
    /// URL scheme served by this transport, e.g. `vm`.
    fn scheme(&self) -> &'static str;

    fn create_factory(
        &self,
        settings: &FactorySettings,
    ) -> Result<Arc<dyn ConnectionFactory>, MessagingError>;

    fn create_xa_factory(
        &self,
        settings: &FactorySettings,
    ) -> Result<Arc<dyn XaConnectionFactory>, MessagingError>;
}

#[derive(Default, Clone)]
pub struct ConnectionFactoryProvider {
    transports: HashMap<&'static str, Arc<dyn Transport>>,
    default_url: Option<Url>,
}

impl ConnectionFactoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transports.insert(transport.scheme(), Arc::new(transport));
        self
    }

    /// URL used for entries that do not set one.
    #[must_use]
    pub fn with_default_url(mut self, url: Url) -> Self {
        self.default_url = Some(url);
        self
    }

    pub fn create_factory(
        &self,
        name: &str,
        entry: &ConfigEntry,
    ) -> Result<Arc<dyn ConnectionFactory>, MessagingError> {
        let (transport, settings) = self.settings(name, entry)?;
        transport.create_factory(&settings)
    }

    /// Only valid for entries with `xa-enabled: true`.
    pub fn create_xa_factory(
        &self,
        name: &str,
        entry: &ConfigEntry,
    ) -> Result<Arc<dyn XaConnectionFactory>, MessagingError> {
        if !entry.is_xa_enabled() {
            return Err(MessagingError::configuration(name, "XA is not enabled"));
        }
        let (transport, settings) = self.settings(name, entry)?;
        transport.create_xa_factory(&settings)
    }

    fn settings(
        &self,
        name: &str,
        entry: &ConfigEntry,
    ) -> Result<(Arc<dyn Transport>, FactorySettings), MessagingError> {
        let url = match (&entry.url, &self.default_url) {
            (Some(raw), _) => Url::parse(raw).map_err(|e| {
                MessagingError::configuration(name, format!("invalid url '{raw}': {e}"))
            })?,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(MessagingError::configuration(
                    name,
                    "no url configured and no default available",
                ))
            }
        };

        let transport = self.transports.get(url.scheme()).cloned().ok_or_else(|| {
            MessagingError::configuration(
                name,
                format!("no transport registered for scheme '{}'", url.scheme()),
            )
        })?;

        let settings = FactorySettings {
            name: name.to_string(),
            url,
            username: entry.username.clone(),
            password: entry.password.clone(),
            pool_size: entry.pool_size,
            properties: entry.properties.clone(),
        };
        Ok((transport, settings))
    }
}
