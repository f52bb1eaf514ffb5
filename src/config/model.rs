//! Serde data structures for the brokerlink configuration file.
//!
//! Contains [`ConfigRegistry`] (the root), [`ConfigEntry`] and
//! [`HealthConfig`]. The default entry's fields live at the root of the
//! file and named entries sit under `named`. Every entry field is
//! optional so an entry that was never configured can be told apart from
//! one configured with default values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name under which the default entry appears in the resolved set.
pub const DEFAULT_CONFIG_NAME: &str = "<default>";

/// The effective configurations, keyed by name, in name order.
pub type ResolvedConfigs = BTreeMap<String, ConfigEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xa_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_exclude: Option<bool>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    /// Keys that match no field. Validation rejects the file when any
    /// entry has one.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl ConfigEntry {
    /// Every key an entry accepts, as spelled in config files.
    pub const FIELDS: [&'static str; 8] = [
        "url",
        "username",
        "password",
        "pool-size",
        "xa-enabled",
        "destination",
        "health-exclude",
        "properties",
    ];

    /// True iff no field has been explicitly set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.pool_size.is_none()
            && self.xa_enabled.is_none()
            && self.destination.is_none()
            && self.health_exclude.is_none()
            && self.properties.is_empty()
    }

    #[must_use]
    pub fn is_xa_enabled(&self) -> bool {
        self.xa_enabled.unwrap_or(false)
    }

    #[must_use]
    pub fn is_health_excluded(&self) -> bool {
        self.health_exclude.unwrap_or(false)
    }

    /// Destination the managers of this entry bind to. Falls back to the
    /// configuration name.
    #[must_use]
    pub fn destination_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.destination.as_deref().unwrap_or(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl HealthConfig {
    fn is_default(&self) -> bool {
        self.enabled.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigRegistry {
    #[serde(flatten)]
    pub default: ConfigEntry,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named: BTreeMap<String, ConfigEntry>,

    #[serde(default, skip_serializing_if = "HealthConfig::is_default")]
    pub health: HealthConfig,
}

impl ConfigRegistry {
    /// The named entries plus the default entry under
    /// [`DEFAULT_CONFIG_NAME`] when the default entry is non-empty.
    #[must_use]
    pub fn resolve(&self) -> ResolvedConfigs {
        let mut all = self.named.clone();
        if !self.default.is_empty() {
            all.insert(DEFAULT_CONFIG_NAME.to_string(), self.default.clone());
        }
        all
    }

    /// Health checking is opt-out: unset means enabled.
    #[must_use]
    pub fn is_health_check_enabled(&self) -> bool {
        self.health.enabled.unwrap_or(true)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.default.is_empty() && self.named.is_empty() && self.health.enabled.is_none()
    }
}
