//! Configuration loading and validation.
//!
//! Defines the [`ConfigSource`] trait for pluggable config backends.
//! Submodules provide the data model ([`model`]), validation logic
//! ([`validation`]) and concrete file-based sources ([`sources`]).
//!
//! The registry is loaded once at startup and is read-only afterwards.

pub mod model;
pub mod sources;
pub mod validation;

use async_trait::async_trait;

use crate::error::BrokerlinkError;
use model::ConfigRegistry;

// async_trait is required here because ConfigSource is used as Box<dyn ConfigSource>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self) -> Result<ConfigRegistry, BrokerlinkError>;
}
