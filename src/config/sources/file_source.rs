//! Generic async file-based config source.
//!
//! [`FileSource`] implements [`ConfigSource`] for any file format by
//! accepting a deserialization function at construction time. It reads
//! the file asynchronously via Tokio and validates the result. Only
//! structural errors fail the load; an entry with bad fields is logged
//! here and disabled when the connection registry is built.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::model::ConfigRegistry;
use crate::config::validation::{entry_errors, validate_structure};
use crate::config::ConfigSource;
use crate::error::BrokerlinkError;

type Deserialize = fn(&str) -> Result<ConfigRegistry, Box<dyn std::error::Error + Send + Sync>>;

pub struct FileSource {
    path: PathBuf,
    name: &'static str,
    deserialize: Deserialize,
}

impl FileSource {
    #[must_use]
    pub fn new(path: PathBuf, name: &'static str, deserialize: Deserialize) -> Self {
        Self {
            path,
            name,
            deserialize,
        }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn load(&self) -> Result<ConfigRegistry, BrokerlinkError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BrokerlinkError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                BrokerlinkError::Io(e)
            }
        })?;

        let registry = (self.deserialize)(&content).map_err(|e| BrokerlinkError::ConfigParse {
            path: self.path.display().to_string(),
            source: e,
        })?;

        if let Err(errors) = validate_structure(&registry) {
            return Err(BrokerlinkError::ConfigValidation { errors });
        }

        for (name, entry) in registry.resolve() {
            for error in entry_errors(&name, &entry) {
                tracing::warn!(
                    config = %name,
                    field = %error.field,
                    error = %error.message,
                    "invalid configuration entry"
                );
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            format = self.name,
            configurations = registry.resolve().len(),
            "config file loaded"
        );
        Ok(registry)
    }
}
