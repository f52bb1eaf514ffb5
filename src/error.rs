//! Unified error types for brokerlink.
//!
//! Defines [`BrokerlinkError`] (bootstrap and CLI failures),
//! [`MessagingError`] (runtime send/receive/probe failures),
//! [`TransactionError`] and [`XaError`] for the transaction boundary,
//! and [`ValidationError`] for config validation failures. All use
//! `thiserror` for `Display` and `Error` derives.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub config: String,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  config {}: {}: {}", self.config, self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn format_errors(errors: &[ValidationError]) -> String {
    use std::fmt::Write;
    let mut buf = String::new();
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        // write! to String is infallible (only fails on OOM which is unrecoverable)
        let _ = write!(buf, "{e}");
    }
    buf
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BrokerlinkError {
    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Config validation failed:\n{}", format_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("File already exists: {}", path.display())]
    FileExists { path: PathBuf },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),
}

/// Failures surfaced by connection managers, factories and transports.
///
/// Every variant carries owned strings only, so a failure recorded for one
/// configuration at startup can be handed to each later caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MessagingError {
    #[error("configuration '{name}' is unusable: {message}")]
    Configuration { name: String, message: String },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("no message received within {}ms", .0.as_millis())]
    ReceiveTimeout(Duration),

    #[error("no active transaction on the current task")]
    NoActiveTransaction,

    #[error("failed to enlist XA resource: {0}")]
    EnlistmentFailure(String),

    #[error("authentication rejected for user '{0}'")]
    Authentication(String),

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl MessagingError {
    pub(crate) fn configuration(name: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransactionError {
    #[error("transaction {xid} is {status}, expected active")]
    NotActive { xid: String, status: &'static str },

    #[error("transaction {xid} rolled back: {reason}")]
    RolledBack { xid: String, reason: String },

    #[error("transaction {xid} partially committed: {failures} resource(s) failed to commit")]
    Heuristic { xid: String, failures: usize },

    #[error("resource '{resource}' rejected enlistment: {source}")]
    Enlist {
        resource: String,
        #[source]
        source: XaError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum XaError {
    #[error("unknown transaction branch {0}")]
    UnknownXid(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
}
