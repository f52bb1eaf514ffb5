//! Brokerlink manages many named connections to message brokers from one
//! configuration file.
//!
//! Each named configuration gets its own connection factory, a consumer
//! and a producer bound to one destination, and an entry in the health
//! checks. Producers on XA-enabled configurations can send inside an
//! ambient transaction that commits atomically across configurations.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate, health).
//! - [`config`] -- Configuration model, file sources and validation.
//! - [`endpoint`] -- HTTP routes for sending and receiving per configuration.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`factory`] -- Connection factory construction from configuration entries.
//! - [`health`] -- Liveness/readiness aggregation and `GET /health*` handlers.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`manager`] -- Per-configuration consumer and producer managers.
//! - [`server`] -- Axum router assembly, shared state and graceful shutdown.
//! - [`transaction`] -- Ambient transactions and XA two-phase commit.
//! - [`transport`] -- Messaging traits and the in-vm `vm://` broker.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod health;
pub mod logging;
pub mod manager;
pub mod server;
pub mod transaction;
pub mod transport;
