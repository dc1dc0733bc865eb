//! Shared configuration and run-state broker for instrument control.
//!
//! Several cooperating processes (acquisition control, live viewers, analysis
//! tools) share one small key-value database holding the experiment context:
//! who is measuring, under which project, where data goes, and the running
//! dataset counter. This crate is the typed view over that database.
//!
//! - [`client`]: [`ConfigurationClient`], typed reads and writes, derived
//!   paths, counter bookkeeping and snapshots.
//! - [`field`]: the static field registry and its validators.
//! - [`snapshot`]: YAML export and import of writable fields.
//! - [`backend`]: the key-value store (Redis, or in-memory for tests).
//! - [`detector`]: acquisition appliance session built on top of the client.
//! - [`config`]: connection settings from `epoc.toml` and `EPOC_*` variables.

pub mod backend;
pub mod client;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod field;
pub mod guard;
pub mod label;
pub mod snapshot;

pub use client::ConfigurationClient;
pub use error::{AppResult, EpocError};
