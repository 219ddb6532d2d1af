//! Proxysync - keeps an nginx reverse proxy routed to the containers around it
//!
//! This library provides a reconciliation loop that:
//! - Resolves the Docker network the nginx container is attached to
//! - Lists running containers on that network and their exposed ports
//! - Adds an `upstream` and a `location` block per container to the nginx config
//! - Rewrites the config file atomically and never duplicates an entry
//! - Reloads nginx inside its container after every change

pub mod config;
pub mod docker;
pub mod document;
pub mod entry;
pub mod error;
pub mod merge;
pub mod reconciler;
pub mod runtime;
pub mod store;

/// Package name from Cargo.toml
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
