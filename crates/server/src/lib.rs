//! # Server - HTTP façade over the datastore
//!
//! Two thin JSON surfaces over one [`datastore::Store`]:
//!
//! - the **storage API** (`db-server` binary): raw key access under
//!   `/db/{key}`, GET to read and POST to write;
//! - the **application API** (`app-server` binary): the
//!   `/api/v1/some-data` data endpoint, the `/health` probe target, and
//!   the `/report` traffic report.
//!
//! Handlers translate requests into engine calls and engine errors into
//! status codes; everything stateful lives in the engine or the
//! [`report::Report`].

pub mod api;
pub mod report;

/// Reads a configuration value from the environment, falling back to
/// `default`.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
