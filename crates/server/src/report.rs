//! Bounded per-source request report.
//!
//! The application server records where each data request came from (the
//! `lb-from` header stamped by the balancer when tracing is enabled, or
//! `"direct"`), keeping a short recent history per source. `/report`
//! serves the whole map as JSON; it is how the traffic distribution
//! across replicas is inspected in testing.

use axum::http::HeaderMap;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::api::TRACE_HEADER;

/// How many timestamps are retained per source.
pub const HISTORY_PER_SOURCE: usize = 16;

#[derive(Default)]
pub struct Report {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl Report {
    /// Records one request under its source, trimming the oldest entries
    /// past [`HISTORY_PER_SOURCE`].
    pub fn process(&self, headers: &HeaderMap) {
        let source = headers
            .get(TRACE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("direct")
            .to_string();
        let stamp = chrono::Utc::now().to_rfc3339();

        let mut entries = self.entries.write();
        let history = entries.entry(source).or_default();
        history.push(stamp);
        if history.len() > HISTORY_PER_SOURCE {
            let excess = history.len() - HISTORY_PER_SOURCE;
            history.drain(..excess);
        }
    }

    /// A copy of the report for serialization.
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.entries.read().clone()
    }
}
