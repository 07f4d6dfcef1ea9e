//! Load balancer binary.
//!
//! Listens on `LB_PORT` and forwards every request to one of the
//! backends in `LB_BACKENDS` (comma-separated `host:port` list),
//! selected by a 32-bit FNV-1a hash of the client address so that each
//! client keeps hitting the same backend while the healthy set is
//! stable.
//!
//! Configuration, all via environment variables:
//!
//! ```text
//! LB_PORT         listen port                     (default: 8090)
//! LB_BACKENDS     comma-separated backend pool    (default: server1:8080,server2:8080,server3:8080)
//! LB_TIMEOUT_SEC  upstream request timeout        (default: 10)
//! LB_HTTPS        probe/forward over https        (default: false)
//! LB_TRACE        stamp lb-from tracing headers   (default: false)
//! ```

use anyhow::Result;
use balancer::pool::BackendPool;
use balancer::probe;
use balancer::proxy::{self, Balancer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let port: u16 = env_or("LB_PORT", "8090").parse().unwrap_or(8090);
    let timeout_sec: u64 = env_or("LB_TIMEOUT_SEC", "10").parse().unwrap_or(10);
    let https: bool = env_or("LB_HTTPS", "false").parse().unwrap_or(false);
    let trace: bool = env_or("LB_TRACE", "false").parse().unwrap_or(false);
    let backends: Vec<String> = env_or("LB_BACKENDS", "server1:8080,server2:8080,server3:8080")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_sec))
        .build()?;

    let lb = Arc::new(Balancer {
        pool: BackendPool::new(backends),
        client,
        scheme: if https { "https" } else { "http" },
        trace,
    });

    probe::initial_sweep(&lb).await;
    probe::spawn_probes(Arc::clone(&lb));

    let app = axum::Router::new()
        .fallback(proxy::handle)
        .with_state(Arc::clone(&lb))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, trace, backends = lb.pool.backends().len(), "load balancer listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
