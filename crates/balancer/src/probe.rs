//! Periodic backend health probing.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::proxy::Balancer;

/// How often each backend is re-probed.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// One probe: `GET {scheme}://{backend}/health`. Healthy iff the reply is
/// exactly 200; transport errors and timeouts count as unhealthy.
pub async fn check(lb: &Balancer, backend: &str) -> bool {
    let url = format!("{}://{}/health", lb.scheme, backend);
    match lb.client.get(&url).send().await {
        Ok(resp) => resp.status() == reqwest::StatusCode::OK,
        Err(_) => false,
    }
}

/// One synchronous sweep over the configured pool so the healthy set is
/// populated before the first request is served. Only positive results
/// are recorded; unreachable backends simply stay out of the pool.
pub async fn initial_sweep(lb: &Balancer) {
    for backend in lb.pool.backends().to_vec() {
        if check(lb, &backend).await {
            lb.pool.set_health(&backend, true);
        }
    }
}

/// Spawns one probe loop per configured backend. Each loop sleeps the
/// probe interval, checks its backend, and updates the pool; the loops
/// run concurrently so one slow backend cannot delay the others.
pub fn spawn_probes(lb: Arc<Balancer>) {
    for backend in lb.pool.backends().to_vec() {
        let lb = Arc::clone(&lb);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROBE_INTERVAL).await;
                let healthy = check(&lb, &backend).await;
                info!(backend, healthy, "health probe");
                lb.pool.set_health(&backend, healthy);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BackendPool;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    fn balancer() -> Balancer {
        Balancer {
            pool: BackendPool::new(vec![]),
            client: reqwest::Client::new(),
            scheme: "http",
            trace: false,
        }
    }

    async fn spawn_backend(app: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn healthy_backend_passes_the_check() {
        let app = Router::new().route("/health", get(|| async { "OK" }));
        let addr = spawn_backend(app).await;

        assert!(check(&balancer(), &addr.to_string()).await);
    }

    #[tokio::test]
    async fn failing_backend_fails_the_check() {
        let app = Router::new().route(
            "/health",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "FAILURE") }),
        );
        let addr = spawn_backend(app).await;

        assert!(!check(&balancer(), &addr.to_string()).await);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_the_check() {
        assert!(!check(&balancer(), "127.0.0.1:9").await);
    }
}
