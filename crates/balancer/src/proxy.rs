//! Request forwarding to the selected backend.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::pool::BackendPool;

/// Name of the tracing header stamped onto forwarded requests and their
/// responses when tracing is enabled.
pub const TRACE_HEADER: &str = "lb-from";

/// Shared state of the balancer: the pool, the upstream client, and the
/// forwarding knobs.
pub struct Balancer {
    pub pool: BackendPool,
    pub client: reqwest::Client,
    /// `"http"` or `"https"`, applied to every upstream URL.
    pub scheme: &'static str,
    /// When set, responses carry a `lb-from` header naming the backend
    /// that served them, and forwarded requests carry the same header so
    /// backends can attribute traffic.
    pub trace: bool,
}

/// Catch-all handler: selects a backend by the client's address and
/// forwards the request verbatim. 503 when nothing is healthy or the
/// forward fails.
pub async fn handle(
    State(lb): State<Arc<Balancer>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let client_id = addr.to_string();

    let Some(backend) = lb.pool.select_backend(&client_id) else {
        error!(client = %client_id, "no healthy backend available");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    match forward(&lb, &backend, req).await {
        Ok(response) => response,
        Err(e) => {
            error!(backend, error = %e, "failed to forward request");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Replays `req` against `backend` and converts the upstream reply back
/// into a response, copying status, headers, and body.
pub async fn forward(lb: &Balancer, backend: &str, req: Request) -> anyhow::Result<Response> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}://{}{}", lb.scheme, backend, path_and_query);

    let body = axum::body::to_bytes(body, usize::MAX).await?;

    let mut headers = parts.headers;
    // The upstream host comes from the URL, not the client's request.
    headers.remove(header::HOST);
    if lb.trace {
        headers.insert(TRACE_HEADER, HeaderValue::from_str(backend)?);
    }

    let upstream = lb
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    // The body is re-framed below, so hop-by-hop framing headers from the
    // upstream no longer apply.
    response_headers.remove(header::TRANSFER_ENCODING);
    response_headers.remove(header::CONNECTION);
    if lb.trace {
        response_headers.insert(TRACE_HEADER, HeaderValue::from_str(backend)?);
    }

    let bytes = upstream.bytes().await?;
    info!(status = %status, url = %url, "forwarded");

    let mut response = Response::builder().status(status).body(Body::from(bytes))?;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_backend(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn balancer(trace: bool) -> Balancer {
        Balancer {
            pool: BackendPool::new(vec![]),
            client: reqwest::Client::new(),
            scheme: "http",
            trace,
        }
    }

    #[tokio::test]
    async fn forward_copies_status_and_body() {
        let app = Router::new().route("/", get(|| async { "test response" }));
        let addr = spawn_backend(app).await;

        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let resp = forward(&balancer(false), &addr.to_string(), req)
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(TRACE_HEADER).is_none());

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"test response");
    }

    #[tokio::test]
    async fn forward_adds_trace_header_when_enabled() {
        let app = Router::new().route("/", get(|| async { "ok" }));
        let addr = spawn_backend(app).await;

        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let resp = forward(&balancer(true), &addr.to_string(), req)
            .await
            .unwrap();

        assert_eq!(
            resp.headers().get(TRACE_HEADER).unwrap().to_str().unwrap(),
            addr.to_string()
        );
    }

    #[tokio::test]
    async fn forward_preserves_query_string() {
        let app = Router::new().route(
            "/echo",
            get(|axum::extract::RawQuery(q): axum::extract::RawQuery| async move {
                q.unwrap_or_default()
            }),
        );
        let addr = spawn_backend(app).await;

        let req = HttpRequest::builder()
            .uri("/echo?key=value")
            .body(Body::empty())
            .unwrap();
        let resp = forward(&balancer(false), &addr.to_string(), req)
            .await
            .unwrap();

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"key=value");
    }

    #[tokio::test]
    async fn forward_to_unreachable_backend_errors() {
        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        // Port 9 (discard) is almost certainly not listening.
        let result = forward(&balancer(false), "127.0.0.1:9", req).await;
        assert!(result.is_err());
    }
}
