//! HTTP API endpoints and error mapping.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use datastore::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::report::Report;

/// Injects an artificial delay (seconds, 1-299) into the data handler.
pub const CONF_RESPONSE_DELAY_SEC: &str = "CONF_RESPONSE_DELAY_SEC";
/// `"true"` makes `/health` answer 500 FAILURE; used to exercise the
/// balancer's failover in testing.
pub const CONF_HEALTH_FAILURE: &str = "CONF_HEALTH_FAILURE";
/// Request header naming the balancer backend, fed into the report.
pub const TRACE_HEADER: &str = "lb-from";

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct PutValueRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct SomeDataParams {
    key: Option<String>,
}

/// Engine errors mapped onto HTTP statuses: unknown key is 404,
/// everything else (I/O, corruption, closed engine) is a 500.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            StoreError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Runs a blocking engine call off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError),
        Err(e) => Err(ApiError(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        )))),
    }
}

// ============================================================================
// Storage API (db-server)
// ============================================================================

pub type StorageState = Arc<Store>;

/// Raw key access: `GET /db/{key}` and `POST /db/{key}`.
pub fn storage_router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/db/:key", get(get_key).post(put_key))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn get_key(
    State(store): State<StorageState>,
    Path(key): Path<String>,
) -> Result<Json<KeyValueResponse>, ApiError> {
    let lookup_key = key.clone();
    let value = run_blocking(move || store.get(&lookup_key)).await?;
    Ok(Json(KeyValueResponse { key, value }))
}

async fn put_key(
    State(store): State<StorageState>,
    Path(key): Path<String>,
    Json(req): Json<PutValueRequest>,
) -> Result<StatusCode, ApiError> {
    run_blocking(move || store.put(&key, &req.value)).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Application API (app-server)
// ============================================================================

pub struct AppState {
    pub store: Arc<Store>,
    pub report: Report,
}

/// The application surface: data endpoint, health probe target, and the
/// request report.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/some-data", get(some_data))
        .route("/report", get(report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Response {
    if std::env::var(CONF_HEALTH_FAILURE).as_deref() == Ok("true") {
        (StatusCode::INTERNAL_SERVER_ERROR, "FAILURE").into_response()
    } else {
        (StatusCode::OK, "OK").into_response()
    }
}

async fn some_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SomeDataParams>,
) -> Response {
    if let Some(delay) = response_delay() {
        tokio::time::sleep(delay).await;
    }

    state.report.process(&headers);

    let Some(key) = params.key.filter(|k| !k.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "key parameter is required").into_response();
    };

    let store = Arc::clone(&state.store);
    let lookup_key = key.clone();
    match run_blocking(move || store.get(&lookup_key)).await {
        Ok(value) => Json(KeyValueResponse { key, value }).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "data not found").into_response(),
    }
}

async fn report(State(state): State<Arc<AppState>>) -> Response {
    Json(state.report.snapshot()).into_response()
}

/// The configured artificial delay, if the variable parses as an integer
/// in 1..300.
fn response_delay() -> Option<Duration> {
    let raw = std::env::var(CONF_RESPONSE_DELAY_SEC).ok()?;
    let secs: u64 = raw.parse().ok()?;
    (secs > 0 && secs < 300).then(|| Duration::from_secs(secs))
}
