//! Application HTTP server: data endpoint, health probe target, and
//! request report.
//!
//! ```text
//! DB_PATH                  storage directory        (default: "data/app-db")
//! APP_PORT                 listen port              (default: 8080)
//! CONF_RESPONSE_DELAY_SEC  artificial delay, 1-299  (default: unset)
//! CONF_HEALTH_FAILURE      "true" fails /health     (default: unset)
//! ```

use anyhow::{Context, Result};
use datastore::Store;
use server::api::{self, AppState};
use server::report::Report;
use server::env_or;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let db_path = env_or("DB_PATH", "data/app-db");
    let port: u16 = env_or("APP_PORT", "8080").parse().unwrap_or(8080);

    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create storage directory {}", db_path))?;
    let store = Arc::new(Store::open(&db_path)?);

    // A freshly deployed replica should serve something right away.
    store.put("boot-time", &chrono::Utc::now().to_rfc3339())?;

    let state = Arc::new(AppState {
        store,
        report: Report::default(),
    });
    let app = api::app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, db_path, "application server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
