//! Storage HTTP server: raw key access over one datastore.
//!
//! ```text
//! DB_PATH   storage directory   (default: "data/db")
//! DB_PORT   listen port         (default: 8083)
//! ```

use anyhow::{Context, Result};
use datastore::Store;
use server::{api, env_or};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let db_path = env_or("DB_PATH", "data/db");
    let port: u16 = env_or("DB_PORT", "8083").parse().unwrap_or(8083);

    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create storage directory {}", db_path))?;
    let store = Arc::new(Store::open(&db_path)?);

    let app = api::storage_router(store);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, db_path, "storage server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
