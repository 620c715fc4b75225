//! Administrative HTTP surface over the queue and the orchestrator.
//!
//! | Route                              | Purpose                        |
//! |------------------------------------|--------------------------------|
//! | `POST /api/tasks`                  | enqueue a task                 |
//! | `GET /api/tasks?status=`           | list tasks                     |
//! | `GET /api/tasks/{id}`              | one task                       |
//! | `POST /api/tasks/{id}/retry`       | re-queue a failed task         |
//! | `GET /api/stats`                   | partition counts               |
//! | `GET /api/status[/{id}]`           | in-memory run status           |
//! | `GET /api/reviews/{n}/comments`    | pull request comments          |
//! | `POST /api/reviews/{n}/merge`      | merge a pull request           |
//! | `GET /health`                      | liveness                       |

pub mod api;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use api::{AppState, SharedState};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            dev_mode: false,
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn start_server(
    config: ServerConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, dev = config.dev_mode, "Admin API listening");
    println!("taskforge API running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}
