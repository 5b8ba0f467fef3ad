//! HTTP server exposing the fleet commands
//!
//! Every coordinator operation is reachable through the `/api/invoke`
//! command proxy, authenticated with a bearer token.

mod auth;
mod proxy;
pub mod routes;
pub mod state;

pub use auth::{generate_auth_token, AuthLayer};
pub use proxy::{invoke_handler, InvokeError, InvokeRequest, InvokeResponse};
pub use state::ServerAppState;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue,
    },
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Version information for the server
#[derive(serde::Serialize)]
struct VersionInfo {
    name: String,
    version: String,
}

/// Build the application router
pub fn router(state: ServerAppState, cors_origins: Option<Vec<String>>) -> Router {
    // Explicit headers instead of Any: wildcard headers are not allowed
    // together with Authorization
    let cors = match &cors_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed_origins: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods(Any)
                .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]),
    };

    // Layer order: cors (outer) -> auth -> handler, so preflights never hit auth
    Router::new()
        .route("/api/invoke", post(proxy::invoke_handler))
        .route("/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .layer(AuthLayer::new(state.auth_token.clone()))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until shutdown is requested
pub async fn run_server(
    port: u16,
    bind: &str,
    state: ServerAppState,
    cors_origins: Option<Vec<String>>,
) -> Result<(), String> {
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let cors_display = match &cors_origins {
        Some(origins) if !origins.is_empty() => origins.join(", "),
        _ => "*".to_string(),
    };
    let default_repo = state
        .default_repo
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none, pass repoPath)".to_string());

    println!();
    println!("Fleet coordinator");
    println!("  Server URL:   http://{}:{}", bind, port);
    println!("  Auth Token:   {}", state.auth_token);
    println!("  Repository:   {}", default_repo);
    println!("  CORS Origins: {}", cors_display);
    println!();
    println!("  POST /api/invoke   - Command proxy");
    println!("  GET  /api/version  - Server version info");
    println!("  GET  /health       - Health check");
    println!();

    let shutdown_state = state.shutdown_state.clone();
    let app = router(state, cors_origins);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    log::info!("Server listening on http://{}", addr);

    // Shutdown signal that waits for the shutdown state flag
    let shutdown_signal = async move {
        loop {
            if shutdown_state.is_shutdown_requested() {
                log::info!("Shutdown signal received, stopping server...");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Version endpoint
async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
