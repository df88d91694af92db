//! HTTP API and WebSocket upgrade routing using axum.
//!
//! Routes:
//! - GET /servers - Cached public server listing
//! - GET /resolve/{code} - Resolve an invite code
//! - GET /health - Health check
//! - GET /connect/{host}/{port} - WebSocket upgrade to a relay session
//! - OPTIONS anywhere - 204 with CORS headers
//! - Anything else - 404

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use coordinator::{CoordinatorClient, ServerListCache};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ApiError;
use crate::relay;

/// Shared application state.
pub struct AppState {
    pub cache: Arc<ServerListCache>,
    pub coordinator: Arc<CoordinatorClient>,
    pub config: Arc<Config>,
    /// Flips to `true` when the gateway starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

/// Create the gateway router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/servers", get(servers_handler))
        .route("/resolve/{code}", get(resolve_handler))
        .route("/health", get(health_handler))
        .route("/connect/{host}/{port}", get(connect_handler))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(preflight_middleware))
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Answer any plain OPTIONS request with 204; the CORS layer outside this
/// one still decorates the response.
async fn preflight_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(request).await
}

/// Health check handler.
/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Cached server listing.
/// GET /servers
async fn servers_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    match state.cache.get().await {
        Ok(servers) => Ok(Json(servers)),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// Resolve an invite code into a direct address or relay ticket.
/// GET /resolve/{code}
async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if code.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing invite code".to_owned()));
    }
    match state.coordinator.resolve_invite(&code).await {
        Ok(resolution) => {
            info!("resolved invite {code:?}");
            Ok(Json(resolution))
        }
        Err(e) => {
            debug!("invite {code:?} failed to resolve: {e}");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

/// WebSocket upgrade to a relay session.
/// GET /connect/{host}/{port}
///
/// Admission runs here; a rejected destination completes the upgrade and
/// closes 1008 without ever dialing out.
async fn connect_handler(
    State(state): State<Arc<AppState>>,
    Path((host, port)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    let verdict = match port.parse::<u16>() {
        Ok(port) => state.config.check_target(&host, port).map(|()| port),
        Err(_) => Err("Port not allowed"),
    };

    match verdict {
        Ok(port) => {
            debug!("upgrading relay to {host}:{port}");
            ws.on_upgrade(move |socket| relay::run(socket, host, port, state))
        }
        Err(reason) => {
            info!("refusing relay to {host}:{port}: {reason}");
            ws.on_upgrade(move |socket| relay::reject(socket, reason))
        }
    }
}

/// All unrouted paths.
async fn fallback_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
