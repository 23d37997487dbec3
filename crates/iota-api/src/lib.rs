//! iota-api - transport listeners for the KNoT thing gateway
//!
//! Three routers share one [`AppState`]:
//!
//! - [`create_router`]: WebSocket sessions (`/ws`) and `/health`
//! - [`create_liveness_router`]: the mini HTTP server (`POST /`)
//! - [`create_northbound_router`]: broker command notifications (`POST /v2/op/update`)
//!
//! # Usage
//!
//! ```ignore
//! use iota_api::{create_router, AppState};
//!
//! let state = AppState::new(gateway);
//! let app = create_router(state.clone());
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Session router. Must be served with connect info (`SocketAddr`).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ws", get(handlers::session::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Mini HTTP liveness server
pub fn create_liveness_router() -> Router {
    Router::new()
        .route("/", post(handlers::health::liveness))
        .layer(TraceLayer::new_for_http())
}

/// Northbound listener for broker command notifications
pub fn create_northbound_router(state: AppState) -> Router {
    Router::new()
        .route("/v2/op/update", post(handlers::northbound::update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
