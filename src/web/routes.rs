//! Route definitions for the control surface

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::AppState;

use super::api;

/// Create the main router with all routes
pub fn create_router(app_state: Arc<AppState>, config: &HttpConfig) -> Router {
    let cors = if config.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        // Status + settings
        .route("/api/status", get(api::get_status))
        .route("/api/settings", get(api::get_settings))
        .route("/api/settings", post(api::update_settings))
        .route("/api/assets", get(api::get_assets))
        // Scene lifecycle
        .route("/api/scene/reload", post(api::reload_scene))
        // Chat host events
        .route("/api/chat/changed", post(api::chat_changed))
        .route("/api/chat/group", post(api::group_updated))
        .route("/api/chat/message", post(api::chat_message))
        // Imperative API
        .route("/api/expression", post(api::set_expression))
        .route("/api/motion", post(api::set_motion))
        .route("/api/model", post(api::set_model))
        .route("/api/light", post(api::set_light))
        .route("/api/lipsync", post(api::lip_sync))
        .route("/api/command", post(api::run_command))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
