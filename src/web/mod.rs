//! HTTP control surface
//!
//! JSON API for the chat host and the settings UI.

pub mod api;
pub mod routes;

use axum::Router;
use std::sync::Arc;

use crate::config::HttpConfig;
use crate::error::{Result, WebError};
use crate::AppState;

/// Web server for the control API
pub struct WebServer {
    app_state: Arc<AppState>,
    config: HttpConfig,
}

impl WebServer {
    /// Create a new web server
    pub fn new(app_state: Arc<AppState>, config: &HttpConfig) -> Self {
        Self {
            app_state,
            config: config.clone(),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        routes::create_router(Arc::clone(&self.app_state), &self.config)
    }

    /// Bind and serve until the app shuts down
    pub async fn serve(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| WebError::Bind(format!("{}: {}", addr, e)))?;

        tracing::info!("Control API listening on http://{}", addr);

        let mut shutdown = self.app_state.subscribe_shutdown();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|e| WebError::Startup(e.to_string()))?;

        Ok(())
    }
}
