//! Web server module.

mod handlers;

use crate::config::NotifierConfig;
use crate::db::Store;
use crate::menu::MenuHandle;
use crate::monitor::MonitorHandle;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: NotifierConfig,
    pub monitor: MonitorHandle,
    pub menu: MenuHandle,
    pub store: Arc<Store>,
}

/// HTTP control surface for the notifier.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: NotifierConfig, monitor: MonitorHandle, menu: MenuHandle, store: Arc<Store>) -> Self {
        Self {
            state: AppState {
                config,
                monitor,
                menu,
                store,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

pub(crate) fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        // Monitored targets
        .route("/api/targets", get(handlers::handle_get_targets))
        .route("/api/targets", delete(handlers::handle_remove_target))
        .route("/api/targets/service", post(handlers::handle_add_service))
        .route("/api/targets/instance", post(handlers::handle_add_instance))
        .route("/api/targets/preferences", put(handlers::handle_set_preferences))
        .route("/api/targets/action", post(handlers::handle_action))
        .route("/api/refresh", post(handlers::handle_refresh))
        // Connection definitions
        .route("/api/connections", get(handlers::handle_get_connections))
        .route("/api/connections", post(handlers::handle_create_connection))
        .route("/api/connections/{id}", put(handlers::handle_update_connection))
        .route("/api/connections/{id}", delete(handlers::handle_delete_connection))
        // Tray menu
        .route("/api/menu", get(handlers::handle_get_menu))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
