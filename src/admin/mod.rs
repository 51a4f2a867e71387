//! Administration API, served on its own listener.
//!
//! Every route requires `Authorization: Bearer <admin api key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;

use self::auth::{admin_auth_middleware, AdminKey};
use self::handlers::*;
use crate::http::server::AppState;
use crate::lifecycle::Shutdown;

pub fn setup_admin_router(state: AppState, api_key: &str) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/clients", get(get_clients))
        .route("/admin/blocked", get(get_blocked))
        .route("/admin/blocked/{identity}", delete(unblock_identity))
        .route("/admin/notify/{user_id}", post(notify_user))
        .layer(middleware::from_fn_with_state(AdminKey::new(api_key), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin router until shutdown.
pub async fn serve_admin(listener: TcpListener, router: Router, shutdown: Shutdown) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
}
