//! Connection upgrade handling.
//!
//! # Data Flow
//! ```text
//! GET /ws (past the threat guard)
//!     → capacity slot (503 when full)
//!     → gatekeeper (401 / 403)
//!     → WebSocket handshake
//!     → ConnectionManager::run on the upgraded socket
//! ```
//!
//! Admission runs before the handshake is validated so rejected clients
//! never get a socket.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Extension, State,
    },
    http::{header, HeaderMap, Uri},
    response::{IntoResponse, Response},
};

use crate::gateway::channel::WsChannel;
use crate::gateway::descriptor::ConnectionDescriptor;
use crate::gateway::rejection::Rejection;
use crate::http::server::AppState;
use crate::net::ConnectionState;
use crate::observability::metrics;
use crate::security::identity::ClientIdentity;

pub async fn upgrade_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<ClientIdentity>,
    headers: HeaderMap,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(slot) = state.tracker.try_track() else {
        tracing::warn!(
            identity = %identity,
            active = state.tracker.active_count(),
            "Connection capacity reached"
        );
        return reject(Rejection::AtCapacity);
    };

    let admitted = match state.gatekeeper.admit(&headers, uri.query(), &identity).await {
        Ok(admitted) => admitted,
        Err(rejection) => return reject(rejection),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(identity = %identity, error = %e, "Not a valid upgrade request");
            return e.into_response();
        }
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let descriptor = ConnectionDescriptor::new(
        admitted.user_id,
        admitted.display_name,
        identity,
        user_agent,
    );
    tracing::debug!(
        connection_id = %descriptor.connection_id,
        user_id = %descriptor.user_id,
        state = ?ConnectionState::Accepted,
        "Upgrade accepted"
    );

    let manager = state.connections.clone();
    let connection_id = descriptor.connection_id;
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket handshake failed");
    })
    .on_upgrade(move |socket| async move {
        let _slot = slot;
        manager.run(WsChannel::new(socket), descriptor).await;
    })
}

fn reject(rejection: Rejection) -> Response {
    metrics::record_rejection(rejection.reason());
    rejection.into_response()
}
