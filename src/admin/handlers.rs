use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;
use crate::security::reputation::ReputationSnapshot;
use crate::services::{Notification, UserId};

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub connected_users: usize,
    pub tracked_identities: usize,
    pub blocked_identities: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockedList {
    pub identities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyRequest {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

fn default_kind() -> String {
    "notification".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub user_id: UserId,
    pub delivered: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(GatewayStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_connections: state.tracker.active_count(),
        connected_users: state.hub.connected_users(),
        tracked_identities: state.reputation.tracked_count(),
        blocked_identities: state.reputation.blocked_count(),
    })
}

pub async fn get_clients(State(state): State<AppState>) -> Json<Vec<ReputationSnapshot>> {
    Json(state.reputation.snapshot())
}

pub async fn get_blocked(State(state): State<AppState>) -> Json<BlockedList> {
    Json(BlockedList {
        identities: state.reputation.blocked_identities(),
    })
}

pub async fn unblock_identity(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Response {
    if state.reputation.unblock(&identity) {
        Json(serde_json::json!({ "identity": identity, "unblocked": true })).into_response()
    } else {
        (StatusCode::NOT_FOUND, "Identity is not blocked.").into_response()
    }
}

pub async fn notify_user(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    Json(request): Json<NotifyRequest>,
) -> Json<NotifyResponse> {
    let user_id = UserId(user_id);
    let notification = Notification {
        kind: request.kind,
        message: request.message,
        data: request.data,
    };
    let delivered = state.hub.publish(user_id, notification);
    tracing::info!(user_id = %user_id, delivered, "Notification published");
    Json(NotifyResponse { user_id, delivered })
}
