//! Threat protection middleware applied to every public route.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::gateway::rejection::Rejection;
use crate::observability::metrics;
use crate::security::identity::resolve_identity;
use crate::security::reputation::{ReputationTracker, Verdict};
use crate::security::threat::RequestView;

/// Resolve the client identity, score the request and apply the tier.
///
/// Blocked clients get 403; suspicious ones are delayed before continuing.
/// The resolved [`ClientIdentity`](crate::security::ClientIdentity) is
/// inserted into the request extensions for downstream handlers.
pub async fn threat_guard(
    State(tracker): State<Arc<ReputationTracker>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = resolve_identity(request.headers(), peer);

    match tracker.evaluate(&identity, &RequestView::of(&request)) {
        Verdict::Reject(reason) => {
            tracing::warn!(
                identity = %identity,
                reason = ?reason,
                method = %request.method(),
                path = %request.uri().path(),
                "Request rejected, client blocked"
            );
            metrics::record_rejection(Rejection::Blocked.reason());
            return Rejection::Blocked.into_response();
        }
        Verdict::Throttle { score, delay } => {
            tracing::debug!(
                identity = %identity,
                score,
                delay_ms = delay.as_millis() as u64,
                "Throttling suspicious client"
            );
            metrics::record_throttled();
            tokio::time::sleep(delay).await;
        }
        Verdict::Allow { .. } => {}
    }

    request.extensions_mut().insert(identity);
    next.run(request).await
}
