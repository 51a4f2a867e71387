//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (threat guard, timeout, request ID, tracing)
//! - Build the gateway's shared state from configuration
//! - Serve over plain TCP or TLS until shutdown

use axum::{
    http::StatusCode,
    middleware,
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::gateway::{AccessPolicy, ConnectionManager, Gatekeeper, PolicyError, TokenVerifier};
use crate::http::middleware::threat_guard;
use crate::http::websocket::upgrade_handler;
use crate::lifecycle::Shutdown;
use crate::net::ConnectionTracker;
use crate::security::ReputationTracker;
use crate::services::{
    HubDispatcher, NotificationDispatcher, NotificationHub, PresenceRegistry, PresenceService,
    StaticUserDirectory, UserDirectory,
};

/// How long in-flight HTTP connections get to finish after shutdown.
const TLS_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("access policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("invalid threat pattern: {0}")]
    ThreatPattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// External collaborators the gateway is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn UserDirectory>,
    pub presence: Arc<dyn PresenceService>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub hub: Arc<NotificationHub>,
}

impl Collaborators {
    /// In-process implementations seeded from configuration.
    pub fn in_memory(config: &GatewayConfig) -> Self {
        let hub = Arc::new(NotificationHub::new());
        Self {
            directory: Arc::new(StaticUserDirectory::from_config(&config.directory)),
            presence: Arc::new(PresenceRegistry::new()),
            dispatcher: Arc::new(HubDispatcher::new(hub.clone())),
            hub,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub reputation: Arc<ReputationTracker>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub connections: Arc<ConnectionManager>,
    pub tracker: ConnectionTracker,
    pub hub: Arc<NotificationHub>,
    pub started_at: Instant,
}

impl AppState {
    pub fn build(
        config: &GatewayConfig,
        collaborators: Collaborators,
        shutdown: &Shutdown,
    ) -> Result<Self, ServerError> {
        let policy = AccessPolicy::from_config(&config.auth)?;
        let reputation = ReputationTracker::from_config(&config.threat, &config.reputation)?;
        let gatekeeper = Gatekeeper::new(
            TokenVerifier::new(&config.auth),
            policy,
            collaborators.directory,
        );
        let connections = ConnectionManager::new(
            collaborators.dispatcher,
            collaborators.presence,
            &config.connections,
            shutdown.subscribe(),
        );

        Ok(Self {
            reputation: Arc::new(reputation),
            gatekeeper: Arc::new(gatekeeper),
            connections: Arc::new(connections),
            tracker: ConnectionTracker::new(config.connections.max_active),
            hub: collaborators.hub,
            started_at: Instant::now(),
        })
    }
}

/// Public gateway server.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route(&config.connections.path, get(upgrade_handler))
            .route("/health", get(health))
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(
                state.reputation.clone(),
                threat_guard,
            ))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            path = %self.config.connections.path,
            policy = self.state.gatekeeper.policy().name(),
            "Gateway listening"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.triggered().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS termination.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        tracing::info!(
            address = %addr,
            path = %self.config.connections.path,
            policy = self.state.gatekeeper.policy().name(),
            "Gateway listening (TLS)"
        );

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.triggered().await;
            signal_handle.graceful_shutdown(Some(TLS_GRACE));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectoryUser, ReputationConfig};
    use crate::gateway::rejection::BODY_BLOCKED;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, Request};
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use serde_json::json;
    use tower::ServiceExt;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.signing_key = KEY.into();
        config.directory.users.push(DirectoryUser {
            id: 42,
            display_name: "Grace".into(),
            known_addresses: vec!["203.0.113.4".into()],
        });
        config
    }

    fn router(config: &GatewayConfig) -> (Router, AppState) {
        let state = AppState::build(config, Collaborators::in_memory(config), &Shutdown::new()).unwrap();
        (GatewayServer::build_router(config, state.clone()), state)
    }

    fn request(uri: &str, peer: &str) -> Request<Body> {
        let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn token(user: u64) -> String {
        encode(
            &Header::default(),
            &json!({ "sub": user.to_string(), "exp": get_current_timestamp() + 600 }),
            &EncodingKey::from_secret(KEY.as_bytes()),
        )
        .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok_and_gets_request_id() {
        let (router, state) = router(&config());
        let response = router.oneshot(request("/health", "192.0.2.1:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(state.reputation.tracked_count(), 1);
    }

    #[tokio::test]
    async fn upgrade_without_credentials_is_unauthorized() {
        let (router, _) = router(&config());
        let response = router.oneshot(request("/ws", "203.0.113.4:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Authentication required.");
    }

    #[tokio::test]
    async fn upgrade_with_garbage_token_is_unauthorized() {
        let (router, _) = router(&config());
        let mut request = request("/ws", "203.0.113.4:5000");
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer not-a-jwt".parse().unwrap());
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Authentication failed.");
    }

    #[tokio::test]
    async fn upgrade_from_unknown_location_is_forbidden() {
        let (router, _) = router(&config());
        let mut request = request("/ws", "198.51.100.9:5000");
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token(42)).parse().unwrap(),
        );
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, "Connection from unknown location detected.");
    }

    #[tokio::test]
    async fn admitted_plain_request_fails_handshake_validation() {
        let (router, state) = router(&config());
        let mut request = request("/ws", "203.0.113.4:5000");
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token(42)).parse().unwrap(),
        );
        let response = router.oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let mut config = config();
        config.connections.max_active = 1;
        let (router, state) = router(&config);
        let _held = state.tracker.try_track().unwrap();

        let response = router.oneshot(request("/ws", "203.0.113.4:5000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "Connection capacity reached.");
    }

    #[tokio::test]
    async fn repeated_attacks_get_blocked() {
        let mut config = config();
        config.reputation = ReputationConfig {
            throttle_delay_ms: 0,
            ..ReputationConfig::default()
        };
        let (router, state) = router(&config);

        // Traversal scores 4 per request: 4, 8, then 12 crosses the block threshold.
        for expected in [StatusCode::NOT_FOUND, StatusCode::NOT_FOUND, StatusCode::FORBIDDEN] {
            let response = router
                .clone()
                .oneshot(request("/static/..%2f..%2fetc/passwd", "192.0.2.50:4000"))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }

        let response = router.oneshot(request("/health", "192.0.2.50:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, BODY_BLOCKED);
        assert!(state.reputation.is_blocked("192.0.2.50"));
    }

    #[tokio::test(start_paused = true)]
    async fn suspicious_clients_are_delayed() {
        let (router, _) = router(&config());
        let started = tokio::time::Instant::now();

        // Scanner user agent scores 5, which is the suspicious threshold.
        let mut request = request("/health", "192.0.2.60:4000");
        request
            .headers_mut()
            .insert(header::USER_AGENT, "sqlmap/1.7".parse().unwrap());
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn forwarded_for_selects_identity() {
        let (router, state) = router(&config());
        let mut request = request("/health", "10.0.0.1:4000");
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.200, 10.0.0.1".parse().unwrap());
        router.oneshot(request).await.unwrap();
        assert!(state.reputation.record("203.0.113.200").is_some());
        assert!(state.reputation.record("10.0.0.1").is_none());
    }
}
