//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use presence_gateway::admin::{serve_admin, setup_admin_router};
use presence_gateway::config::{DirectoryUser, GatewayConfig};
use presence_gateway::services::{
    HubDispatcher, NotificationHub, PresenceRegistry, StaticUserDirectory,
};
use presence_gateway::{AppState, Collaborators, GatewayServer, Shutdown};

pub const SIGNING_KEY: &str = "integration-test-signing-key-0123456789";
pub const ADMIN_KEY: &str = "integration-admin-key";

/// User 42 is known from loopback only.
pub const KNOWN_USER: u64 = 42;

pub struct TestGateway {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub state: AppState,
    pub presence: Arc<PresenceRegistry>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.signing_key = SIGNING_KEY.into();
    config.directory.users.push(DirectoryUser {
        id: KNOWN_USER,
        display_name: "Grace Hopper".into(),
        known_addresses: vec!["127.0.0.1".into()],
    });
    config
}

/// Start a gateway plus admin API on ephemeral loopback ports.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let shutdown = Shutdown::new();
    let presence = Arc::new(PresenceRegistry::new());
    let hub = Arc::new(NotificationHub::new());
    let collaborators = Collaborators {
        directory: Arc::new(StaticUserDirectory::from_config(&config.directory)),
        presence: presence.clone(),
        dispatcher: Arc::new(HubDispatcher::new(hub.clone())),
        hub,
    };
    let state = AppState::build(&config, collaborators, &shutdown).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config, state.clone());
    tokio::spawn(server.run(listener, shutdown.clone()));

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let admin = setup_admin_router(state.clone(), ADMIN_KEY);
    tokio::spawn(serve_admin(admin_listener, admin, shutdown.clone()));

    TestGateway {
        addr,
        admin_addr,
        state,
        presence,
        shutdown,
    }
}

pub fn mint_token(user_id: u64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": user_id.to_string(), "exp": get_current_timestamp() + 600 }),
        &EncodingKey::from_secret(SIGNING_KEY.as_bytes()),
    )
    .unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
