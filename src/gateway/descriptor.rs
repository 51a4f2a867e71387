//! Per-connection descriptor.

use std::time::SystemTime;

use crate::net::ConnectionId;
use crate::security::identity::ClientIdentity;
use crate::services::UserId;

/// Created when an upgrade is accepted; owned by the connection's lifecycle
/// manager and dropped when the connection closes.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub identity: ClientIdentity,
    pub accepted_at: SystemTime,
    pub user_agent: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(
        user_id: UserId,
        username: String,
        identity: ClientIdentity,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            username,
            identity,
            accepted_at: SystemTime::now(),
            user_agent,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(user_id: UserId) -> Self {
        Self::new(
            user_id,
            format!("user-{}", user_id),
            ClientIdentity::from_ip("192.0.2.1".parse().unwrap()),
            Some("test-agent".into()),
        )
    }
}
