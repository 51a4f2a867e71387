//! User presence.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::services::{CollaboratorError, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Presence backend. Calls are best-effort from the gateway's point of view.
#[async_trait]
pub trait PresenceService: Send + Sync {
    async fn set_status(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        message: Option<&str>,
    ) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub message: Option<String>,
    pub updated_at: SystemTime,
}

/// In-process presence store.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, user_id: UserId) -> Option<PresenceStatus> {
        self.entries.get(&user_id).map(|e| e.status)
    }

    pub fn entry(&self, user_id: UserId) -> Option<PresenceEntry> {
        self.entries.get(&user_id).map(|e| e.value().clone())
    }

    pub fn online_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == PresenceStatus::Online)
            .count()
    }
}

#[async_trait]
impl PresenceService for PresenceRegistry {
    async fn set_status(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        message: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        self.entries.insert(
            user_id,
            PresenceEntry {
                status,
                message: message.map(str::to_string),
                updated_at: SystemTime::now(),
            },
        );
        tracing::debug!(user_id = %user_id, status = %status, "Presence updated");
        Ok(())
    }
}
