//! User directory: display names and previously seen client addresses.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::IpAddr;

use crate::config::DirectoryConfig;
use crate::security::identity::ClientIdentity;
use crate::services::{CollaboratorError, UserId};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Has `user_id` previously connected from `identity`?
    async fn is_known_address(
        &self,
        user_id: UserId,
        identity: &ClientIdentity,
    ) -> Result<bool, CollaboratorError>;

    async fn display_name(&self, user_id: UserId) -> Result<Option<String>, CollaboratorError>;
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    display_name: String,
    known_addresses: HashSet<String>,
}

/// Directory seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: DashMap<UserId, DirectoryEntry>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let directory = Self::new();
        for user in &config.users {
            directory.insert_user(UserId(user.id), &user.display_name, &user.known_addresses);
        }
        tracing::info!(users = directory.users.len(), "User directory loaded");
        directory
    }

    /// Add or replace a user. Addresses are normalized like request identities.
    pub fn insert_user(&self, user_id: UserId, display_name: &str, addresses: &[String]) {
        let known_addresses = addresses.iter().map(|a| normalize_address(a)).collect();
        self.users.insert(
            user_id,
            DirectoryEntry {
                display_name: display_name.to_string(),
                known_addresses,
            },
        );
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => ClientIdentity::from_ip(ip).to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn is_known_address(
        &self,
        user_id: UserId,
        identity: &ClientIdentity,
    ) -> Result<bool, CollaboratorError> {
        Ok(self
            .users
            .get(&user_id)
            .is_some_and(|entry| entry.known_addresses.contains(identity.as_str())))
    }

    async fn display_name(&self, user_id: UserId) -> Result<Option<String>, CollaboratorError> {
        Ok(self.users.get(&user_id).map(|entry| entry.display_name.clone()))
    }
}
