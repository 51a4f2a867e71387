//! Notification delivery over long-lived connections.
//!
//! # Data Flow
//! ```text
//! publisher (admin API, other services)
//!     → NotificationHub::publish(user_id)
//!     → broadcast channel per user
//!     → HubDispatcher (one per live connection)
//!     → JSON text frame on the channel
//! ```

use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::gateway::channel::{Channel, ChannelError};
use crate::gateway::descriptor::ConnectionDescriptor;
use crate::services::UserId;

/// Per-user buffer; slow connections skip what they missed.
const USER_CHANNEL_CAPACITY: usize = 64;

/// How a dispatcher run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The client closed the channel.
    ClientClosed,
    /// The cancellation token fired.
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("dispatcher failure: {0}")]
    Internal(String),
}

/// Runs a connection's message exchange for its whole active phase.
///
/// Implementations must return promptly once `cancel` fires.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn handle_connection(
        &self,
        channel: &mut dyn Channel,
        descriptor: &ConnectionDescriptor,
        cancel: CancellationToken,
    ) -> Result<Termination, DispatchError>;
}

/// A notification pushed to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }
}

/// Fan-out of notifications to every live connection of a user.
#[derive(Debug, Default)]
pub struct NotificationHub {
    users: DashMap<UserId, broadcast::Sender<Arc<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Arc<Notification>> {
        self.users
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(USER_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver to all live connections of `user_id`. Returns how many received it.
    pub fn publish(&self, user_id: UserId, notification: Notification) -> usize {
        match self.users.get(&user_id) {
            Some(tx) => tx.send(Arc::new(notification)).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the user's channel once nobody listens anymore.
    pub fn release(&self, user_id: UserId) {
        self.users.remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
    }

    pub fn connected_users(&self) -> usize {
        self.users.len()
    }
}

enum Event {
    Cancelled,
    Incoming(Option<Result<Message, ChannelError>>),
    Outgoing(Result<Arc<Notification>, RecvError>),
}

/// Dispatcher backed by a [`NotificationHub`].
///
/// Text frames reading `ping` are answered with `pong`; other inbound frames
/// are ignored.
#[derive(Debug, Clone)]
pub struct HubDispatcher {
    hub: Arc<NotificationHub>,
}

impl HubDispatcher {
    pub fn new(hub: Arc<NotificationHub>) -> Self {
        Self { hub }
    }

    async fn pump(
        &self,
        channel: &mut dyn Channel,
        descriptor: &ConnectionDescriptor,
        updates: &mut broadcast::Receiver<Arc<Notification>>,
        cancel: &CancellationToken,
    ) -> Result<Termination, DispatchError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => Event::Cancelled,
                incoming = channel.recv() => Event::Incoming(incoming),
                outgoing = updates.recv() => Event::Outgoing(outgoing),
            };

            match event {
                Event::Cancelled => return Ok(Termination::Cancelled),
                Event::Incoming(None) | Event::Incoming(Some(Ok(Message::Close(_)))) => {
                    return Ok(Termination::ClientClosed);
                }
                Event::Incoming(Some(Err(e))) => return Err(DispatchError::Channel(e)),
                Event::Incoming(Some(Ok(Message::Text(text)))) => {
                    if text.as_str().trim().eq_ignore_ascii_case("ping") {
                        channel.send(Message::Text("pong".into())).await?;
                    }
                }
                Event::Incoming(Some(Ok(_))) => {}
                Event::Outgoing(Ok(notification)) => {
                    let payload = serde_json::to_string(notification.as_ref())
                        .map_err(|e| DispatchError::Internal(e.to_string()))?;
                    channel.send(Message::Text(payload.into())).await?;
                }
                Event::Outgoing(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        connection_id = %descriptor.connection_id,
                        user_id = %descriptor.user_id,
                        skipped,
                        "Connection lagging, notifications dropped"
                    );
                }
                Event::Outgoing(Err(RecvError::Closed)) => {
                    return Err(DispatchError::Internal("notification stream closed".into()));
                }
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for HubDispatcher {
    async fn handle_connection(
        &self,
        channel: &mut dyn Channel,
        descriptor: &ConnectionDescriptor,
        cancel: CancellationToken,
    ) -> Result<Termination, DispatchError> {
        let mut updates = self.hub.subscribe(descriptor.user_id);
        let result = self.pump(channel, descriptor, &mut updates, &cancel).await;
        drop(updates);
        self.hub.release(descriptor.user_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::channel::testing::ScriptedChannel;
    use crate::gateway::descriptor::ConnectionDescriptor;

    fn descriptor(user: u64) -> ConnectionDescriptor {
        ConnectionDescriptor::for_test(UserId(user))
    }

    #[tokio::test]
    async fn publish_without_listeners_delivers_nothing() {
        let hub = NotificationHub::new();
        assert_eq!(hub.publish(UserId(1), Notification::new("info", "hi")), 0);
    }

    #[tokio::test]
    async fn release_keeps_channel_while_listeners_remain() {
        let hub = NotificationHub::new();
        let first = hub.subscribe(UserId(1));
        let second = hub.subscribe(UserId(1));
        drop(first);
        hub.release(UserId(1));
        assert_eq!(hub.connected_users(), 1);
        drop(second);
        hub.release(UserId(1));
        assert_eq!(hub.connected_users(), 0);
    }

    #[tokio::test]
    async fn answers_ping_and_ends_on_client_close() {
        let hub = Arc::new(NotificationHub::new());
        let dispatcher = HubDispatcher::new(hub.clone());
        let (mut channel, handle) = ScriptedChannel::new();
        handle.push(Message::Text("ping".into()));
        handle.push(Message::Close(None));

        let result = dispatcher
            .handle_connection(&mut channel, &descriptor(5), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, Termination::ClientClosed);
        assert_eq!(handle.sent_texts(), vec!["pong".to_string()]);
        assert_eq!(hub.connected_users(), 0);
    }

    #[tokio::test]
    async fn forwards_published_notifications() {
        let hub = Arc::new(NotificationHub::new());
        let dispatcher = HubDispatcher::new(hub.clone());
        let (mut channel, handle) = ScriptedChannel::new();
        let cancel = CancellationToken::new();

        let publisher = {
            let hub = hub.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while hub.publish(UserId(9), Notification::new("leave.approved", "Approved")) == 0 {
                    tokio::task::yield_now().await;
                }
                while handle.sent_texts().is_empty() {
                    tokio::task::yield_now().await;
                }
                cancel.cancel();
            })
        };

        let result = dispatcher
            .handle_connection(&mut channel, &descriptor(9), cancel)
            .await
            .unwrap();
        publisher.await.unwrap();

        assert_eq!(result, Termination::Cancelled);
        let sent: Notification = serde_json::from_str(&handle.sent_texts()[0]).unwrap();
        assert_eq!(sent, Notification::new("leave.approved", "Approved"));
    }

    #[tokio::test]
    async fn channel_faults_surface_as_errors() {
        let dispatcher = HubDispatcher::new(Arc::new(NotificationHub::new()));
        let (mut channel, handle) = ScriptedChannel::new();
        handle.push_error(ChannelError::Protocol("reset".into()));

        let err = dispatcher
            .handle_connection(&mut channel, &descriptor(2), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Channel(ChannelError::Protocol(_))));
    }
}
