//! Connection lifecycle: accepted → active → closing → closed.
//!
//! # Responsibilities
//! - Bound the active phase by the configured maximum lifetime
//! - Hand the channel to the notification dispatcher for that phase
//! - Run teardown exactly once on every exit path, including when the
//!   owning future is dropped
//!
//! # Teardown
//! A fixed list of independent best-effort steps. A failing step is logged
//! and the next one still runs.
//! ```text
//! 1. CloseChannel  (normal closure, only if the channel is still open)
//! 2. MarkOffline   (presence collaborator)
//! ```

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::gateway::channel::{Channel, ChannelError};
use crate::gateway::descriptor::ConnectionDescriptor;
use crate::net::{ConnectionId, ConnectionState};
use crate::observability::metrics;
use crate::services::{
    CollaboratorError, DispatchError, NotificationDispatcher, PresenceService, PresenceStatus,
    Termination, UserId,
};

/// WebSocket normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// How long a cancelled dispatcher gets to unwind before it is dropped.
const UNWIND_GRACE: Duration = Duration::from_secs(5);

/// Why a connection's active phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Client closed the channel.
    Closed,
    /// Maximum lifetime elapsed.
    TimedOut,
    /// Gateway shutting down.
    Shutdown,
    /// Protocol-level fault on the channel.
    ChannelFault,
    /// Dispatcher error or panic.
    Failed,
}

impl ConnectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionOutcome::Closed => "closed",
            ConnectionOutcome::TimedOut => "timed_out",
            ConnectionOutcome::Shutdown => "shutdown",
            ConnectionOutcome::ChannelFault => "channel_fault",
            ConnectionOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownStep {
    CloseChannel,
    MarkOffline,
}

const TEARDOWN_STEPS: [TeardownStep; 2] = [TeardownStep::CloseChannel, TeardownStep::MarkOffline];

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("close failed: {0}")]
    Close(#[from] ChannelError),

    #[error("presence update failed: {0}")]
    Presence(#[from] CollaboratorError),
}

/// Everything teardown needs, owned so it can also run on a spawned task.
struct Teardown {
    channel: Box<dyn Channel>,
    connection_id: ConnectionId,
    user_id: UserId,
    presence: Arc<dyn PresenceService>,
    close_reason: String,
}

/// Placeholder left behind when teardown moves to a spawned task.
struct Detached;

#[async_trait]
impl Channel for Detached {
    async fn send(&mut self, _message: Message) -> Result<(), ChannelError> {
        Err(ChannelError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Message, ChannelError>> {
        None
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }
}

impl Teardown {
    /// Move the channel into an owned copy, leaving [`Detached`] behind.
    fn detach(&mut self) -> Teardown {
        Teardown {
            channel: std::mem::replace(&mut self.channel, Box::new(Detached)),
            connection_id: self.connection_id,
            user_id: self.user_id,
            presence: Arc::clone(&self.presence),
            close_reason: self.close_reason.clone(),
        }
    }

    async fn run(&mut self) {
        for step in TEARDOWN_STEPS {
            if let Err(e) = self.step(step).await {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    step = ?step,
                    error = %e,
                    "Teardown step failed"
                );
            }
        }
        tracing::debug!(
            connection_id = %self.connection_id,
            state = ?ConnectionState::Closed,
            "Connection state changed"
        );
    }

    async fn step(&mut self, step: TeardownStep) -> Result<(), StepError> {
        match step {
            TeardownStep::CloseChannel => {
                if self.channel.is_open() {
                    self.channel.close(NORMAL_CLOSURE, &self.close_reason).await?;
                }
            }
            TeardownStep::MarkOffline => {
                self.presence
                    .set_status(self.user_id, PresenceStatus::Offline, None)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Owns the channel for the connection's lifetime.
///
/// Dropping a session whose teardown has not run schedules it on the runtime.
struct Session {
    teardown: Teardown,
    descriptor: ConnectionDescriptor,
    finished: bool,
}

impl Session {
    async fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.teardown.run().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(
                    connection_id = %self.descriptor.connection_id,
                    "Connection dropped before teardown, scheduling it"
                );
                let mut teardown = self.teardown.detach();
                handle.spawn(async move { teardown.run().await });
            }
            Err(_) => tracing::error!(
                connection_id = %self.descriptor.connection_id,
                user_id = %self.descriptor.user_id,
                "No runtime available, teardown skipped"
            ),
        }
    }
}

/// Runs accepted connections.
pub struct ConnectionManager {
    dispatcher: Arc<dyn NotificationDispatcher>,
    presence: Arc<dyn PresenceService>,
    max_lifetime: Duration,
    close_reason: String,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        presence: Arc<dyn PresenceService>,
        config: &ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            presence,
            max_lifetime: config.max_lifetime(),
            close_reason: config.close_reason.clone(),
            shutdown,
        }
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// Drive one connection from activation to teardown.
    pub async fn run(
        &self,
        channel: impl Channel + 'static,
        descriptor: ConnectionDescriptor,
    ) -> ConnectionOutcome {
        let started = Instant::now();
        let mut session = Session {
            teardown: Teardown {
                channel: Box::new(channel),
                connection_id: descriptor.connection_id,
                user_id: descriptor.user_id,
                presence: self.presence.clone(),
                close_reason: self.close_reason.clone(),
            },
            descriptor,
            finished: false,
        };

        tracing::info!(
            connection_id = %session.descriptor.connection_id,
            user_id = %session.descriptor.user_id,
            username = %session.descriptor.username,
            identity = %session.descriptor.identity,
            user_agent = session.descriptor.user_agent.as_deref().unwrap_or("-"),
            state = ?ConnectionState::Active,
            "Connection active"
        );

        if let Err(e) = self
            .presence
            .set_status(session.descriptor.user_id, PresenceStatus::Online, None)
            .await
        {
            tracing::warn!(
                connection_id = %session.descriptor.connection_id,
                user_id = %session.descriptor.user_id,
                error = %e,
                "Failed to mark user online"
            );
        }

        let outcome = self
            .drive(session.teardown.channel.as_mut(), &session.descriptor)
            .await;

        tracing::debug!(
            connection_id = %session.descriptor.connection_id,
            state = ?ConnectionState::Closing,
            outcome = outcome.as_str(),
            "Connection state changed"
        );
        session.finish().await;

        let lifetime = started.elapsed();
        metrics::record_connection_closed(outcome.as_str(), lifetime);
        tracing::info!(
            connection_id = %session.descriptor.connection_id,
            user_id = %session.descriptor.user_id,
            outcome = outcome.as_str(),
            lifetime_secs = lifetime.as_secs(),
            "Connection closed"
        );
        outcome
    }

    async fn drive(&self, channel: &mut dyn Channel, descriptor: &ConnectionDescriptor) -> ConnectionOutcome {
        let cancel = self.shutdown.child_token();
        let dispatch = AssertUnwindSafe(self.dispatcher.handle_connection(channel, descriptor, cancel.clone()))
            .catch_unwind();
        tokio::pin!(dispatch);

        tokio::select! {
            result = &mut dispatch => match result {
                Ok(result) => Self::classify(result, descriptor),
                Err(panic) => {
                    tracing::error!(
                        connection_id = %descriptor.connection_id,
                        user_id = %descriptor.user_id,
                        panic = %panic_message(panic.as_ref()),
                        "Dispatcher panicked"
                    );
                    ConnectionOutcome::Failed
                }
            },
            _ = tokio::time::sleep(self.max_lifetime) => {
                tracing::info!(
                    connection_id = %descriptor.connection_id,
                    user_id = %descriptor.user_id,
                    max_lifetime_secs = self.max_lifetime.as_secs(),
                    "Connection reached maximum lifetime"
                );
                cancel.cancel();
                if tokio::time::timeout(UNWIND_GRACE, &mut dispatch).await.is_err() {
                    tracing::warn!(
                        connection_id = %descriptor.connection_id,
                        "Dispatcher ignored cancellation, dropping it"
                    );
                }
                ConnectionOutcome::TimedOut
            }
        }
    }

    fn classify(
        result: Result<Termination, DispatchError>,
        descriptor: &ConnectionDescriptor,
    ) -> ConnectionOutcome {
        match result {
            Ok(Termination::ClientClosed) => ConnectionOutcome::Closed,
            Ok(Termination::Cancelled) => ConnectionOutcome::Shutdown,
            Err(DispatchError::Channel(e)) => {
                tracing::warn!(
                    connection_id = %descriptor.connection_id,
                    user_id = %descriptor.user_id,
                    error = %e,
                    "Channel fault"
                );
                ConnectionOutcome::ChannelFault
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %descriptor.connection_id,
                    user_id = %descriptor.user_id,
                    identity = %descriptor.identity,
                    error = %e,
                    "Connection handling failed"
                );
                ConnectionOutcome::Failed
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
