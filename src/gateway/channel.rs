//! Bidirectional message channel abstraction.
//!
//! The lifecycle manager and dispatchers only see [`Channel`]; [`WsChannel`]
//! adapts axum's WebSocket to it.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel already closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, message: Message) -> Result<(), ChannelError>;

    /// Next inbound message; `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Message, ChannelError>>;

    /// Send a close frame. A no-op if the channel is already closed.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;
}

/// [`Channel`] over an upgraded WebSocket.
pub struct WsChannel {
    socket: WebSocket,
    open: bool,
}

impl WsChannel {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket, open: true }
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, message: Message) -> Result<(), ChannelError> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        self.socket.send(message).await.map_err(|e| {
            self.open = false;
            ChannelError::Protocol(e.to_string())
        })
    }

    async fn recv(&mut self) -> Option<Result<Message, ChannelError>> {
        if !self.open {
            return None;
        }
        match self.socket.recv().await {
            None => {
                self.open = false;
                None
            }
            Some(Ok(message)) => {
                if matches!(message, Message::Close(_)) {
                    self.open = false;
                }
                Some(Ok(message))
            }
            Some(Err(e)) => {
                self.open = false;
                Some(Err(ChannelError::Protocol(e.to_string())))
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ChannelError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.socket
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
