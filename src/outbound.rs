use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;
use warp::ws::Message;

use crate::error::SendError;

/// Process-unique handle for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The sending half of a connection, as seen by the relay core.
///
/// `send` must not block: a recipient that cannot take the payload right now
/// reports an error instead of stalling the caller.
pub trait Outbound: Send + Sync {
    fn send(&self, payload: &str) -> Result<(), SendError>;
}

/// Bounded queue feeding a connection's writer task.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Message>,
}

impl QueueSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (QueueSender { tx }, rx)
    }

    /// Queues a close frame. The writer stops after sending it.
    pub fn close_with(&self, code: u16, reason: &'static str) -> Result<(), SendError> {
        self.push(Message::close_with(code, reason))
    }

    fn push(&self, message: Message) -> Result<(), SendError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Backpressured,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

impl Outbound for QueueSender {
    fn send(&self, payload: &str) -> Result<(), SendError> {
        self.push(Message::text(payload))
    }
}
