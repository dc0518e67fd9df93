use chrono::{DateTime, Local};
use std::{fmt, net::SocketAddr};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RelayEvent {
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Started { addr: SocketAddr },
    Stopped,
    AcceptFailed { error: String },
    ConnectionOpened { id: Uuid, peer: SocketAddr },
    ConnectionClosed { id: Uuid, peer: SocketAddr },
    CommandReceived { peer: SocketAddr, command: String },
    InvalidCommand { peer: SocketAddr, reason: String },
    UploadStarted { filename: String },
    UploadSucceeded { filename: String },
    /// `detail` carries what the peer never sees: HTTP status and body or
    /// the transport error text. `status` is set when the endpoint answered.
    UploadFailed {
        filename: String,
        status: Option<u16>,
        detail: String,
    },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventKind::Started { addr } => write!(f, "Server started on {}", addr),
            EventKind::Stopped => write!(f, "Server stopped"),
            EventKind::AcceptFailed { error } => write!(f, "Error accepting connection: {}", error),
            EventKind::ConnectionOpened { peer, .. } => write!(f, "New connection from {}", peer),
            EventKind::ConnectionClosed { peer, .. } => {
                write!(f, "Connection closed from {}", peer)
            }
            EventKind::CommandReceived { peer, command } => {
                write!(f, "Received command from {}: {}", peer, command)
            }
            EventKind::InvalidCommand { peer, reason } => {
                write!(f, "Invalid command from {}: {}", peer, reason)
            }
            EventKind::UploadStarted { filename } => write!(f, "Starting upload for {}", filename),
            EventKind::UploadSucceeded { filename } => {
                write!(f, "File upload successful: {}", filename)
            }
            EventKind::UploadFailed { filename, detail, .. } => {
                write!(f, "File upload failed: {} ({})", filename, detail)
            }
        }
    }
}

impl EventKind {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::AcceptFailed { .. }
                | EventKind::InvalidCommand { .. }
                | EventKind::UploadFailed { .. }
        )
    }
}

/// Cloneable publisher of [`RelayEvent`]s. Every event is traced as well, so
/// nothing is lost when no one subscribes.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: broadcast::Sender<RelayEvent>,
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, kind: EventKind) {
        if kind.is_failure() {
            warn!("{}", kind);
        } else {
            info!("{}", kind);
        }
        // no receivers is fine
        let _ = self.sender.send(RelayEvent {
            timestamp: Local::now(),
            kind,
        });
    }
}
