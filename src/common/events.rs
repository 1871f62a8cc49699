use super::types::ChatMessage;

/// Events emitted by the transport task, in the order frames were received.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected {
        session_id: i64,
        generation: u64,
    },
    MessageReceived {
        generation: u64,
        message: ChatMessage,
    },
    /// The first connect attempt failed, or the server rejected a reconnect.
    /// The transport gave up on this target.
    ConnectFailed { generation: u64, reason: String },
    /// An established connection dropped; the transport is retrying.
    ConnectionLost { generation: u64, reason: String },
    Disconnected { generation: u64 },
}

impl TransportEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Connected { generation, .. }
            | TransportEvent::MessageReceived { generation, .. }
            | TransportEvent::ConnectFailed { generation, .. }
            | TransportEvent::ConnectionLost { generation, .. }
            | TransportEvent::Disconnected { generation } => *generation,
        }
    }
}

/// Lifecycle notifications the controller broadcasts to front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    HistoryLoaded {
        session_id: i64,
        count: usize,
        has_more: bool,
    },
    OlderLoaded {
        session_id: i64,
        added: usize,
        has_more: bool,
    },
    Connected { session_id: i64 },
    MessageReceived(ChatMessage),
    Reconnecting { session_id: i64 },
    Error { session_id: i64, message: String },
    Closed { session_id: i64 },
}
