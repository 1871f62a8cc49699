use std::fmt;

use thiserror::Error;

/// Why a `send` never reached the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    NoActiveSession,
    NotConnected,
    EmptyContent,
}

impl fmt::Display for SendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SendRejection::NoActiveSession => "no active chat session",
            SendRejection::NotConnected => "not connected",
            SendRejection::EmptyContent => "message is empty",
        };
        f.write_str(reason)
    }
}

/// Errors surfaced by the chat subsystem to its callers.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to connect to chat: {0}")]
    TransportConnect(String),
    #[error("message rejected: {0}")]
    SendRejected(SendRejection),
    #[error("failed to load message history: {0}")]
    History(#[from] HistoryError),
    #[error("no active chat session")]
    NoActiveSession,
    #[error("request cancelled: session was left or replaced")]
    Cancelled,
    #[error("chat controller is not running")]
    ControllerStopped,
}

impl ChatError {
    pub fn is_send_rejected(&self) -> bool {
        matches!(self, ChatError::SendRejected(_))
    }
}

/// Failures of a single history page request.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credential rejected by server (401)")]
    Unauthorized,
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid history page: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid API base url `{0}`")]
    InvalidBaseUrl(String),
}

/// Failures while establishing or running the STOMP connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("server rejected connection: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connect timed out")]
    Timeout,
    #[error("connection closed by server")]
    Closed,
    #[error("invalid websocket url `{0}`")]
    InvalidUrl(String),
}

impl TransportError {
    /// Hard failures stop the reconnect loop; everything else is retried.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            TransportError::Rejected(_) | TransportError::InvalidUrl(_)
        )
    }
}
