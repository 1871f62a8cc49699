use std::fmt;

/// Lifecycle of the controller for the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Idle,
    LoadingHistory,
    Connecting,
    Live,
    Reconnecting,
    Closed,
}

impl ChatState {
    pub fn is_live(&self) -> bool {
        matches!(self, ChatState::Live)
    }

    /// Label a front end can show next to the session title.
    pub fn indicator(&self) -> Option<&'static str> {
        match self {
            ChatState::LoadingHistory => Some("Loading..."),
            ChatState::Connecting | ChatState::Reconnecting => Some("Connecting..."),
            _ => None,
        }
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChatState::Idle => "idle",
            ChatState::LoadingHistory => "loading-history",
            ChatState::Connecting => "connecting",
            ChatState::Live => "live",
            ChatState::Reconnecting => "reconnecting",
            ChatState::Closed => "closed",
        };
        f.write_str(label)
    }
}
