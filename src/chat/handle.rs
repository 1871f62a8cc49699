use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::common::{ChatMessage, ChatUpdate};
use crate::error::ChatError;

use super::state::ChatState;

/// Requests a [`ChatHandle`] sends to the controller task.
#[derive(Debug)]
pub(crate) enum ChatCommand {
    Enter {
        session_id: i64,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Send {
        content: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    LoadOlder {
        reply: oneshot::Sender<Result<usize, ChatError>>,
    },
    Messages {
        session_id: i64,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
}

/// Cloneable front door to a running chat controller.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<ChatCommand>,
    state: watch::Receiver<ChatState>,
    updates: broadcast::Sender<ChatUpdate>,
}

impl ChatHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<ChatCommand>,
        state: watch::Receiver<ChatState>,
        updates: broadcast::Sender<ChatUpdate>,
    ) -> Self {
        Self {
            commands,
            state,
            updates,
        }
    }

    /// Loads the latest history page of `session_id` and goes live.
    /// Resolves once the live stream is up or entering failed.
    pub async fn enter_session(&self, session_id: i64) -> Result<(), ChatError> {
        self.request(|reply| ChatCommand::Enter { session_id, reply })
            .await?
    }

    pub async fn send(&self, content: impl Into<String>) -> Result<(), ChatError> {
        let content = content.into();
        self.request(|reply| ChatCommand::Send { content, reply })
            .await?
    }

    pub async fn leave_session(&self) -> Result<(), ChatError> {
        self.request(|reply| ChatCommand::Leave { reply }).await
    }

    /// Prepends the next older page. Returns how many messages were added.
    pub async fn load_older(&self) -> Result<usize, ChatError> {
        self.request(|reply| ChatCommand::LoadOlder { reply })
            .await?
    }

    pub async fn messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, ChatError> {
        self.request(|reply| ChatCommand::Messages { session_id, reply })
            .await
    }

    pub fn state(&self) -> ChatState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChatState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.updates.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ChatCommand,
    ) -> Result<T, ChatError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ChatError::ControllerStopped)?;
        response.await.map_err(|_| ChatError::ControllerStopped)
    }
}
