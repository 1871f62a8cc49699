pub mod auth;
pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod history;
pub mod network;
pub mod storage;

pub use auth::CredentialStore;
pub use chat::{ChatHandle, ChatState, spawn_chat};
pub use common::{ChatMessage, ChatUpdate, MessagePage};
pub use error::{ChatError, HistoryError, SendRejection, TransportError};
