pub mod commands;
pub mod events;
pub mod types;

pub use commands::TransportCommand;
pub use events::{ChatUpdate, TransportEvent};
pub use types::{ChatMessage, CursorPage, MessagePage, SendMessageRequest};
