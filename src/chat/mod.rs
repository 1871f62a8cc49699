pub mod controller;
pub mod handle;
pub mod state;

use std::sync::Arc;

pub use controller::ChatController;
pub use handle::ChatHandle;
pub use state::ChatState;

use crate::auth::CredentialStore;
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::history::HistoryLoader;
use crate::network::spawn_transport;

/// Wires the history loader, the STOMP transport and the controller
/// together and starts both tasks on the current runtime.
pub fn spawn_chat(config: &AppConfig, credentials: CredentialStore) -> Result<ChatHandle, ChatError> {
    let history = HistoryLoader::new(&config.api_base_url, credentials.clone())?;
    let (transport, transport_events) =
        spawn_transport(&config.ws_url, config.transport.clone(), credentials.clone())
            .map_err(|err| ChatError::TransportConnect(err.to_string()))?;

    let (controller, handle) = ChatController::new(
        Arc::new(history),
        credentials,
        transport,
        transport_events,
        config.page_size,
    );
    tokio::spawn(controller.run());
    Ok(handle)
}
