/// Commands the chat controller sends down to the transport task.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Open (or reuse) the connection for `session_id` and subscribe to its
    /// topic. `generation` is echoed back on every resulting event.
    Connect {
        session_id: i64,
        token: String,
        generation: u64,
    },
    /// Publish `{content}` to the session's destination. Fire-and-forget.
    Publish { session_id: i64, content: String },
    /// Unsubscribe, close the socket and stop retrying.
    Disconnect,
}
