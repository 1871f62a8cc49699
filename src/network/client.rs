use std::fmt;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::auth::CredentialStore;
use crate::common::{ChatMessage, TransportCommand, TransportEvent};
use crate::config::TransportConfig;
use crate::error::{ChatError, SendRejection, TransportError};

use super::frame::{Command, Frame, HeartBeat};
use super::transport::{StompConnection, open_session, websocket_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Cheap handle to the transport task. Owned by the chat controller.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<TransportCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    pub fn new(
        commands: mpsc::Sender<TransportCommand>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { commands, state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn connect(&self, session_id: i64, token: String, generation: u64) -> Result<(), ChatError> {
        self.commands
            .try_send(TransportCommand::Connect {
                session_id,
                token,
                generation,
            })
            .map_err(|err| ChatError::TransportConnect(format!("transport unavailable: {err}")))
    }

    /// Queues a publish. Rejected right away when no connection is up;
    /// delivery is only confirmed by the echoed message.
    pub fn send(&self, session_id: i64, content: String) -> Result<(), ChatError> {
        if !self.is_connected() {
            return Err(ChatError::SendRejected(SendRejection::NotConnected));
        }
        self.commands
            .try_send(TransportCommand::Publish {
                session_id,
                content,
            })
            .map_err(|err| {
                log::warn!("Failed to queue message for session {session_id}: {err}");
                ChatError::SendRejected(SendRejection::NotConnected)
            })
    }

    pub fn disconnect(&self) {
        if let Err(err) = self.commands.try_send(TransportCommand::Disconnect) {
            log::warn!("Failed to send disconnect command to transport: {err}");
        }
    }
}

/// Starts the transport task for `ws_url`. Reconnects read the bearer token
/// from `credentials`, so a refreshed token is picked up.
pub fn spawn_transport(
    ws_url: &str,
    config: TransportConfig,
    credentials: CredentialStore,
) -> Result<(TransportHandle, mpsc::Receiver<TransportEvent>), TransportError> {
    let url = websocket_url(ws_url)?;
    let capacity = config.channel_capacity.max(1);

    // Controller -> Transport
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    // Transport -> Controller
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let client = StompClient::new(url, config, credentials, event_tx, cmd_rx, state_tx);
    tokio::spawn(client.run());

    Ok((TransportHandle::new(cmd_tx, state_rx), event_rx))
}

struct Target {
    session_id: i64,
    token: String,
    generation: u64,
    established: bool,
}

type Handshake = JoinHandle<Result<StompConnection, TransportError>>;

/// STOMP-over-WebSocket client task: one connection, one subscription.
pub struct StompClient {
    url: Url,
    config: TransportConfig,
    credentials: CredentialStore,
    event_sender: mpsc::Sender<TransportEvent>,
    command_receiver: mpsc::Receiver<TransportCommand>,
    state_sender: watch::Sender<ConnectionState>,
    target: Option<Target>,
    link: Option<StompConnection>,
    handshake: Option<Handshake>,
    ticker: Option<Interval>,
    retry_at: Option<Instant>,
}

impl StompClient {
    pub fn new(
        url: Url,
        config: TransportConfig,
        credentials: CredentialStore,
        event_sender: mpsc::Sender<TransportEvent>,
        command_receiver: mpsc::Receiver<TransportCommand>,
        state_sender: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            url,
            config,
            credentials,
            event_sender,
            command_receiver,
            state_sender,
            target: None,
            link: None,
            handshake: None,
            ticker: None,
            retry_at: None,
        }
    }

    pub async fn run(mut self) {
        log::info!("Transport event loop started for {}", self.url);

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                result = next_handshake(&mut self.handshake) => {
                    self.handshake = None;
                    self.finish_connect(result).await;
                }
                inbound = next_inbound(&mut self.link) => {
                    self.handle_inbound(inbound).await;
                }
                _ = next_tick(&mut self.ticker) => {
                    self.handle_tick().await;
                }
                _ = retry_due(self.retry_at) => {
                    self.retry_at = None;
                    if self.link.is_none() && self.handshake.is_none() {
                        self.attempt_connect();
                    }
                }
            }
        }

        self.release().await;
        log::info!("Transport event loop stopped");
    }

    async fn handle_command(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Connect {
                session_id,
                token,
                generation,
            } => {
                let reusable = self.link.is_some() || self.handshake.is_some();
                if let Some(target) = self
                    .target
                    .as_mut()
                    .filter(|target| reusable && target.session_id == session_id)
                {
                    target.generation = generation;
                    target.token = token;
                    if self.link.is_some() {
                        log::debug!("Already connected to session {session_id}; reusing");
                        self.emit(TransportEvent::Connected {
                            session_id,
                            generation,
                        })
                        .await;
                    } else {
                        // The pending handshake reports under the new generation.
                        log::debug!("Handshake with session {session_id} already running");
                    }
                    return;
                }

                self.release().await;
                self.target = Some(Target {
                    session_id,
                    token,
                    generation,
                    established: false,
                });
                self.attempt_connect();
            }
            TransportCommand::Publish {
                session_id,
                content,
            } => {
                let Some(link) = self.link.as_mut() else {
                    log::warn!("Not connected; dropping message for session {session_id}");
                    return;
                };
                if link.session_id != session_id {
                    log::warn!(
                        "Dropping message for session {session_id}; connected to {}",
                        link.session_id
                    );
                    return;
                }
                if let Err(err) = link.publish(&content).await {
                    log::warn!("Publish to session {session_id} failed: {err}");
                    self.connection_lost(err.to_string()).await;
                }
            }
            TransportCommand::Disconnect => {
                self.release().await;
            }
        }
    }

    /// Starts a handshake in the background; the run loop keeps serving
    /// commands until it completes.
    fn attempt_connect(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let session_id = target.session_id;
        // Retries pick up a token refreshed since the session was entered.
        let token = match self.credentials.token() {
            Some(token) if target.established => token,
            _ => target.token.clone(),
        };

        self.set_state(ConnectionState::Connecting);
        let url = self.url.clone();
        let config = self.config.clone();
        self.handshake = Some(tokio::spawn(async move {
            open_session(&url, &config, session_id, &token).await
        }));
    }

    async fn finish_connect(
        &mut self,
        result: Result<Result<StompConnection, TransportError>, JoinError>,
    ) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let session_id = target.session_id;
        let generation = target.generation;
        let first_attempt = !target.established;

        let result = result.unwrap_or_else(|err| {
            Err(TransportError::Protocol(format!("handshake task failed: {err}")))
        });
        match result {
            Ok(connection) => {
                log::info!(
                    "Connected to chat session {session_id} (subscription {}, heart-beat {:?})",
                    connection.subscription_id,
                    connection.heart_beat
                );
                if !connection.heart_beat.is_enabled() {
                    log::debug!("Heart-beats disabled for session {session_id}");
                }
                self.ticker = heart_beat_ticker(&connection.heart_beat);
                self.link = Some(connection);
                if let Some(target) = self.target.as_mut() {
                    target.established = true;
                }
                self.set_state(ConnectionState::Connected);
                self.emit(TransportEvent::Connected {
                    session_id,
                    generation,
                })
                .await;
            }
            Err(err) if first_attempt || err.is_hard() => {
                log::warn!("Connecting to chat session {session_id} failed: {err}");
                self.target = None;
                self.set_state(ConnectionState::Error);
                self.emit(TransportEvent::ConnectFailed {
                    generation,
                    reason: err.to_string(),
                })
                .await;
            }
            Err(err) => {
                let delay = self.config.reconnect_delay();
                log::info!("Reconnect to session {session_id} failed ({err}); retrying in {delay:?}");
                self.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Option<Result<Message, tungstenite::Error>>) {
        let message = match inbound {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                self.connection_lost(err.to_string()).await;
                return;
            }
            None => {
                self.connection_lost("websocket stream ended".to_string()).await;
                return;
            }
        };

        if let Some(link) = self.link.as_mut() {
            link.last_inbound = Instant::now();
        }

        match message {
            Message::Text(text) => self.handle_payload(&text).await,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.handle_payload(&text).await,
                Err(_) => log::warn!("Dropping non UTF-8 binary frame"),
            },
            Message::Close(frame) => {
                let reason = frame
                    .map(|frame| format!("server closed the connection: {}", frame.reason))
                    .unwrap_or_else(|| "server closed the connection".to_string());
                self.connection_lost(reason).await;
            }
            _ => {}
        }
    }

    async fn handle_payload(&mut self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                log::warn!("Dropping malformed STOMP frame: {err}");
                return;
            }
        };

        match frame.command {
            Command::Message => self.dispatch_message(&frame).await,
            Command::Error => {
                let reason = frame
                    .get("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.body.clone());
                log::error!("STOMP error from server: {reason}");
                self.connection_lost(reason).await;
            }
            Command::Receipt => log::debug!("Receipt {:?}", frame.get("receipt-id")),
            other => log::debug!("Ignoring unexpected {other} frame"),
        }
    }

    async fn dispatch_message(&self, frame: &Frame) {
        let (Some(link), Some(target)) = (self.link.as_ref(), self.target.as_ref()) else {
            return;
        };
        if let Some(subscription) = frame.get("subscription") {
            if subscription != link.subscription_id {
                log::debug!("Ignoring message for stale subscription {subscription}");
                return;
            }
        }

        match serde_json::from_str::<ChatMessage>(&frame.body) {
            Ok(message) => {
                self.emit(TransportEvent::MessageReceived {
                    generation: target.generation,
                    message,
                })
                .await;
            }
            Err(err) => {
                log::warn!(
                    "Dropping undecodable chat message on {}: {err}",
                    frame.get("destination").unwrap_or("?")
                );
            }
        }
    }

    async fn handle_tick(&mut self) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let now = Instant::now();

        if let Some(incoming) = link.heart_beat.incoming {
            let silence = now.duration_since(link.last_inbound);
            if silence > incoming * 2 {
                self.connection_lost(format!("no heart-beat from server for {silence:?}"))
                    .await;
                return;
            }
        }

        let due = link
            .heart_beat
            .outgoing
            .is_some_and(|outgoing| now.duration_since(link.last_outbound) >= outgoing);
        if !due {
            return;
        }
        let result = match self.link.as_mut() {
            Some(link) => link.send_heart_beat().await,
            None => return,
        };
        if let Err(err) = result {
            self.connection_lost(err.to_string()).await;
        }
    }

    /// Drops the socket of an established connection and schedules a retry.
    async fn connection_lost(&mut self, reason: String) {
        self.ticker = None;
        if self.link.take().is_none() {
            return;
        }
        let Some(target) = self.target.as_ref() else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        let delay = self.config.reconnect_delay();
        log::warn!(
            "Connection to chat session {} lost ({reason}); retrying in {delay:?}",
            target.session_id
        );
        let generation = target.generation;
        self.retry_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Connecting);
        self.emit(TransportEvent::ConnectionLost { generation, reason })
            .await;
    }

    /// Tears down the connection, abandons a pending handshake and forgets
    /// the target. Idempotent.
    async fn release(&mut self) {
        self.retry_at = None;
        self.ticker = None;
        if let Some(handshake) = self.handshake.take() {
            handshake.abort();
        }
        if let Some(link) = self.link.take() {
            log::info!("Closing connection to chat session {}", link.session_id);
            link.close().await;
        }
        if let Some(target) = self.target.take() {
            self.emit(TransportEvent::Disconnected {
                generation: target.generation,
            })
            .await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_sender.send_replace(state);
        if previous != state {
            log::debug!("Transport state {previous} -> {state}");
        }
    }

    async fn emit(&self, event: TransportEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("Failed to deliver transport event: {err}");
        }
    }
}

async fn next_inbound(
    link: &mut Option<StompConnection>,
) -> Option<Result<Message, tungstenite::Error>> {
    match link {
        Some(link) => link.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_handshake(
    handshake: &mut Option<Handshake>,
) -> Result<Result<StompConnection, TransportError>, JoinError> {
    match handshake {
        Some(handshake) => handshake.await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn heart_beat_ticker(heart_beat: &HeartBeat) -> Option<Interval> {
    let period = [heart_beat.outgoing, heart_beat.incoming]
        .into_iter()
        .flatten()
        .min()?;
    let mut ticker = tokio::time::interval((period / 4).max(std::time::Duration::from_millis(50)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn send_is_rejected_while_disconnected() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let handle = TransportHandle::new(cmd_tx, state_rx);

        let err = handle.send(42, "hello".to_string()).unwrap_err();
        assert!(matches!(
            err,
            ChatError::SendRejected(SendRejection::NotConnected)
        ));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn send_queues_publish_when_connected() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let handle = TransportHandle::new(cmd_tx, state_rx);

        handle.send(42, "hello".to_string()).unwrap();
        match cmd_rx.try_recv().unwrap() {
            TransportCommand::Publish {
                session_id,
                content,
            } => {
                assert_eq!(session_id, 42);
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn ticker_follows_shortest_heart_beat() {
        assert!(heart_beat_ticker(&HeartBeat::default()).is_none());
        let ticker = heart_beat_ticker(&HeartBeat {
            outgoing: Some(Duration::from_millis(4000)),
            incoming: Some(Duration::from_millis(10000)),
        })
        .unwrap();
        assert_eq!(ticker.period(), Duration::from_millis(1000));
    }
}
