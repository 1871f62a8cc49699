use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::auth::CredentialStore;
use crate::common::{ChatUpdate, MessagePage, TransportEvent};
use crate::error::{ChatError, HistoryError, SendRejection};
use crate::history::HistorySource;
use crate::network::TransportHandle;
use crate::storage::SessionMessageStore;

use super::handle::{ChatCommand, ChatHandle};
use super::state::ChatState;

const COMMAND_CAPACITY: usize = 32;
const UPDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageKind {
    Latest,
    Older,
}

struct PageOutcome {
    session_id: i64,
    generation: u64,
    kind: PageKind,
    result: Result<MessagePage, HistoryError>,
}

struct ActiveSession {
    session_id: i64,
    generation: u64,
    cursor: Option<String>,
    fetch: Option<JoinHandle<()>>,
    pending_enter: Option<oneshot::Sender<Result<(), ChatError>>>,
    pending_older: Option<oneshot::Sender<Result<usize, ChatError>>>,
}

impl ActiveSession {
    fn new(session_id: i64, generation: u64) -> Self {
        Self {
            session_id,
            generation,
            cursor: None,
            fetch: None,
            pending_enter: None,
            pending_older: None,
        }
    }
}

/// Owns the message store and drives one chat session at a time.
///
/// Every session entry gets a fresh generation number. Transport events and
/// history pages carry the generation they were started for, and anything
/// tagged with an older generation is dropped, so a session that was left
/// can never write into the next one.
pub struct ChatController {
    store: SessionMessageStore,
    history: Arc<dyn HistorySource>,
    credentials: CredentialStore,
    transport: TransportHandle,
    transport_events: mpsc::Receiver<TransportEvent>,
    command_receiver: mpsc::Receiver<ChatCommand>,
    page_sender: mpsc::Sender<PageOutcome>,
    page_receiver: mpsc::Receiver<PageOutcome>,
    state_sender: watch::Sender<ChatState>,
    update_sender: broadcast::Sender<ChatUpdate>,
    active: Option<ActiveSession>,
    generation: u64,
    page_size: u32,
}

impl ChatController {
    pub fn new(
        history: Arc<dyn HistorySource>,
        credentials: CredentialStore,
        transport: TransportHandle,
        transport_events: mpsc::Receiver<TransportEvent>,
        page_size: u32,
    ) -> (Self, ChatHandle) {
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (page_sender, page_receiver) = mpsc::channel(4);
        let (state_sender, state_receiver) = watch::channel(ChatState::Idle);
        let (update_sender, _) = broadcast::channel(UPDATE_CAPACITY);

        let handle = ChatHandle::new(command_sender, state_receiver, update_sender.clone());
        let controller = Self {
            store: SessionMessageStore::new(),
            history,
            credentials,
            transport,
            transport_events,
            command_receiver,
            page_sender,
            page_receiver,
            state_sender,
            update_sender,
            active: None,
            generation: 0,
            page_size: page_size.max(1),
        };
        (controller, handle)
    }

    pub async fn run(mut self) {
        log::info!("Chat controller started");

        loop {
            // Network first, so anything received before a command is
            // applied before that command runs.
            tokio::select! {
                biased;
                event = self.transport_events.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => {
                            log::warn!("Transport task stopped; shutting down chat controller");
                            break;
                        }
                    }
                }
                Some(outcome) = self.page_receiver.recv() => {
                    self.handle_page(outcome);
                }
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
            }
        }

        if self.teardown().is_some() {
            self.set_state(ChatState::Closed);
        }
        log::info!("Chat controller stopped");
    }

    fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Enter { session_id, reply } => self.enter_session(session_id, reply),
            ChatCommand::Send { content, reply } => {
                let _ = reply.send(self.send(content));
            }
            ChatCommand::Leave { reply } => {
                self.leave_session();
                let _ = reply.send(());
            }
            ChatCommand::LoadOlder { reply } => self.load_older(reply),
            ChatCommand::Messages { session_id, reply } => {
                let _ = reply.send(self.store.get(session_id).to_vec());
            }
        }
    }

    fn enter_session(&mut self, session_id: i64, reply: oneshot::Sender<Result<(), ChatError>>) {
        self.teardown();

        self.generation += 1;
        let generation = self.generation;
        log::info!("Entering chat session {session_id} (generation {generation})");

        let mut active = ActiveSession::new(session_id, generation);
        active.pending_enter = Some(reply);
        active.fetch = Some(self.spawn_page_fetch(session_id, generation, None, PageKind::Latest));
        self.active = Some(active);
        self.set_state(ChatState::LoadingHistory);
    }

    fn leave_session(&mut self) {
        if let Some(session_id) = self.teardown() {
            log::info!("Left chat session {session_id}");
            self.set_state(ChatState::Closed);
        }
    }

    fn send(&self, content: String) -> Result<(), ChatError> {
        let Some(active) = self.active.as_ref() else {
            return Err(ChatError::SendRejected(SendRejection::NoActiveSession));
        };
        if !self.state().is_live() {
            return Err(ChatError::SendRejected(SendRejection::NotConnected));
        }
        if content.trim().is_empty() {
            return Err(ChatError::SendRejected(SendRejection::EmptyContent));
        }
        self.transport.send(active.session_id, content)
    }

    fn load_older(&mut self, reply: oneshot::Sender<Result<usize, ChatError>>) {
        let Some(active) = self.active.as_ref() else {
            let _ = reply.send(Err(ChatError::NoActiveSession));
            return;
        };
        if active.fetch.is_some() {
            log::debug!("History fetch already running for session {}", active.session_id);
            let _ = reply.send(Ok(0));
            return;
        }
        let Some(cursor) = active.cursor.clone() else {
            let _ = reply.send(Ok(0));
            return;
        };

        let session_id = active.session_id;
        let generation = active.generation;
        let fetch = self.spawn_page_fetch(session_id, generation, Some(cursor), PageKind::Older);
        if let Some(active) = self.active.as_mut() {
            active.fetch = Some(fetch);
            active.pending_older = Some(reply);
        }
    }

    fn spawn_page_fetch(
        &self,
        session_id: i64,
        generation: u64,
        cursor: Option<String>,
        kind: PageKind,
    ) -> JoinHandle<()> {
        let history = Arc::clone(&self.history);
        let sender = self.page_sender.clone();
        let limit = self.page_size;

        tokio::spawn(async move {
            let result = history.load_page(session_id, cursor.as_deref(), limit).await;
            let outcome = PageOutcome {
                session_id,
                generation,
                kind,
                result,
            };
            if sender.send(outcome).await.is_err() {
                log::debug!("Chat controller gone; dropping history page for session {session_id}");
            }
        })
    }

    fn handle_page(&mut self, outcome: PageOutcome) {
        let current = self
            .active
            .as_mut()
            .filter(|active| active.generation == outcome.generation);
        let Some(active) = current else {
            log::debug!(
                "Discarding history page of abandoned session {} (generation {})",
                outcome.session_id,
                outcome.generation
            );
            return;
        };
        active.fetch = None;

        match outcome.kind {
            PageKind::Latest => self.apply_latest_page(outcome.result),
            PageKind::Older => self.apply_older_page(outcome.result),
        }
    }

    fn apply_latest_page(&mut self, result: Result<MessagePage, HistoryError>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let session_id = active.session_id;
        let generation = active.generation;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                log::warn!("Loading history for session {session_id} failed: {err}");
                let reply = active.pending_enter.take();
                self.fail_session(session_id, reply, ChatError::History(err));
                return;
            }
        };

        active.cursor = page.continuation().map(str::to_string);
        let has_more = active.cursor.is_some();
        let messages = page.into_chronological();
        let count = messages.len();
        self.store.replace(session_id, messages);
        log::info!("Loaded {count} messages for session {session_id} (more: {has_more})");
        self.broadcast(ChatUpdate::HistoryLoaded {
            session_id,
            count,
            has_more,
        });

        let connected = match self.credentials.token() {
            Some(token) => {
                self.set_state(ChatState::Connecting);
                self.transport.connect(session_id, token, generation)
            }
            None => Err(ChatError::TransportConnect(
                "no bearer credential available".to_string(),
            )),
        };
        if let Err(err) = connected {
            let reply = self
                .active
                .as_mut()
                .and_then(|active| active.pending_enter.take());
            self.fail_session(session_id, reply, err);
        }
    }

    fn apply_older_page(&mut self, result: Result<MessagePage, HistoryError>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let session_id = active.session_id;
        let reply = active.pending_older.take();

        let outcome = match result {
            Ok(page) => {
                active.cursor = page.continuation().map(str::to_string);
                let has_more = active.cursor.is_some();
                let added = self.store.prepend(session_id, page.into_chronological());
                log::debug!("Prepended {added} older messages to session {session_id}");
                self.broadcast(ChatUpdate::OlderLoaded {
                    session_id,
                    added,
                    has_more,
                });
                Ok(added)
            }
            Err(err) => {
                log::warn!("Loading older history for session {session_id} failed: {err}");
                Err(ChatError::History(err))
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(active) = self.active.as_ref() else {
            log::debug!("No active session; ignoring {event:?}");
            return;
        };
        if event.generation() != active.generation {
            log::debug!(
                "Dropping transport event of generation {} (current {})",
                event.generation(),
                active.generation
            );
            return;
        }
        let session_id = active.session_id;

        match event {
            TransportEvent::Connected { .. } => match self.state() {
                ChatState::Connecting => {
                    log::info!("Chat session {session_id} is live");
                    self.set_state(ChatState::Live);
                    if let Some(reply) = self
                        .active
                        .as_mut()
                        .and_then(|active| active.pending_enter.take())
                    {
                        let _ = reply.send(Ok(()));
                    }
                    self.broadcast(ChatUpdate::Connected { session_id });
                }
                ChatState::Reconnecting => {
                    log::info!("Chat session {session_id} resumed live stream");
                    self.set_state(ChatState::Live);
                    self.broadcast(ChatUpdate::Connected { session_id });
                }
                other => log::debug!("Ignoring connect notification while {other}"),
            },
            TransportEvent::MessageReceived { message, .. } => {
                if message.session_id != session_id {
                    log::warn!(
                        "Dropping message {} of session {} while in session {session_id}",
                        message.id,
                        message.session_id
                    );
                    return;
                }
                if self.store.append(session_id, message.clone()) {
                    self.broadcast(ChatUpdate::MessageReceived(message));
                } else {
                    log::debug!("Duplicate message {} in session {session_id}", message.id);
                }
            }
            TransportEvent::ConnectFailed { reason, .. } => {
                let reply = self
                    .active
                    .as_mut()
                    .and_then(|active| active.pending_enter.take());
                self.fail_session(session_id, reply, ChatError::TransportConnect(reason));
            }
            TransportEvent::ConnectionLost { reason, .. } => {
                if self.state() == ChatState::Live {
                    log::warn!("Chat session {session_id} lost its connection: {reason}");
                    self.set_state(ChatState::Reconnecting);
                    self.broadcast(ChatUpdate::Reconnecting { session_id });
                }
            }
            TransportEvent::Disconnected { .. } => {
                log::debug!("Transport disconnected from session {session_id}");
            }
        }
    }

    fn fail_session(
        &mut self,
        session_id: i64,
        reply: Option<oneshot::Sender<Result<(), ChatError>>>,
        error: ChatError,
    ) {
        let message = error.to_string();
        self.set_state(ChatState::Closed);
        self.broadcast(ChatUpdate::Error {
            session_id,
            message: message.clone(),
        });
        match reply {
            Some(reply) => {
                let _ = reply.send(Err(error));
            }
            None => log::warn!("Chat session {session_id} closed: {message}"),
        }
    }

    /// Releases the active session: aborts its fetch, cancels pending
    /// requests, disconnects the transport and clears its messages.
    fn teardown(&mut self) -> Option<i64> {
        let active = self.active.take()?;
        let session_id = active.session_id;

        if let Some(fetch) = active.fetch {
            fetch.abort();
        }
        if let Some(reply) = active.pending_enter {
            let _ = reply.send(Err(ChatError::Cancelled));
        }
        if let Some(reply) = active.pending_older {
            let _ = reply.send(Err(ChatError::Cancelled));
        }

        self.transport.disconnect();
        self.store.clear(session_id);
        self.broadcast(ChatUpdate::Closed { session_id });
        Some(session_id)
    }

    fn state(&self) -> ChatState {
        *self.state_sender.borrow()
    }

    fn set_state(&self, state: ChatState) {
        let previous = self.state_sender.send_replace(state);
        if previous != state {
            log::debug!("Chat state {previous} -> {state}");
        }
    }

    fn broadcast(&self, update: ChatUpdate) {
        // No subscribers is fine.
        let _ = self.update_sender.send(update);
    }
}
