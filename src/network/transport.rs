use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::common::SendMessageRequest;
use crate::config::TransportConfig;
use crate::error::TransportError;

use super::frame::{Command, Frame, HeartBeat};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

pub fn topic_for(session_id: i64) -> String {
    format!("/topic/session/{session_id}")
}

pub fn destination_for(session_id: i64) -> String {
    format!("/app/chat/{session_id}")
}

/// Normalizes the configured endpoint: `http(s)://` maps to `ws(s)://`.
pub fn websocket_url(raw: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(raw).map_err(|_| TransportError::InvalidUrl(raw.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        _ => return Err(TransportError::InvalidUrl(raw.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(raw.to_string()))?;
    Ok(url)
}

/// One authenticated STOMP connection subscribed to a single session topic.
pub struct StompConnection {
    pub session_id: i64,
    pub subscription_id: String,
    pub heart_beat: HeartBeat,
    pub(crate) sink: SplitSink<WsStream, Message>,
    pub(crate) stream: SplitStream<WsStream>,
    pub(crate) last_inbound: Instant,
    pub(crate) last_outbound: Instant,
}

impl StompConnection {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sink.send(Message::Text(frame.encode())).await?;
        self.last_outbound = Instant::now();
        Ok(())
    }

    pub async fn publish(&mut self, content: &str) -> Result<(), TransportError> {
        let body = serde_json::to_string(&SendMessageRequest {
            content: content.to_string(),
        })
        .map_err(|err| TransportError::Protocol(err.to_string()))?;

        let frame = Frame::new(Command::Send)
            .header("destination", destination_for(self.session_id))
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .with_body(body);
        self.send_frame(frame).await
    }

    pub async fn send_heart_beat(&mut self) -> Result<(), TransportError> {
        self.sink.send(Message::Text("\n".to_string())).await?;
        self.last_outbound = Instant::now();
        Ok(())
    }

    /// Best-effort UNSUBSCRIBE + DISCONNECT, then closes the socket.
    pub async fn close(mut self) {
        let unsubscribe = Frame::new(Command::Unsubscribe).header("id", self.subscription_id.clone());
        if let Err(err) = self.send_frame(unsubscribe).await {
            log::debug!("UNSUBSCRIBE for session {} failed: {err}", self.session_id);
        }
        if let Err(err) = self.send_frame(Frame::new(Command::Disconnect)).await {
            log::debug!("DISCONNECT for session {} failed: {err}", self.session_id);
        }
        if let Err(err) = self.sink.close().await {
            log::debug!("Closing websocket for session {} failed: {err}", self.session_id);
        }
    }
}

/// Dials the endpoint, authenticates and subscribes to the session topic.
pub async fn open_session(
    url: &Url,
    config: &TransportConfig,
    session_id: i64,
    token: &str,
) -> Result<StompConnection, TransportError> {
    let handshake = establish(url, config, session_id, token);
    match config.connect_timeout() {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => handshake.await,
    }
}

async fn establish(
    url: &Url,
    config: &TransportConfig,
    session_id: i64,
    token: &str,
) -> Result<StompConnection, TransportError> {
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();

    let connect = Frame::new(Command::Connect)
        .header("accept-version", ACCEPT_VERSION)
        .header("host", url.host_str().unwrap_or("localhost"))
        .header(
            "heart-beat",
            format!(
                "{},{}",
                config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms
            ),
        )
        .header("Authorization", format!("Bearer {token}"));
    sink.send(Message::Text(connect.encode())).await?;

    let reply = next_frame(&mut stream).await?;
    match reply.command {
        Command::Connected => {}
        Command::Error => {
            let reason = reply
                .get("message")
                .map(str::to_string)
                .unwrap_or_else(|| reply.body.clone());
            return Err(TransportError::Rejected(reason));
        }
        other => {
            return Err(TransportError::Protocol(format!(
                "expected CONNECTED, got {other}"
            )));
        }
    }

    let heart_beat = HeartBeat::negotiate(
        config.heartbeat_outgoing_ms,
        config.heartbeat_incoming_ms,
        reply.get("heart-beat"),
    );

    let subscription_id = format!("sub-{}", Uuid::new_v4());
    let subscribe = Frame::new(Command::Subscribe)
        .header("id", subscription_id.clone())
        .header("destination", topic_for(session_id))
        .header("ack", "auto");
    sink.send(Message::Text(subscribe.encode())).await?;

    let now = Instant::now();
    Ok(StompConnection {
        session_id,
        subscription_id,
        heart_beat,
        sink,
        stream,
        last_inbound: now,
        last_outbound: now,
    })
}

async fn next_frame(stream: &mut SplitStream<WsStream>) -> Result<Frame, TransportError> {
    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|_| TransportError::Protocol("non UTF-8 frame".to_string()))?,
            Message::Close(_) => return Err(TransportError::Closed),
            _ => continue,
        };
        match Frame::parse(&text) {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) => continue,
            Err(err) => return Err(TransportError::Protocol(err.to_string())),
        }
    }
    Err(TransportError::Closed)
}
