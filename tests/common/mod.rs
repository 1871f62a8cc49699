#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use socio_chat::config::TransportConfig;
use socio_chat::network::{Command, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn chat_message(session_id: i64, id: i64, content: &str) -> Value {
    json!({
        "id": id,
        "sessionId": session_id,
        "userEmail": "ana@example.com",
        "userName": "Ana",
        "content": content,
        "timestamp": "2025-03-01T18:30:00"
    })
}

/// Heart-beats off and a short retry delay, so tests stay quick.
pub fn quiet_transport() -> TransportConfig {
    TransportConfig {
        reconnect_delay_ms: 100,
        heartbeat_outgoing_ms: 0,
        heartbeat_incoming_ms: 0,
        connect_timeout_ms: Some(2000),
        channel_capacity: 16,
    }
}

/// Handshakes may hang for as long as the peer keeps quiet.
pub fn quiet_transport_without_timeout() -> TransportConfig {
    TransportConfig {
        connect_timeout_ms: None,
        ..quiet_transport()
    }
}

/// A bare WebSocket listener speaking just enough STOMP for the client.
pub struct FakeStompServer {
    listener: TcpListener,
}

impl FakeStompServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub fn url(&self) -> String {
        let addr = self.listener.local_addr().unwrap();
        format!("ws://{addr}/ws-chat/websocket")
    }

    pub async fn accept(&self) -> StompPeer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never dialed")
            .unwrap();
        let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        StompPeer {
            socket,
            subscription: None,
        }
    }

    pub async fn expect_no_dial(&self, within: Duration) {
        assert!(
            timeout(within, self.listener.accept()).await.is_err(),
            "client dialed again"
        );
    }
}

pub struct StompPeer {
    socket: WebSocketStream<TcpStream>,
    pub subscription: Option<String>,
}

impl StompPeer {
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            let message = timeout(WAIT, self.socket.next())
                .await
                .expect("no frame from client")
                .expect("client hung up")
                .unwrap();
            if let Message::Text(text) = message {
                if let Some(frame) = Frame::parse(&text).unwrap() {
                    return frame;
                }
            }
        }
    }

    /// Waits for a bare EOL heart-beat from the client.
    pub async fn next_heart_beat(&mut self) {
        loop {
            let message = timeout(WAIT, self.socket.next())
                .await
                .expect("no heart-beat from client")
                .expect("client hung up")
                .unwrap();
            if let Message::Text(text) = message {
                if !text.is_empty() && text.chars().all(|c| c == '\n' || c == '\r') {
                    return;
                }
            }
        }
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        self.socket
            .send(Message::Text(frame.encode()))
            .await
            .unwrap();
    }

    /// Answers CONNECT and SUBSCRIBE; returns the CONNECT frame.
    pub async fn handshake(&mut self) -> Frame {
        self.handshake_with("0,0").await
    }

    /// Like [`handshake`](Self::handshake), announcing `heart_beat` in
    /// CONNECTED.
    pub async fn handshake_with(&mut self, heart_beat: &str) -> Frame {
        let connect = self.next_frame().await;
        assert_eq!(connect.command, Command::Connect);
        self.send_frame(
            Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", heart_beat),
        )
        .await;

        let subscribe = self.next_frame().await;
        assert_eq!(subscribe.command, Command::Subscribe);
        self.subscription = subscribe.get("id").map(str::to_string);
        connect
    }

    pub async fn deliver(&mut self, session_id: i64, body: &str) {
        let subscription = self.subscription.clone().unwrap_or_default();
        let frame = Frame::new(Command::Message)
            .header("destination", format!("/topic/session/{session_id}"))
            .header("subscription", subscription)
            .header("message-id", uuid::Uuid::new_v4().to_string())
            .header("content-type", "application/json")
            .with_body(body);
        self.send_frame(frame).await;
    }

    pub async fn hang_up(mut self) {
        let _ = self.socket.close(None).await;
    }
}

pub struct Recorded {
    pub target: String,
    pub authorization: Option<String>,
}

type Route = dyn Fn(&str) -> (u16, String) + Send + Sync;

/// One-shot HTTP/1.1 responder: every connection gets one answer and is
/// closed.
pub struct FakeHttpServer {
    pub base_url: String,
    pub requests: mpsc::UnboundedReceiver<Recorded>,
}

impl FakeHttpServer {
    pub async fn start(route: impl Fn(&str) -> (u16, String) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        let (tx, requests) = mpsc::unbounded_channel();
        let route: Arc<Route> = Arc::new(route);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let route = Arc::clone(&route);
                let tx = tx.clone();
                tokio::spawn(async move { serve_one(stream, route, tx).await });
            }
        });

        Self { base_url, requests }
    }
}

async fn serve_one(mut stream: TcpStream, route: Arc<Route>, tx: mpsc::UnboundedSender<Recorded>) {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&raw).to_string();
    let mut lines = head.lines();
    let target = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("")
        .to_string();
    let authorization = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.trim().to_string());

    let (status, body) = route(&target);
    let _ = tx.send(Recorded {
        target,
        authorization,
    });

    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
