mod common;

use common::{FakeHttpServer, FakeStompServer, WAIT, chat_message, quiet_transport};
use serde_json::json;
use socio_chat::config::AppConfig;
use socio_chat::network::Command;
use socio_chat::{ChatState, ChatUpdate, CredentialStore, spawn_chat};
use tokio::time::timeout;

fn latest_page(_: &str) -> (u16, String) {
    let body = json!({
        "content": [chat_message(42, 2, "second"), chat_message(42, 1, "first")],
        "nextCursor": null,
        "hasNext": false,
        "size": 2
    });
    (200, body.to_string())
}

#[tokio::test]
async fn enter_stream_send_and_leave() {
    let http = FakeHttpServer::start(latest_page).await;
    let stomp = FakeStompServer::bind().await;
    let config = AppConfig {
        api_base_url: http.base_url.clone(),
        ws_url: stomp.url(),
        page_size: 20,
        transport: quiet_transport(),
    };
    let chat = spawn_chat(&config, CredentialStore::with_token("secret")).unwrap();
    let mut updates = chat.subscribe();

    let entering = {
        let chat = chat.clone();
        tokio::spawn(async move { chat.enter_session(42).await })
    };
    let mut peer = stomp.accept().await;
    peer.handshake().await;
    timeout(WAIT, entering).await.unwrap().unwrap().unwrap();
    assert_eq!(chat.state(), ChatState::Live);

    peer.deliver(42, &chat_message(42, 3, "live").to_string()).await;
    loop {
        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        if let ChatUpdate::MessageReceived(message) = update {
            assert_eq!(message.id, 3);
            break;
        }
    }
    let ids: Vec<i64> = chat
        .messages(42)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);

    chat.send("  hi there ").await.unwrap();
    let send = peer.next_frame().await;
    assert_eq!(send.get("destination"), Some("/app/chat/42"));
    assert_eq!(send.body, r#"{"content":"  hi there "}"#);

    chat.leave_session().await.unwrap();
    assert_eq!(chat.state(), ChatState::Closed);
    assert!(chat.messages(42).await.unwrap().is_empty());
    assert_eq!(peer.next_frame().await.command, Command::Unsubscribe);
    assert!(chat.send("late").await.unwrap_err().is_send_rejected());
}
