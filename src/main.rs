use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use socio_chat::chat::{ChatHandle, spawn_chat};
use socio_chat::common::ChatMessage;
use socio_chat::config::{self, AppConfig};
use socio_chat::history::{HistoryLoader, HistorySource};
use socio_chat::{ChatError, ChatUpdate, CredentialStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(
    name = "socio-chat",
    version,
    about = "Session chat client (REST history + STOMP live stream)"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Bearer token used for both REST and STOMP
    #[arg(long, env = config::ENV_TOKEN, hide_env_values = true)]
    token: Option<String>,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Join a session: print history, stream new messages, send stdin lines
    Join { session_id: i64 },
    /// Print one history page without connecting
    History {
        session_id: i64,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Write the effective configuration to the config file
    InitConfig,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::apply_env_overrides(config::load_config(&cli.config));
    let credentials = CredentialStore::new();
    if let Some(token) = cli.token.as_deref() {
        credentials.set_token(token);
    }

    let result = match cli.mode {
        Mode::Join { session_id } => run_join(&app_config, credentials, session_id).await,
        Mode::History {
            session_id,
            cursor,
            limit,
        } => run_history(&app_config, credentials, session_id, cursor, limit).await,
        Mode::InitConfig => config::save_config(&cli.config, &app_config)
            .map(|()| println!("Wrote {}", cli.config))
            .map_err(|err| format!("cannot write {}: {err}", cli.config)),
    };

    if let Err(err) = result {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run_join(
    config: &AppConfig,
    credentials: CredentialStore,
    session_id: i64,
) -> Result<(), String> {
    let chat = spawn_chat(config, credentials).map_err(|err| err.to_string())?;
    let updates = chat.subscribe();

    chat.enter_session(session_id)
        .await
        .map_err(|err| err.to_string())?;
    let history = chat.messages(session_id).await.map_err(|err| err.to_string())?;
    for message in &history {
        print_message(message);
    }
    let printed_up_to = history.last().map(|message| message.id);
    println!("-- live in session {session_id}; /older loads more, /quit leaves --");

    tokio::spawn(print_updates(updates, printed_up_to));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "/quit" => break,
            "/older" => load_older(&chat, session_id).await,
            _ => match chat.send(line).await {
                Ok(()) => {}
                Err(err) if err.is_send_rejected() => match chat.state().indicator() {
                    Some(label) => println!("!! {err} ({label})"),
                    None => println!("!! {err}"),
                },
                Err(err) => return Err(err.to_string()),
            },
        }
    }

    chat.leave_session().await.map_err(|err| err.to_string())
}

async fn load_older(chat: &ChatHandle, session_id: i64) {
    match chat.load_older().await {
        Ok(0) => println!("-- no older messages --"),
        Ok(added) => {
            println!("-- {added} older messages --");
            match chat.messages(session_id).await {
                Ok(messages) => prepended(&messages, added).iter().for_each(print_message),
                Err(err) => println!("!! {err}"),
            }
        }
        Err(ChatError::Cancelled) => {}
        Err(err) => println!("!! {err}"),
    }
}

/// Messages up to `printed_up_to` were already shown with the history.
async fn print_updates(mut updates: broadcast::Receiver<ChatUpdate>, printed_up_to: Option<i64>) {
    loop {
        match updates.recv().await {
            Ok(ChatUpdate::MessageReceived(message)) => {
                if printed_up_to.is_none_or(|id| message.id > id) {
                    print_message(&message);
                }
            }
            Ok(ChatUpdate::Reconnecting { .. }) => println!("-- connection lost, reconnecting --"),
            Ok(ChatUpdate::Connected { .. }) => log::debug!("Live stream up"),
            Ok(ChatUpdate::Error { message, .. }) => println!("!! {message}"),
            Ok(ChatUpdate::Closed { .. }) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Terminal fell behind, skipped {skipped} updates");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_history(
    config: &AppConfig,
    credentials: CredentialStore,
    session_id: i64,
    cursor: Option<String>,
    limit: Option<u32>,
) -> Result<(), String> {
    let loader =
        HistoryLoader::new(&config.api_base_url, credentials).map_err(|err| err.to_string())?;
    let page = loader
        .load_page(
            session_id,
            cursor.as_deref(),
            limit.unwrap_or(config.page_size),
        )
        .await
        .map_err(|err| err.to_string())?;

    let next = page.continuation().map(str::to_string);
    for message in page.into_chronological() {
        print_message(&message);
    }
    match next {
        Some(cursor) => println!("-- older: --cursor '{cursor}' --"),
        None => println!("-- start of conversation --"),
    }
    Ok(())
}

/// Older pages are prepended, so the `added` messages lead the sequence.
fn prepended(messages: &[ChatMessage], added: usize) -> &[ChatMessage] {
    &messages[..added.min(messages.len())]
}

fn print_message(message: &ChatMessage) {
    println!("{}", format_message(message));
}

fn format_message(message: &ChatMessage) -> String {
    let when = message
        .sent_at()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| message.timestamp.clone());
    format!("[{when}] {}: {}", message.user_name, message.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, timestamp: &str) -> ChatMessage {
        ChatMessage {
            id,
            session_id: 42,
            user_email: "ana@example.com".to_string(),
            user_name: "Ana".to_string(),
            user_profile_picture: None,
            content: format!("message {id}"),
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn older_messages_are_the_head_of_the_sequence() {
        let messages: Vec<ChatMessage> = (1..=5)
            .map(|id| message(id, "2025-03-01T18:30:00"))
            .collect();
        let ids: Vec<i64> = prepended(&messages, 2).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(prepended(&messages, 9).len(), 5);
    }

    #[test]
    fn formats_parsed_and_raw_timestamps() {
        assert_eq!(
            format_message(&message(1, "2025-03-01T18:30:00.123")),
            "[2025-03-01 18:30] Ana: message 1"
        );
        assert_eq!(
            format_message(&message(2, "yesterday")),
            "[yesterday] Ana: message 2"
        );
    }
}
