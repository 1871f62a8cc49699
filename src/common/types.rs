use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Domain model of one chat message in a jamming session.
///
/// The backend DTO calls the author fields `senderEmail`/`senderName` while
/// the REST clients use `userEmail`/`userName`; both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    #[serde(alias = "senderEmail")]
    pub user_email: String,
    #[serde(alias = "senderName")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile_picture: Option<String>,
    pub content: String,
    pub timestamp: String,
}

impl ChatMessage {
    /// Parses `timestamp`, which is either RFC 3339 or a zone-less local
    /// date-time as produced by the server.
    pub fn sent_at(&self) -> Option<NaiveDateTime> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(parsed.naive_local());
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f").ok()
    }
}

/// Outbound payload published to `/app/chat/{sessionId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Backward cursor page as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage<T> {
    pub content: Vec<T>,
    #[serde(default, deserialize_with = "opaque_cursor")]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub size: usize,
}

pub type MessagePage = CursorPage<ChatMessage>;

impl MessagePage {
    /// Content ordered oldest-to-newest. Ids grow with server arrival order,
    /// so sorting by id undoes the newest-first order of the endpoint.
    pub fn into_chronological(mut self) -> Vec<ChatMessage> {
        self.content.sort_by_key(|message| message.id);
        self.content
    }

    /// Cursor for the next older page, if the server says there is one.
    pub fn continuation(&self) -> Option<&str> {
        if self.has_next {
            self.next_cursor.as_deref()
        } else {
            None
        }
    }
}

fn opaque_cursor<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(cursor) if cursor.is_empty() => Ok(None),
        serde_json::Value::String(cursor) => Ok(Some(cursor)),
        serde_json::Value::Number(cursor) => Ok(Some(cursor.to_string())),
        other => Err(D::Error::custom(format!(
            "unsupported cursor value: {other}"
        ))),
    }
}
