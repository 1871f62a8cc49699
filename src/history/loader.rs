use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use url::Url;

use crate::auth::CredentialStore;
use crate::common::MessagePage;
use crate::error::HistoryError;

/// Anything that can serve one backward page of a session's history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetches the page older than `cursor`, or the most recent page when
    /// `cursor` is `None`. Exactly one request per call.
    async fn load_page(
        &self,
        session_id: i64,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, HistoryError>;
}

/// REST client for `GET /chat/sessions/{id}/messages`.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    http: reqwest::Client,
    base_url: Url,
    credentials: CredentialStore,
}

impl HistoryLoader {
    pub fn new(base_url: &str, credentials: CredentialStore) -> Result<Self, HistoryError> {
        Self::with_client(reqwest::Client::new(), base_url, credentials)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        credentials: CredentialStore,
    ) -> Result<Self, HistoryError> {
        let parsed =
            Url::parse(base_url).map_err(|_| HistoryError::InvalidBaseUrl(base_url.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(HistoryError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url: parsed,
            credentials,
        })
    }

    pub fn endpoint(
        &self,
        session_id: i64,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Url, HistoryError> {
        let session = session_id.to_string();
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HistoryError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["chat", "sessions", session.as_str(), "messages"]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = cursor.filter(|cursor| !cursor.is_empty()) {
                query.append_pair("cursor", cursor);
            }
            query.append_pair("limit", &limit.to_string());
        }
        Ok(url)
    }
}

#[async_trait]
impl HistorySource for HistoryLoader {
    async fn load_page(
        &self,
        session_id: i64,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, HistoryError> {
        let url = self.endpoint(session_id, cursor, limit)?;
        log::debug!("Fetching history page {url}");

        let mut request = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(token) = self.credentials.token() {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.credentials.invalidate();
            return Err(HistoryError::Unauthorized);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HistoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: MessagePage = serde_json::from_str(&body)?;
        log::debug!(
            "History page for session {session_id}: {} messages, has_next={}",
            page.content.len(),
            page.has_next
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(base: &str) -> HistoryLoader {
        HistoryLoader::new(base, CredentialStore::new()).unwrap()
    }

    #[test]
    fn builds_endpoint_below_api_prefix() {
        let url = loader("http://localhost:8080/api")
            .endpoint(42, None, 50)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/chat/sessions/42/messages?limit=50"
        );

        let url = loader("http://localhost:8080/api/")
            .endpoint(42, None, 50)
            .unwrap();
        assert_eq!(url.path(), "/api/chat/sessions/42/messages");
    }

    #[test]
    fn encodes_cursor_and_skips_empty_one() {
        let history = loader("http://localhost:8080/api");
        let url = history
            .endpoint(7, Some("2025-03-01T18:30:00.5+01:00"), 2)
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("cursor".to_string(), "2025-03-01T18:30:00.5+01:00".to_string()),
                ("limit".to_string(), "2".to_string()),
            ]
        );

        let url = history.endpoint(7, Some(""), 2).unwrap();
        assert_eq!(url.query(), Some("limit=2"));
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            HistoryLoader::new("mailto:chat@example.com", CredentialStore::new()),
            Err(HistoryError::InvalidBaseUrl(_))
        ));
        assert!(HistoryLoader::new("localhost", CredentialStore::new()).is_err());
    }
}
