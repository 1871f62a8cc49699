use std::sync::{Arc, RwLock};

/// Process-wide bearer credential shared by the REST client and the
/// transport. Populated at login, cleared when the API answers 401.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    token: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_token(token);
        store
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let token = token.trim();
        let mut guard = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        };
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn invalidate(&self) {
        let mut guard = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            log::warn!("Bearer credential invalidated");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}
