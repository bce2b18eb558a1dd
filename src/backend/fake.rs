//! In-process fake [`BackendClient`] for node-graph and cache tests: a hand
//! rolled trait fake rather than standing up HTTP mocks for unit-level tests
//! — no `wiremock`/`httpmock` dependency needed for node-graph tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::BackendClient;
use super::types::{ConversationFetch, ConversationMeta, Model};
use crate::error::BackendError;

pub struct FakeBackendClient {
    pub conversations: Mutex<Vec<ConversationMeta>>,
    pub archived: Mutex<Vec<ConversationMeta>>,
    pub messages_raw: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    pub models: Mutex<Vec<Model>>,
    pub default_model: Mutex<String>,
    pub next_id: AtomicU64,
    pub fail_next: Mutex<Option<BackendError>>,
    pub sent: Mutex<Vec<(String, String, Option<String>)>>,
}

impl Default for FakeBackendClient {
    fn default() -> Self {
        Self {
            conversations: Mutex::new(Vec::new()),
            archived: Mutex::new(Vec::new()),
            messages_raw: Mutex::new(std::collections::HashMap::new()),
            models: Mutex::new(Vec::new()),
            default_model: Mutex::new("fast".into()),
            next_id: AtomicU64::new(1),
            fail_next: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackendClient {
    pub fn set_messages(&self, conversation_id: &str, raw: Vec<u8>) {
        self.messages_raw
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), raw);
    }

    fn maybe_fail(&self) -> Option<BackendError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl BackendClient for FakeBackendClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn list_archived_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        Ok(self.archived.lock().unwrap().clone())
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationFetch, BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        let meta = self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .chain(self.archived.lock().unwrap().iter())
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| BackendError {
                status: Some(404),
                body: "not found".into(),
            })?;
        let raw = self
            .messages_raw
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| br#"{"messages":[]}"#.to_vec());
        Ok(ConversationFetch {
            meta,
            messages_raw: raw,
        })
    }

    async fn start_conversation(
        &self,
        model: Option<&str>,
        _cwd: Option<&str>,
        _text: &str,
    ) -> Result<(String, Option<String>), BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("backend-{n}");
        let slug = Some(format!("conversation-{n}"));
        self.conversations.lock().unwrap().push(ConversationMeta {
            id: id.clone(),
            slug: slug.clone(),
            archived: false,
            waiting_for_input: false,
            model: model.map(|s| s.to_string()),
            created_at: Some("2026-01-01T00:00:00Z".into()),
            updated_at: Some("2026-01-01T00:00:00Z".into()),
        });
        Ok((id, slug))
    }

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        model: Option<&str>,
    ) -> Result<(), BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        self.sent
            .lock()
            .unwrap()
            .push((id.to_string(), text.to_string(), model.map(|s| s.to_string())));
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<Model>, BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        Ok(self.models.lock().unwrap().clone())
    }

    async fn get_default_model(&self) -> Result<String, BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        Ok(self.default_model.lock().unwrap().clone())
    }

    async fn archive(&self, id: &str) -> Result<(), BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        let mut convs = self.conversations.lock().unwrap();
        if let Some(pos) = convs.iter().position(|c| c.id == id) {
            let mut c = convs.remove(pos);
            c.archived = true;
            self.archived.lock().unwrap().push(c);
        }
        Ok(())
    }

    async fn unarchive(&self, id: &str) -> Result<(), BackendError> {
        if let Some(e) = self.maybe_fail() {
            return Err(e);
        }
        let mut archived = self.archived.lock().unwrap();
        if let Some(pos) = archived.iter().position(|c| c.id == id) {
            let mut c = archived.remove(pos);
            c.archived = false;
            self.conversations.lock().unwrap().push(c);
        }
        Ok(())
    }
}
