//! Typed RPC over HTTP+JSON.
//!
//! No retries and no caching live here — that discipline sits in
//! [`crate::cache::request_cache`]. This layer only knows how to talk to one
//! backend URL and how to translate a non-accepted status or an undecodable
//! body into a [`BackendError`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::backend::types::{ConversationFetch, ConversationMeta, Model};
use crate::error::BackendError;

#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError>;
    async fn list_archived_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError>;
    async fn get_conversation(&self, id: &str) -> Result<ConversationFetch, BackendError>;
    async fn start_conversation(
        &self,
        model: Option<&str>,
        cwd: Option<&str>,
        text: &str,
    ) -> Result<(String, Option<String>), BackendError>;
    async fn send_message(
        &self,
        id: &str,
        text: &str,
        model: Option<&str>,
    ) -> Result<(), BackendError>;
    async fn list_models(&self) -> Result<Vec<Model>, BackendError>;
    async fn get_default_model(&self) -> Result<String, BackendError>;
    async fn archive(&self, id: &str) -> Result<(), BackendError>;
    async fn unarchive(&self, id: &str) -> Result<(), BackendError>;
}

pub struct HttpBackendClient {
    client: Client,
    base_url: String,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_error(resp: reqwest::Response) -> BackendError {
        let status = Some(resp.status().as_u16());
        let body = resp.text().await.unwrap_or_default();
        BackendError { status, body }
    }

    fn transport_error(e: reqwest::Error) -> BackendError {
        BackendError {
            status: e.status().map(|s| s.as_u16()),
            body: e.to_string(),
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError> {
        let resp = self
            .client
            .get(self.url("/conversations"))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        resp.json().await.map_err(|e| BackendError {
            status: None,
            body: format!("decode failure: {e}"),
        })
    }

    async fn list_archived_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError> {
        let resp = self
            .client
            .get(self.url("/conversations?archived=true"))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        resp.json().await.map_err(|e| BackendError {
            status: None,
            body: format!("decode failure: {e}"),
        })
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationFetch, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/{id}")))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        let bytes = resp.bytes().await.map_err(Self::transport_error)?;
        let meta: ConversationMeta = serde_json::from_slice(&bytes).map_err(|e| BackendError {
            status: None,
            body: format!("decode failure: {e}"),
        })?;
        Ok(ConversationFetch {
            meta,
            messages_raw: bytes.to_vec(),
        })
    }

    async fn start_conversation(
        &self,
        model: Option<&str>,
        cwd: Option<&str>,
        text: &str,
    ) -> Result<(String, Option<String>), BackendError> {
        let resp = self
            .client
            .post(self.url("/conversations"))
            .json(&json!({ "model": model, "cwd": cwd, "text": text }))
            .send()
            .await
            .map_err(Self::transport_error)?;
        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(Self::read_error(resp).await);
        }
        let meta: ConversationMeta = resp.json().await.map_err(|e| BackendError {
            status: None,
            body: format!("decode failure: {e}"),
        })?;
        Ok((meta.id, meta.slug))
    }

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        model: Option<&str>,
    ) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{id}/messages")))
            .json(&json!({ "text": text, "model": model }))
            .send()
            .await
            .map_err(Self::transport_error)?;
        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED && status != StatusCode::ACCEPTED {
            return Err(Self::read_error(resp).await);
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<Model>, BackendError> {
        let resp = self
            .client
            .get(self.url("/models"))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        resp.json().await.map_err(|e| BackendError {
            status: None,
            body: format!("decode failure: {e}"),
        })
    }

    async fn get_default_model(&self) -> Result<String, BackendError> {
        let resp = self
            .client
            .get(self.url("/models/default"))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        #[derive(serde::Deserialize)]
        struct Default_ {
            display_name: String,
        }
        let d: Default_ = resp.json().await.map_err(|e| BackendError {
            status: None,
            body: format!("decode failure: {e}"),
        })?;
        Ok(d.display_name)
    }

    async fn archive(&self, id: &str) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{id}/archive")))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        Ok(())
    }

    async fn unarchive(&self, id: &str) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{id}/unarchive")))
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        Ok(())
    }
}
