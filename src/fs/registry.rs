//! Per-backend client + request-cache registry.
//!
//! One [`RequestCache`] instance per backend (rather than one global cache
//! with backend-prefixed keys) so a TTL/coalescing bug in one backend's
//! traffic can never be confused with another's, and so each backend's cache
//! can be invalidated independently when its `url` changes.
//!
//! The `HttpBackendClient` itself is built lazily from the state store's
//! recorded URL and rebuilt whenever that URL is written — "the underlying
//! request client is invalidated (lazily recreated on next use)".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::backend::{BackendClient, HttpBackendClient};
use crate::cache::{CachedValue, RequestCache};
use crate::error::{FsError, FsResult};
use crate::state::StateStore;

pub struct BackendEntry {
    name: String,
    client: Mutex<Option<Arc<dyn BackendClient>>>,
    pub requests: RequestCache<CachedValue>,
}

impl BackendEntry {
    fn new(name: &str, ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            client: Mutex::new(None),
            requests: RequestCache::new(ttl),
        }
    }

    /// Return the cached client, building one from the state store's
    /// recorded URL on a miss. No lock is held across the construction
    /// itself (building a `reqwest::Client` does no I/O), and never across a
    /// backend call.
    pub fn client(&self, state: &StateStore) -> FsResult<Arc<dyn BackendClient>> {
        if let Some(c) = self.client.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(c);
        }
        let record = state
            .get_backend(&self.name)
            .ok_or_else(|| FsError::not_found(format!("backend {}", self.name)))?;
        if record.url.is_empty() {
            return Err(FsError::Backend {
                status: None,
                body: format!("backend {} has no url configured", self.name),
            });
        }
        let client: Arc<dyn BackendClient> = Arc::new(HttpBackendClient::new(record.url));
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client.clone());
        Ok(client)
    }

    pub fn invalidate_client(&self) {
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    #[cfg(test)]
    pub fn set_client_for_test(&self, client: Arc<dyn BackendClient>) {
        *self.client.lock().unwrap() = Some(client);
    }
}

pub struct BackendRegistry {
    ttl: Duration,
    entries: RwLock<HashMap<String, Arc<BackendEntry>>>,
}

impl BackendRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn entry(&self, name: &str) -> Arc<BackendEntry> {
        if let Some(e) = self.entries.read().unwrap_or_else(|e| e.into_inner()).get(name) {
            return e.clone();
        }
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BackendEntry::new(name, self.ttl)))
            .clone()
    }

    pub fn invalidate_client(&self, name: &str) {
        if let Some(e) = self.entries.read().unwrap_or_else(|e| e.into_inner()).get(name) {
            e.invalidate_client();
        }
    }

    pub fn forget(&self, name: &str) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackendClient;
    use tempfile::tempdir;

    #[test]
    fn entry_is_memoized_per_backend() {
        let reg = BackendRegistry::new(Duration::from_secs(5));
        let a = reg.entry("default");
        let b = reg.entry("default");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn client_build_fails_without_url() {
        let dir = tempdir().unwrap();
        let state = StateStore::load(dir.path().join("state.json")).unwrap();
        let reg = BackendRegistry::new(Duration::from_secs(5));
        let entry = reg.entry("default");
        let err = entry.client(&state).unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let dir = tempdir().unwrap();
        let state = StateStore::load(dir.path().join("state.json")).unwrap();
        let reg = BackendRegistry::new(Duration::from_secs(5));
        let entry = reg.entry("default");
        entry.set_client_for_test(Arc::new(FakeBackendClient::default()));
        assert!(entry.client(&state).is_ok());
        entry.invalidate_client();
        // With no URL configured, the rebuild now fails -- proof the cached
        // fake was actually dropped rather than reused.
        assert!(entry.client(&state).is_err());
    }
}
