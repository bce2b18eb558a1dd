//! Persistent state store: the process-local map from
//! client-allocated `local_id`s to backend conversation records, plus the
//! backend registry (name, url, default flag).
//!
//! Persistence: serialize, write to a sibling temp file, then `rename` over
//! the real path so a crash mid-write never corrupts the previous
//! generation. A corrupt top-level state file fails mount startup outright
//! rather than silently falling back to an empty map — this is the one
//! durable record of local-id ↔ backend-id mappings a caller may have
//! already scripted against (see `DESIGN.md`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_BACKEND_NAME: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub local_id: String,
    pub backend_id: Option<String>,
    pub slug: Option<String>,
    pub created: bool,
    pub created_at: String,
    pub api_created_at: Option<String>,
    pub api_updated_at: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRecord {
    pub name: String,
    pub url: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateDocument {
    schema_version: u32,
    backends: Vec<BackendRecord>,
    conversations: Vec<Conversation>,
}

impl StateDocument {
    fn empty() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            backends: vec![BackendRecord {
                name: DEFAULT_BACKEND_NAME.to_string(),
                url: String::new(),
                is_default: true,
            }],
            conversations: Vec::new(),
        }
    }
}

/// Pre-schema-versioning shape: a flat list of conversations with no backend
/// scoping at all. Migrated on load into a single `default` backend.
#[derive(Debug, Deserialize)]
struct LegacyStateDocument {
    #[serde(default)]
    schema_version: Option<u32>,
    conversations: Vec<LegacyConversation>,
}

#[derive(Debug, Deserialize)]
struct LegacyConversation {
    local_id: String,
    backend_id: Option<String>,
    slug: Option<String>,
    #[serde(default)]
    created: bool,
    created_at: String,
    #[serde(default)]
    api_created_at: Option<String>,
    #[serde(default)]
    api_updated_at: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
}

fn migrate_legacy(legacy: LegacyStateDocument) -> StateDocument {
    let conversations = legacy
        .conversations
        .into_iter()
        .map(|c| Conversation {
            local_id: c.local_id,
            backend_id: c.backend_id,
            slug: c.slug,
            created: c.created,
            created_at: c.created_at,
            api_created_at: c.api_created_at,
            api_updated_at: c.api_updated_at,
            model: c.model,
            cwd: c.cwd,
            backend: DEFAULT_BACKEND_NAME.to_string(),
        })
        .collect();
    StateDocument {
        schema_version: CURRENT_SCHEMA_VERSION,
        backends: vec![BackendRecord {
            name: DEFAULT_BACKEND_NAME.to_string(),
            url: String::new(),
            is_default: true,
        }],
        conversations,
    }
}

pub struct StateStore {
    path: PathBuf,
    doc: Mutex<StateDocument>,
}

impl StateStore {
    /// Load the store from `path`, migrating a legacy flat-file shape if
    /// present, or starting empty if the file doesn't exist. A present but
    /// corrupt file fails outright rather than silently discarding state.
    pub fn load(path: impl Into<PathBuf>) -> FsResult<Self> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(contents) => parse_document(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no existing state file, starting fresh");
                StateDocument::empty()
            }
            Err(e) => return Err(FsError::Io(e)),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    fn save_locked(&self, doc: &StateDocument) -> FsResult<()> {
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| FsError::invalid(format!("failed to serialize state: {e}")))?;
        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn next_local_id(doc: &StateDocument) -> String {
        loop {
            let candidate = format!("{:08x}", uuid::Uuid::new_v4().as_u128() as u32);
            if !doc.conversations.iter().any(|c| c.local_id == candidate) {
                return candidate;
            }
        }
    }

    /// Allocate a new, uncommitted conversation record and persist it.
    pub fn clone_conversation(&self, backend: &str, now: &str) -> FsResult<String> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let local_id = Self::next_local_id(&doc);
        doc.conversations.push(Conversation {
            local_id: local_id.clone(),
            backend_id: None,
            slug: None,
            created: false,
            created_at: now.to_string(),
            api_created_at: None,
            api_updated_at: None,
            model: None,
            cwd: None,
            backend: backend.to_string(),
        });
        self.save_locked(&doc)?;
        Ok(local_id)
    }

    pub fn get(&self, local_id: &str) -> Option<Conversation> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.conversations.iter().find(|c| c.local_id == local_id).cloned()
    }

    pub fn get_by_backend_id(&self, backend_id: &str) -> Option<Conversation> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.conversations
            .iter()
            .find(|c| c.backend_id.as_deref() == Some(backend_id))
            .cloned()
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Conversation> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.conversations
            .iter()
            .find(|c| c.slug.as_deref() == Some(slug))
            .cloned()
    }

    pub fn list(&self, backend: &str) -> Vec<Conversation> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.conversations
            .iter()
            .filter(|c| c.backend == backend)
            .cloned()
            .collect()
    }

    pub fn mark_created(
        &self,
        local_id: &str,
        backend_id: &str,
        slug: Option<&str>,
        now: &str,
    ) -> FsResult<()> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let conv = doc
            .conversations
            .iter_mut()
            .find(|c| c.local_id == local_id)
            .ok_or_else(|| FsError::not_found(format!("conversation {local_id}")))?;
        conv.backend_id = Some(backend_id.to_string());
        conv.created = true;
        if conv.slug.is_none() {
            conv.slug = slug.map(|s| s.to_string());
        }
        conv.api_created_at = Some(now.to_string());
        conv.api_updated_at = Some(now.to_string());
        self.save_locked(&doc)
    }

    pub fn set_model(&self, local_id: &str, model: &str) -> FsResult<()> {
        self.update(local_id, |c| c.model = Some(model.to_string()))
    }

    pub fn set_cwd(&self, local_id: &str, cwd: &str) -> FsResult<()> {
        self.update(local_id, |c| c.cwd = Some(cwd.to_string()))
    }

    fn update(&self, local_id: &str, f: impl FnOnce(&mut Conversation)) -> FsResult<()> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let conv = doc
            .conversations
            .iter_mut()
            .find(|c| c.local_id == local_id)
            .ok_or_else(|| FsError::not_found(format!("conversation {local_id}")))?;
        f(conv);
        self.save_locked(&doc)
    }

    /// Idempotent: if `backend_id` is already tracked under `backend`,
    /// back-fill any empty fields and return the existing id; otherwise
    /// allocate a new record.
    pub fn adopt(&self, backend: &str, backend_id: &str, slug: Option<&str>, now: &str) -> FsResult<String> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = doc
            .conversations
            .iter_mut()
            .find(|c| c.backend == backend && c.backend_id.as_deref() == Some(backend_id))
        {
            if existing.slug.is_none() {
                existing.slug = slug.map(|s| s.to_string());
            }
            let local_id = existing.local_id.clone();
            self.save_locked(&doc)?;
            return Ok(local_id);
        }

        let local_id = Self::next_local_id(&doc);
        doc.conversations.push(Conversation {
            local_id: local_id.clone(),
            backend_id: Some(backend_id.to_string()),
            slug: slug.map(|s| s.to_string()),
            created: true,
            created_at: now.to_string(),
            api_created_at: Some(now.to_string()),
            api_updated_at: Some(now.to_string()),
            model: None,
            cwd: None,
            backend: backend.to_string(),
        });
        self.save_locked(&doc)?;
        Ok(local_id)
    }

    /// Drop uncommitted clones older than `timeout`. A `created_at` that
    /// fails to parse is treated as stale immediately rather than pinned
    /// forever.
    pub fn gc_uncommitted(&self, timeout: chrono::Duration) -> FsResult<usize> {
        let now = chrono::Utc::now();
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let before = doc.conversations.len();
        doc.conversations.retain(|c| {
            if c.created {
                return true;
            }
            match chrono::DateTime::parse_from_rfc3339(&c.created_at) {
                Ok(created) => now.signed_duration_since(created) < timeout,
                Err(_) => false,
            }
        });
        let removed = before - doc.conversations.len();
        if removed > 0 {
            self.save_locked(&doc)?;
        }
        Ok(removed)
    }

    // --- backend registry ---

    pub fn list_backends(&self) -> Vec<BackendRecord> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.backends.clone()
    }

    pub fn get_backend(&self, name: &str) -> Option<BackendRecord> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.backends.iter().find(|b| b.name == name).cloned()
    }

    pub fn default_backend_name(&self) -> String {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.backends
            .iter()
            .find(|b| b.is_default)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| DEFAULT_BACKEND_NAME.to_string())
    }

    pub fn add_backend(&self, name: &str, url: &str) -> FsResult<()> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        if doc.backends.iter().any(|b| b.name == name) {
            return Err(FsError::Exists(name.to_string()));
        }
        doc.backends.push(BackendRecord {
            name: name.to_string(),
            url: url.to_string(),
            is_default: false,
        });
        self.save_locked(&doc)
    }

    pub fn remove_backend(&self, name: &str) -> FsResult<()> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let backend = doc
            .backends
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| FsError::not_found(format!("backend {name}")))?;
        if backend.is_default {
            return Err(FsError::Busy(name.to_string()));
        }
        doc.backends.retain(|b| b.name != name);
        self.save_locked(&doc)
    }

    pub fn set_backend_url(&self, name: &str, url: &str) -> FsResult<()> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let backend = doc
            .backends
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| FsError::not_found(format!("backend {name}")))?;
        backend.url = url.to_string();
        self.save_locked(&doc)
    }

    pub fn set_default_backend(&self, name: &str) -> FsResult<()> {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        if !doc.backends.iter().any(|b| b.name == name) {
            return Err(FsError::not_found(format!("backend {name}")));
        }
        for b in doc.backends.iter_mut() {
            b.is_default = b.name == name;
        }
        self.save_locked(&doc)
    }

    #[cfg(test)]
    pub fn schema_version(&self) -> u32 {
        self.doc.lock().unwrap().schema_version
    }
}

fn parse_document(contents: &str) -> FsResult<StateDocument> {
    if let Ok(doc) = serde_json::from_str::<StateDocument>(contents) {
        if doc.schema_version == CURRENT_SCHEMA_VERSION {
            return Ok(doc);
        }
    }
    if let Ok(legacy) = serde_json::from_str::<LegacyStateDocument>(contents) {
        if legacy.schema_version.unwrap_or(0) < CURRENT_SCHEMA_VERSION {
            tracing::info!("migrating legacy state file to schema v{CURRENT_SCHEMA_VERSION}");
            return Ok(migrate_legacy(legacy));
        }
    }
    Err(FsError::invalid("state file is corrupt or has an unrecognized schema"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_at(dir: &Path) -> StateStore {
        StateStore::load(dir.join("state.json")).unwrap()
    }

    #[test]
    fn fresh_store_has_default_backend() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        assert_eq!(store.default_backend_name(), "default");
        assert_eq!(store.schema_version(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn clone_then_get_succeeds() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let id = store.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();
        let conv = store.get(&id).unwrap();
        assert!(!conv.created);
        assert!(conv.backend_id.is_none());
    }

    #[test]
    fn mark_created_transitions_backend_id_once() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let id = store.clone_conversation("default", "t0").unwrap();
        store.mark_created(&id, "backend-1", Some("my-slug"), "t1").unwrap();
        let conv = store.get(&id).unwrap();
        assert_eq!(conv.backend_id.as_deref(), Some("backend-1"));
        assert!(conv.created);
        assert_eq!(conv.slug.as_deref(), Some("my-slug"));
    }

    #[test]
    fn adopt_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let id1 = store.adopt("default", "backend-9", Some("s1"), "t0").unwrap();
        let id2 = store.adopt("default", "backend-9", Some("ignored"), "t1").unwrap();
        assert_eq!(id1, id2);
        let conv = store.get(&id1).unwrap();
        assert_eq!(conv.slug.as_deref(), Some("s1"));
    }

    #[test]
    fn adopt_backfills_empty_slug() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let id1 = store.adopt("default", "backend-9", None, "t0").unwrap();
        let id2 = store.adopt("default", "backend-9", Some("late-slug"), "t1").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.get(&id1).unwrap().slug.as_deref(), Some("late-slug"));
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let id = {
            let store = StateStore::load(&path).unwrap();
            store.clone_conversation("default", "t0").unwrap()
        };
        let reloaded = StateStore::load(&path).unwrap();
        assert!(reloaded.get(&id).is_some());
    }

    #[test]
    fn legacy_flat_file_migrates_to_default_backend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let legacy = r#"{"conversations":[
            {"local_id":"aaaaaaaa","backend_id":"b1","slug":"s","created":true,"created_at":"t0"}
        ]}"#;
        fs::write(&path, legacy).unwrap();
        let store = StateStore::load(&path).unwrap();
        assert_eq!(store.schema_version(), CURRENT_SCHEMA_VERSION);
        let conv = store.get("aaaaaaaa").unwrap();
        assert_eq!(conv.backend, DEFAULT_BACKEND_NAME);
    }

    #[test]
    fn corrupt_state_file_fails_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json at all").unwrap();
        let err = StateStore::load(&path).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn gc_removes_stale_uncommitted_clones_only() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let stale = store.clone_conversation("default", "2020-01-01T00:00:00Z").unwrap();
        let fresh = store.clone_conversation("default", &chrono::Utc::now().to_rfc3339()).unwrap();
        let committed = store.clone_conversation("default", "2020-01-01T00:00:00Z").unwrap();
        store.mark_created(&committed, "backend-1", None, "2020-01-01T00:00:00Z").unwrap();

        let removed = store.gc_uncommitted(chrono::Duration::hours(1)).unwrap();

        assert_eq!(removed, 1);
        assert!(store.get(&stale).is_none());
        assert!(store.get(&fresh).is_some());
        assert!(store.get(&committed).is_some());
    }

    #[test]
    fn backend_registry_add_remove_default() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.add_backend("alt", "https://alt.example/").unwrap();
        assert!(store.get_backend("alt").is_some());
        assert!(store.remove_backend("default").is_err());
        store.remove_backend("alt").unwrap();
        assert!(store.get_backend("alt").is_none());
    }

    #[test]
    fn set_default_backend_moves_flag() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.add_backend("alt", "https://alt.example/").unwrap();
        store.set_default_backend("alt").unwrap();
        assert_eq!(store.default_backend_name(), "alt");
        assert!(!store.get_backend("default").unwrap().is_default);
    }
}
