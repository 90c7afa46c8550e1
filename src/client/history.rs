//! Chat history store
//!
//! Conversations live under one key of a [`KeyValueStore`] as a JSON array,
//! most recently touched first and bounded by `max_chats`. Storage failures
//! are logged and treated as "no history" or "save skipped"; they never
//! reach the caller.

use crate::client::message::ChatMessage;
use crate::client::util::now_millis;
use crate::config::HistoryConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A titled, timestamped sequence of messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Last touched, epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
            timestamp: 0,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }
}

/// Partial update for [`ChatHistory::update`]
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = Some(messages);
        self
    }
}

/// String key-value persistence substrate
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One `{key}.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::Storage(format!("Invalid storage key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Bounded, most-recent-first conversation list
pub struct ChatHistory<S: KeyValueStore> {
    store: S,
    storage_key: String,
    max_chats: usize,
}

impl<S: KeyValueStore> ChatHistory<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &HistoryConfig::default())
    }

    pub fn with_config(store: S, config: &HistoryConfig) -> Self {
        Self {
            store,
            storage_key: config.storage_key.clone(),
            max_chats: config.max_chats,
        }
    }

    pub fn max_chats(&self) -> usize {
        self.max_chats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stored conversations; empty when absent or unreadable
    pub fn load(&self) -> Vec<Conversation> {
        let raw = match self.store.get(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(key = %self.storage_key, "Failed to read chat history: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(chats) => chats,
            Err(e) => {
                tracing::warn!(key = %self.storage_key, "Failed to parse chat history: {}", e);
                Vec::new()
            }
        }
    }

    /// Persist `chats`, keeping only the first `max_chats`
    pub fn save(&self, mut chats: Vec<Conversation>) {
        chats.truncate(self.max_chats);

        let json = match serde_json::to_string(&chats) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize chat history: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.set(&self.storage_key, &json) {
            tracing::warn!(key = %self.storage_key, "Failed to save chat history: {}", e);
        }
    }

    /// Stamp and insert at the head
    pub fn add(&self, mut conversation: Conversation) -> Conversation {
        conversation.timestamp = now_millis();
        let mut chats = self.load();
        chats.insert(0, conversation.clone());
        self.save(chats);
        conversation
    }

    /// Merge `patch` into conversation `id` and move it to the head.
    ///
    /// The entry does not keep its position: the list stays ordered by last
    /// touch, so trimming to capacity drops the stalest conversation.
    /// No-op when `id` is unknown.
    pub fn update(&self, id: &str, patch: ConversationPatch) -> Option<Conversation> {
        let mut chats = self.load();
        let index = chats.iter().position(|c| c.id == id)?;

        let mut conversation = chats.remove(index);
        if let Some(title) = patch.title {
            conversation.title = title;
        }
        if let Some(messages) = patch.messages {
            conversation.messages = messages;
        }
        conversation.timestamp = now_millis();

        chats.insert(0, conversation.clone());
        self.save(chats);
        Some(conversation)
    }

    /// Update when present, add otherwise
    pub fn upsert(&self, conversation: Conversation) -> Conversation {
        let patch = ConversationPatch {
            title: Some(conversation.title.clone()),
            messages: Some(conversation.messages.clone()),
        };
        match self.update(&conversation.id, patch) {
            Some(updated) => updated,
            None => self.add(conversation),
        }
    }

    /// Remove conversation `id`, returning what is left
    pub fn delete(&self, id: &str) -> Vec<Conversation> {
        let mut chats = self.load();
        chats.retain(|c| c.id != id);
        self.save(chats.clone());
        chats
    }

    pub fn find(&self, id: &str) -> Option<Conversation> {
        self.load().into_iter().find(|c| c.id == id)
    }

    /// Drop the whole history
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.storage_key) {
            tracing::warn!(key = %self.storage_key, "Failed to clear chat history: {}", e);
        }
    }
}
