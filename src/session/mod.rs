//! Session module - bounded, durable conversation state
//!
//! [`SessionCache`] keeps a bounded number of sessions resident in memory and
//! evicts the least-recently-used one when full. Eviction writes the session to
//! the [`SessionStore`] *before* dropping it from memory, so a conversation is
//! never lost by being pushed out of the cache.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use databot::session::{Role, SessionCache, SessionStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(SessionStore::open_in_memory().unwrap());
//!     let cache = SessionCache::new(store, 2, 50);
//!
//!     cache.append_message("c1", Role::User, "Hello!").await.unwrap();
//!     cache.append_message("c1", Role::Assistant, "Hi there!").await.unwrap();
//!
//!     let session = cache.get_or_create("c1").await.unwrap();
//!     assert_eq!(session.message_count(), 2);
//! }
//! ```

pub mod store;
pub mod types;

pub use store::SessionStore;
pub use types::{Message, Role, Session, SessionMeta, ToolCall, DEFAULT_MAX_MESSAGES};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{DatabotError, Result};

/// Default number of sessions kept resident.
pub const DEFAULT_MAX_CACHED: usize = 256;

/// Attempts made to flush a session before an eviction is abandoned.
const FLUSH_ATTEMPTS: u32 = 3;

struct Entry {
    session: Session,
    /// Bumped on every mutation
    version: u64,
    /// Version last written to the store
    persisted: u64,
}

impl Entry {
    fn new(session: Session) -> Self {
        Self {
            session,
            version: 0,
            persisted: 0,
        }
    }

    fn is_dirty(&self) -> bool {
        self.version > self.persisted
    }
}

/// LRU cache of sessions backed by a durable store.
///
/// All mutation goes through the cache: callers receive snapshots, never
/// references into the resident state. The resident map is only locked for
/// in-memory work; store reads and writes happen outside it, serialised per
/// chat so writes of one session land in order.
pub struct SessionCache {
    /// Resident sessions, least-recently-used first
    entries: Mutex<IndexMap<String, Entry>>,
    io_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    store: Arc<SessionStore>,
    capacity: usize,
    max_messages: usize,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` sessions (minimum 1), each
    /// keeping at most `max_messages` messages.
    pub fn new(store: Arc<SessionStore>, capacity: usize, max_messages: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            io_locks: Mutex::new(HashMap::new()),
            store,
            capacity: capacity.max(1),
            max_messages: max_messages.max(1),
        }
    }

    /// Cache with the default capacity (256) and message bound (50).
    pub fn with_defaults(store: Arc<SessionStore>) -> Self {
        Self::new(store, DEFAULT_MAX_CACHED, DEFAULT_MAX_MESSAGES)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident sessions.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether `chat_id` is resident (does not touch LRU order).
    pub async fn is_resident(&self, chat_id: &str) -> bool {
        self.entries.lock().await.contains_key(chat_id)
    }

    /// Resident keys, least-recently-used first.
    pub async fn resident_keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Return a snapshot of the session for `chat_id`, loading or creating it.
    ///
    /// Marks the session most-recently-used.
    pub async fn get_or_create(&self, chat_id: &str) -> Result<Session> {
        self.with_resident(chat_id, |entry| entry.session.clone())
            .await
    }

    /// Snapshot of the message history for `chat_id`, oldest first.
    pub async fn history(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.with_resident(chat_id, |entry| entry.session.messages.clone())
            .await
    }

    /// Append a plain message with `role` and `content`.
    pub async fn append_message(&self, chat_id: &str, role: Role, content: &str) -> Result<()> {
        let message = match role {
            Role::User => Message::user(content),
            Role::Assistant => Message::assistant(content),
            Role::System => Message::system(content),
            Role::Tool => Message {
                role: Role::Tool,
                ..Message::user(content)
            },
        };
        self.append(chat_id, message).await
    }

    /// Append a fully-formed message, trimming the oldest past the bound.
    pub async fn append(&self, chat_id: &str, message: Message) -> Result<()> {
        self.with_resident(chat_id, |entry| {
            entry.session.add_message(message);
            entry.version += 1;
        })
        .await
    }

    /// Persist `chat_id` if it is resident and has unsaved changes.
    pub async fn flush(&self, chat_id: &str) -> Result<()> {
        self.flush_one(chat_id).await.map(|_| ())
    }

    /// Persist every dirty resident session. Returns how many were written.
    pub async fn flush_all(&self) -> Result<usize> {
        let dirty: Vec<String> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| e.is_dirty())
                .map(|(k, _)| k.clone())
                .collect()
        };
        let mut written = 0;
        for key in dirty {
            if self.flush_one(&key).await? {
                written += 1;
            }
        }
        if written > 0 {
            info!(sessions = written, "Flushed dirty sessions");
        }
        Ok(written)
    }

    /// Remove `chat_id` from memory and from the store. Idempotent.
    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        let lock = self.io_lock(chat_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.entries.lock().await.shift_remove(chat_id);
            let key = chat_id.to_string();
            self.blocking(move |store| store.delete(&key)).await
        };
        drop(lock);
        self.release_io_lock(chat_id).await;
        let existed = result?;
        debug!(chat_id = %chat_id, existed, "Session deleted");
        Ok(())
    }

    /// Metadata for every known session, most recently updated first.
    pub async fn list(&self) -> Result<Vec<SessionMeta>> {
        self.flush_all().await?;
        self.blocking(|store| store.list()).await
    }

    /// Metadata for one session, resident or stored.
    pub async fn metadata(&self, chat_id: &str) -> Result<Option<SessionMeta>> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(chat_id) {
                let s = &entry.session;
                return Ok(Some(SessionMeta {
                    key: s.chat_id.clone(),
                    created_at: s.created_at,
                    updated_at: s.updated_at,
                    message_count: s.message_count(),
                }));
            }
        }
        let key = chat_id.to_string();
        self.blocking(move |store| store.metadata(&key)).await
    }

    /// Stored or resident session without creating one or changing LRU order.
    pub async fn peek(&self, chat_id: &str) -> Result<Option<Session>> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(chat_id) {
                return Ok(Some(entry.session.clone()));
            }
        }
        let key = chat_id.to_string();
        let max = self.max_messages;
        self.blocking(move |store| store.load(&key, max)).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Run `f` on the resident entry for `chat_id`, marking it
    /// most-recently-used and loading it first if needed.
    async fn with_resident<R>(&self, chat_id: &str, f: impl FnOnce(&mut Entry) -> R) -> Result<R> {
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = touch(&mut entries, chat_id) {
                return Ok(f(entry));
            }
        }

        let lock = self.io_lock(chat_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.load_resident(chat_id, f).await
        };
        drop(lock);
        self.release_io_lock(chat_id).await;
        result
    }

    /// Caller holds the I/O lock for `chat_id`.
    async fn load_resident<R>(&self, chat_id: &str, f: impl FnOnce(&mut Entry) -> R) -> Result<R> {
        let mut loaded: Option<Session> = None;
        loop {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = touch(&mut entries, chat_id) {
                return Ok(f(entry));
            }

            if entries.len() >= self.capacity {
                let victim = entries.get_index(0).map(|(k, _)| k.clone());
                drop(entries);
                if let Some(victim) = victim {
                    self.evict(&victim).await?;
                }
                continue;
            }

            match loaded.take() {
                Some(session) => {
                    entries.insert(chat_id.to_string(), Entry::new(session));
                    let entry = entries.get_mut(chat_id).ok_or_else(|| {
                        DatabotError::SessionStore(format!("session '{}' vanished", chat_id))
                    })?;
                    return Ok(f(entry));
                }
                None => {
                    drop(entries);
                    loaded = Some(self.load_or_new(chat_id).await?);
                }
            }
        }
    }

    async fn load_or_new(&self, chat_id: &str) -> Result<Session> {
        let key = chat_id.to_string();
        let max = self.max_messages;
        match self.blocking(move |store| store.load(&key, max)).await? {
            Some(session) => {
                debug!(chat_id = %chat_id, "Session loaded from store");
                Ok(session)
            }
            None => Ok(Session::with_max_messages(chat_id, self.max_messages)),
        }
    }

    /// Evict `victim`, flushing it first if it has unsaved changes.
    ///
    /// If the flush keeps failing the victim stays resident and the error is
    /// returned.
    async fn evict(&self, victim: &str) -> Result<()> {
        let lock = self.io_lock(victim).await;
        let result = {
            let _guard = lock.lock().await;
            self.evict_locked(victim).await
        };
        drop(lock);
        self.release_io_lock(victim).await;
        result
    }

    async fn evict_locked(&self, victim: &str) -> Result<()> {
        let (session, version) = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get(victim) else {
                return Ok(());
            };
            if !entry.is_dirty() {
                entries.shift_remove(victim);
                debug!(chat_id = %victim, "Evicted least-recently-used session");
                return Ok(());
            }
            (entry.session.clone(), entry.version)
        };

        self.persist_with_retry(session).await?;

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(victim) {
            entry.persisted = entry.persisted.max(version);
            // Mutated during the flush: keep it and let the caller pick again.
            if !entry.is_dirty() {
                entries.shift_remove(victim);
                debug!(chat_id = %victim, "Evicted least-recently-used session");
            }
        }
        Ok(())
    }

    /// Write `chat_id` if dirty. Returns whether a write happened.
    async fn flush_one(&self, chat_id: &str) -> Result<bool> {
        let lock = self.io_lock(chat_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.flush_locked(chat_id).await
        };
        drop(lock);
        self.release_io_lock(chat_id).await;
        result
    }

    async fn flush_locked(&self, chat_id: &str) -> Result<bool> {
        let (session, version) = {
            let entries = self.entries.lock().await;
            match entries.get(chat_id) {
                Some(entry) if entry.is_dirty() => (entry.session.clone(), entry.version),
                _ => return Ok(false),
            }
        };
        self.persist(session).await?;
        if let Some(entry) = self.entries.lock().await.get_mut(chat_id) {
            entry.persisted = entry.persisted.max(version);
        }
        Ok(true)
    }

    async fn persist_with_retry(&self, session: Session) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.persist(session.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < FLUSH_ATTEMPTS => {
                    warn!(
                        chat_id = %session.chat_id,
                        attempt,
                        error = %e,
                        "Session flush failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(
                        chat_id = %session.chat_id,
                        error = %e,
                        "Session flush failed; eviction abandoned"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn persist(&self, session: Session) -> Result<()> {
        self.blocking(move |store| store.save(&session)).await
    }

    async fn io_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.io_locks.lock().await;
        Arc::clone(
            locks
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn release_io_lock(&self, chat_id: &str) {
        let mut locks = self.io_locks.lock().await;
        if locks
            .get(chat_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(chat_id);
        }
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SessionStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DatabotError::SessionStore(format!("store task failed: {}", e)))?
    }
}

/// Move `chat_id` to the most-recently-used end and return it.
fn touch<'a>(entries: &'a mut IndexMap<String, Entry>, chat_id: &str) -> Option<&'a mut Entry> {
    let idx = entries.get_index_of(chat_id)?;
    let last = entries.len() - 1;
    entries.move_index(idx, last);
    entries.get_index_mut(last).map(|(_, entry)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_cache(capacity: usize) -> (SessionCache, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        (SessionCache::new(Arc::clone(&store), capacity, 50), store)
    }

    #[tokio::test]
    async fn test_get_or_create_new_session() {
        let (cache, _) = memory_cache(4);
        let session = cache.get_or_create("c1").await.unwrap();
        assert_eq!(session.chat_id, "c1");
        assert!(session.is_empty());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_and_history() {
        let (cache, _) = memory_cache(4);
        cache.append_message("c1", Role::User, "2+2?").await.unwrap();
        cache
            .append_message("c1", Role::Assistant, "4")
            .await
            .unwrap();
        let history = cache.history("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "4");
    }

    #[tokio::test]
    async fn test_append_trims_to_max_messages() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let cache = SessionCache::new(store, 4, 3);
        for i in 0..5 {
            cache
                .append_message("c1", Role::User, &i.to_string())
                .await
                .unwrap();
        }
        let history = cache.history("c1").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used_and_persists_it() {
        let (cache, store) = memory_cache(2);
        cache.append_message("a", Role::User, "from a").await.unwrap();
        cache.append_message("b", Role::User, "from b").await.unwrap();

        // Touch "a" so that "b" becomes the LRU entry.
        cache.get_or_create("a").await.unwrap();
        cache.get_or_create("c").await.unwrap();

        assert!(cache.is_resident("a").await);
        assert!(!cache.is_resident("b").await);
        assert!(cache.is_resident("c").await);

        let evicted = store.load("b", 50).unwrap().unwrap();
        assert_eq!(evicted.messages[0].content, "from b");
    }

    #[tokio::test]
    async fn test_evicted_session_reloads_with_messages() {
        let (cache, _) = memory_cache(1);
        cache.append_message("a", Role::User, "one").await.unwrap();
        cache
            .append_message("a", Role::Assistant, "two")
            .await
            .unwrap();
        cache.get_or_create("b").await.unwrap();
        assert!(!cache.is_resident("a").await);

        let restored = cache.get_or_create("a").await.unwrap();
        assert_eq!(restored.message_count(), 2);
        assert_eq!(restored.messages[1].content, "two");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_access_order_sequence() {
        let (cache, _) = memory_cache(3);
        for key in ["a", "b", "c"] {
            cache.get_or_create(key).await.unwrap();
        }
        cache.get_or_create("a").await.unwrap();
        cache.get_or_create("d").await.unwrap();
        assert_eq!(cache.resident_keys().await, vec!["c", "a", "d"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (cache, store) = memory_cache(2);
        cache.append_message("c1", Role::User, "x").await.unwrap();
        cache.flush("c1").await.unwrap();
        assert!(store.load("c1", 50).unwrap().is_some());

        cache.delete("c1").await.unwrap();
        cache.delete("c1").await.unwrap();
        assert!(!cache.is_resident("c1").await);
        assert!(store.load("c1", 50).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_all_and_list() {
        let (cache, _) = memory_cache(4);
        cache.append_message("a", Role::User, "1").await.unwrap();
        cache.append_message("b", Role::User, "1").await.unwrap();
        cache.append_message("b", Role::User, "2").await.unwrap();

        let listed = cache.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        let b = listed.iter().find(|m| m.key == "b").unwrap();
        assert_eq!(b.message_count, 2);

        // Nothing left to write.
        assert_eq!(cache.flush_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_metadata_prefers_resident_copy() {
        let (cache, _) = memory_cache(4);
        cache.append_message("a", Role::User, "1").await.unwrap();
        let meta = cache.metadata("a").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 1);
        assert!(cache.metadata("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_does_not_create() {
        let (cache, _) = memory_cache(4);
        assert!(cache.peek("ghost").await.unwrap().is_none());
        assert!(!cache.is_resident("ghost").await);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_victim_resident() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");
        let store = Arc::new(SessionStore::open(&path).unwrap());
        let cache = SessionCache::new(Arc::clone(&store), 1, 50);
        cache.append_message("a", Role::User, "keep me").await.unwrap();

        // Break the table so every write fails.
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("DROP TABLE sessions;").unwrap();
        }

        let err = cache.get_or_create("b").await.unwrap_err();
        assert!(matches!(err, DatabotError::SessionStore(_)));
        assert!(cache.is_resident("a").await);
        assert!(!cache.is_resident("b").await);
        assert_eq!(cache.history("a").await.unwrap()[0].content, "keep me");
    }

    #[tokio::test]
    async fn test_capacity_floor_is_one() {
        let (cache, _) = memory_cache(0);
        assert_eq!(cache.capacity(), 1);
        cache.get_or_create("a").await.unwrap();
        cache.get_or_create("b").await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_eviction_retries_do_not_block_other_chats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");
        let store = Arc::new(SessionStore::open(&path).unwrap());
        let cache = Arc::new(SessionCache::new(Arc::clone(&store), 2, 50));
        cache.append_message("a", Role::User, "oldest").await.unwrap();
        cache.append_message("b", Role::User, "busy chat").await.unwrap();
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("DROP TABLE sessions;").unwrap();
        }

        // Evicting "a" fails three times with backoff in between.
        let evicting = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_create("c").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let history = cache.history("b").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(60));
        assert_eq!(history[0].content, "busy chat");

        let err = evicting.await.unwrap().unwrap_err();
        assert!(matches!(err, DatabotError::SessionStore(_)));
        assert!(cache.is_resident("a").await);
    }

    #[tokio::test]
    async fn test_append_during_flush_stays_dirty() {
        let (cache, store) = memory_cache(4);
        cache.append_message("c1", Role::User, "one").await.unwrap();
        cache.flush("c1").await.unwrap();
        cache.append_message("c1", Role::Assistant, "two").await.unwrap();

        assert_eq!(cache.flush_all().await.unwrap(), 1);
        assert_eq!(store.load("c1", 50).unwrap().unwrap().message_count(), 2);
        assert_eq!(cache.flush_all().await.unwrap(), 0);
    }
}
