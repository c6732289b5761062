use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A key-value entry with expiry metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    /// Content type presented at write time; reads fall back to
    /// `application/octet-stream` when none was stored.
    pub content_type: Option<String>,
    /// Absolute expiry deadline; `None` means the entry never expires.
    pub expires_at: Option<SystemTime>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Entry {
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Time left until expiry, saturating at zero. `None` for entries
    /// without a TTL.
    pub fn remaining_ttl(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at
            .map(|at| at.duration_since(now).unwrap_or_default())
    }
}

/// In-memory key-value map with TTL filtering.
///
/// `Store` is a plain data structure; locking and WAL ordering are the
/// responsibility of [`super::service::StorageNode`].
pub struct Store {
    data: HashMap<String, Entry>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Stores a value, overwriting any previous entry for the key.
    pub fn set(
        &mut self,
        key: &str,
        value: Vec<u8>,
        content_type: Option<String>,
        ttl: Option<Duration>,
    ) {
        self.set_at(key, value, content_type, ttl, SystemTime::now());
    }

    /// Stores a value as of an explicit timestamp; the expiry deadline is
    /// `timestamp + ttl`. Used by WAL recovery so replayed entries keep
    /// their original deadlines.
    pub fn set_at(
        &mut self,
        key: &str,
        value: Vec<u8>,
        content_type: Option<String>,
        ttl: Option<Duration>,
        timestamp: SystemTime,
    ) {
        let entry = Entry {
            key: key.to_string(),
            value,
            content_type,
            expires_at: ttl.map(|ttl| timestamp + ttl),
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.data.insert(key.to_string(), entry);
    }

    /// Looks up a live entry. An entry whose deadline has passed behaves as
    /// absent; its removal is left to the reaper.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        let entry = self.data.get(key)?;
        if entry.is_expired_at(SystemTime::now()) {
            return None;
        }
        Some(entry)
    }

    /// Removes an entry. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Number of live (non-expired) entries.
    pub fn key_count(&self) -> usize {
        let now = SystemTime::now();
        self.data
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = SystemTime::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired_at(now));
        before - self.data.len()
    }

    /// Snapshot of all live entries, for WAL compaction.
    pub fn live_entries(&self) -> Vec<Entry> {
        let now = SystemTime::now();
        self.data
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
            .collect()
    }
}
