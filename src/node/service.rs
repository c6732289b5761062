use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::store::{Entry, Store};
use super::wal::{Wal, WalOp, WalRecord};

/// Cadence of the background sweep removing expired entries. The read path
/// already filters them, so the reaper only bounds memory.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// A single storage node: the in-memory map plus its WAL.
///
/// Both live behind one reader-writer lock. Mutations take the write lock,
/// append-and-sync the WAL, and only then touch the map, so a later SET or
/// DELETE on a key always observes earlier ones and an acknowledged write is
/// always recoverable. Reads share the lock and never touch the WAL.
pub struct StorageNode {
    pub node_id: String,
    inner: RwLock<NodeInner>,
}

struct NodeInner {
    store: Store,
    wal: Wal,
}

/// Point-in-time counters for the metrics endpoint.
pub struct NodeStats {
    pub key_count: usize,
    pub wal_size_bytes: u64,
}

impl StorageNode {
    /// Opens the node's WAL under `data_dir`, replays it into a fresh map,
    /// and returns the node ready to serve. Replay filters entries that are
    /// already expired as of the current wall clock and skips corrupted
    /// records. A WAL that cannot be opened is fatal.
    pub fn open(node_id: &str, data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join(format!("{}-wal.log", node_id));

        let replay = Wal::replay(&wal_path)?;
        let mut store = Store::new();
        let now = SystemTime::now();
        let mut restored = 0usize;

        for record in replay.records {
            match record.op {
                WalOp::Set => {
                    let ttl = record.ttl();
                    let timestamp = record.timestamp();
                    if ttl.map(|ttl| timestamp + ttl <= now).unwrap_or(false) {
                        continue;
                    }
                    store.set_at(&record.key, record.value, record.content_type, ttl, timestamp);
                    restored += 1;
                }
                WalOp::Delete => {
                    store.delete(&record.key);
                }
            }
        }

        if replay.corrupt_records > 0 {
            tracing::warn!(
                node_id = %node_id,
                corrupt_records = replay.corrupt_records,
                "skipped corrupted WAL records during recovery"
            );
        }
        tracing::info!(node_id = %node_id, restored, "restored entries from WAL");

        let wal = Wal::open(&wal_path)?;

        Ok(Arc::new(Self {
            node_id: node_id.to_string(),
            inner: RwLock::new(NodeInner { store, wal }),
        }))
    }

    /// Stores a value. The WAL record is synced before the map changes; an
    /// append failure fails the whole operation and leaves the map intact.
    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        content_type: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = WalRecord::set(key, value, content_type, ttl);
        inner.wal.append(&record)?;
        inner.store.set(key, record.value, record.content_type, ttl);
        Ok(())
    }

    /// Looks up a live entry. Expired entries behave as absent.
    pub async fn get(&self, key: &str) -> Option<Entry> {
        self.inner.read().await.store.get(key).cloned()
    }

    /// Deletes a key. The delete is logged even when the key is absent, so
    /// recovery replays it against whatever state the log rebuilds. Returns
    /// whether the key was present.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.wal.append(&WalRecord::delete(key))?;
        Ok(inner.store.delete(key))
    }

    pub async fn stats(&self) -> NodeStats {
        let inner = self.inner.read().await;
        NodeStats {
            key_count: inner.store.key_count(),
            wal_size_bytes: inner.wal.size(),
        }
    }

    /// Rewrites the WAL from the current live entries. Holding the write
    /// lock serializes compaction against mutations.
    pub async fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let live = inner.store.live_entries();
        inner.wal.compact(&live)?;
        tracing::info!(node_id = %self.node_id, entries = live.len(), "compacted WAL");
        Ok(())
    }

    /// Starts the background reaper that removes expired entries.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                interval.tick().await;
                let removed = {
                    let mut inner = node.inner.write().await;
                    inner.store.purge_expired()
                };
                if removed > 0 {
                    tracing::debug!(
                        node_id = %node.node_id,
                        removed,
                        "reaped expired entries"
                    );
                }
            }
        })
    }
}
