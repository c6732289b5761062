use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, RwLock};

use twox_hash::XxHash64;

/// Virtual points contributed by each physical node, to smooth distribution.
pub const VIRTUAL_POINTS: usize = 150;

/// Default replication fanout: one primary plus two replicas.
pub const DEFAULT_REPLICAS: usize = 3;

/// Immutable view of the ring at one point in time.
///
/// Mutations build a fresh `RingState` and swap the `Arc`; `locate` walks a
/// snapshot, so a concurrent add/remove can never produce a half-updated
/// replica set.
struct RingState {
    /// Physical node base URLs, in insertion order.
    nodes: Vec<String>,
    /// Virtual point hashes, strictly sorted for binary search.
    sorted_hashes: Vec<u64>,
    /// Virtual point hash -> owning physical node.
    points: HashMap<u64, String>,
}

impl RingState {
    fn build(nodes: Vec<String>) -> Self {
        let mut points: HashMap<u64, String> = HashMap::new();

        for node in &nodes {
            for i in 0..VIRTUAL_POINTS {
                let hash = hash_key(&format!("{}:{}", node, i));
                // Collisions are vanishingly rare on a 64-bit ring; when
                // they happen the lexicographically smaller node keeps the
                // point so every process resolves it identically.
                let claim = match points.get(&hash) {
                    Some(existing) => node.as_str() < existing.as_str(),
                    None => true,
                };
                if claim {
                    points.insert(hash, node.clone());
                }
            }
        }

        let mut sorted_hashes: Vec<u64> = points.keys().copied().collect();
        sorted_hashes.sort_unstable();

        Self {
            nodes,
            sorted_hashes,
            points,
        }
    }
}

/// Consistent-hash ring over the cluster's storage nodes.
pub struct HashRing {
    state: RwLock<Arc<RingState>>,
}

impl HashRing {
    /// Builds a ring from the static node list, inserting `VIRTUAL_POINTS`
    /// virtual points per node.
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            state: RwLock::new(Arc::new(RingState::build(nodes))),
        }
    }

    fn snapshot(&self) -> Arc<RingState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the first `min(k, |nodes|)` distinct physical nodes clockwise
    /// from the key's hash. Index 0 is the primary for the key.
    pub fn locate(&self, key: &str, k: usize) -> Vec<String> {
        let state = self.snapshot();
        let wanted = k.min(state.nodes.len());
        if wanted == 0 || state.sorted_hashes.is_empty() {
            return Vec::new();
        }

        let key_hash = hash_key(key);
        let start = state
            .sorted_hashes
            .partition_point(|&hash| hash < key_hash);

        let mut result: Vec<String> = Vec::with_capacity(wanted);
        for offset in 0..state.sorted_hashes.len() {
            let idx = (start + offset) % state.sorted_hashes.len();
            let node = &state.points[&state.sorted_hashes[idx]];
            if !result.iter().any(|seen| seen == node) {
                result.push(node.clone());
                if result.len() == wanted {
                    break;
                }
            }
        }

        result
    }

    /// Returns the single node responsible for the key, if the ring has any.
    pub fn primary(&self, key: &str) -> Option<String> {
        self.locate(key, 1).into_iter().next()
    }

    /// Adds a node and its virtual points. Idempotent; visible atomically to
    /// subsequent `locate` calls.
    pub fn add_node(&self, node: &str) {
        let mut guard = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.nodes.iter().any(|existing| existing == node) {
            return;
        }
        let mut nodes = guard.nodes.clone();
        nodes.push(node.to_string());
        *guard = Arc::new(RingState::build(nodes));
    }

    /// Removes a node and its virtual points. Idempotent.
    pub fn remove_node(&self, node: &str) {
        let mut guard = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.nodes.iter().any(|existing| existing == node) {
            return;
        }
        let nodes = guard
            .nodes
            .iter()
            .filter(|existing| existing.as_str() != node)
            .cloned()
            .collect();
        *guard = Arc::new(RingState::build(nodes));
    }

    /// Snapshot of the current physical node set.
    pub fn all_nodes(&self) -> Vec<String> {
        self.snapshot().nodes.clone()
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key.as_bytes());
    hasher.finish()
}
