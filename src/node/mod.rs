//! Storage Node
//!
//! One node of the distributed store: an in-memory key-value map with TTL
//! support, backed by a write-ahead log.
//!
//! ## Core Concepts
//! - **Durability**: every mutation is appended to the WAL and synced to
//!   stable storage before the in-memory map changes; a crash between the two
//!   can lose nothing that was acknowledged.
//! - **Recovery**: at boot the WAL is replayed in file order, skipping
//!   records that are undecodable or already expired, before the node serves
//!   its first request.
//! - **Expiry**: reads filter expired entries; a background reaper bounds
//!   memory by removing them on a fixed cadence.
//! - **Access**: the map and the WAL handle sit behind one reader-writer
//!   lock, so mutations to the same key are linearizable on the node.

pub mod handlers;
pub mod protocol;
pub mod service;
pub mod store;
pub mod wal;

pub use service::StorageNode;
