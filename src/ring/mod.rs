//! Consistent-Hash Routing
//!
//! Maps every key to an ordered list of responsible storage nodes. Each
//! physical node contributes a fixed number of virtual points on a 64-bit
//! ring; a key is owned by the first point at or after its hash, walking
//! clockwise with wrap-around.
//!
//! ## Mechanism
//! - **Hashing**: keys and virtual points are hashed with XxHash64, which is
//!   deterministic across processes. The hash choice is part of the wire
//!   contract: every gateway must compute the same replica set for a key.
//! - **Placement**: `locate(key, k)` returns the first `min(k, |nodes|)`
//!   distinct physical nodes encountered on the clockwise walk. Index 0 is
//!   the primary, the rest are replicas.
//! - **Mutation**: add/remove rebuild an immutable snapshot and swap it in,
//!   so readers always observe a consistent ring and never block mid-walk.

pub mod hashring;

pub use hashring::{HashRing, DEFAULT_REPLICAS, VIRTUAL_POINTS};
