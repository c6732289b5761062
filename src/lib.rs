//! Distributed Key-Value Store
//!
//! This library crate defines the core modules that make up the distributed
//! system. It serves as the foundation for the binary executable (`main.rs`),
//! which runs one of the three services per process.
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`ring`**: The routing layer. A consistent-hash ring maps every key to
//!   an ordered list of responsible storage nodes (primary + replicas).
//! - **`node`**: The storage layer. Each node owns an in-memory key-value map
//!   with TTL support, backed by a write-ahead log that is synced before any
//!   mutation is acknowledged and replayed at boot for crash recovery.
//! - **`replication`**: The replication coordinator. Queues eventual-mode
//!   replication tasks for background workers with bounded retries, and runs
//!   the synchronous majority-quorum path for strong-mode writes.
//! - **`gateway`**: The public API. Authenticates tenants via an identity
//!   provider, admits requests through per-tenant token buckets, routes
//!   operations through the ring, and orchestrates primary writes plus
//!   replication fan-out.

pub mod config;
pub mod error;
pub mod gateway;
pub mod node;
pub mod replication;
pub mod ring;
