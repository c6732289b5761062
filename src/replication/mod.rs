//! Replication Coordinator
//!
//! Receives mutation descriptors from the gateway and pushes them to the
//! replica nodes for a key.
//!
//! ## Core Concepts
//! - **Eventual mode**: tasks enter a bounded FIFO queue and are drained by
//!   a fixed worker pool. A full queue rejects immediately; that rejection
//!   is the system's backpressure signal. Partial failures retry with a
//!   growing delay, up to a fixed attempt budget.
//! - **Strong mode**: no queue. The coordinator fans out to every replica
//!   concurrently and answers as soon as a majority acknowledges; stragglers
//!   finish in the background and only metrics see them.
//! - **Idempotence**: SET and DELETE are idempotent on the nodes, so a
//!   retry re-replicates to all replicas rather than tracking which ones
//!   failed.

pub mod coordinator;
pub mod handlers;
pub mod protocol;

pub use coordinator::Coordinator;

#[cfg(test)]
mod tests;
