//! Adapters for external collaborators consumed by the governance core.
//!
//! The coordination key-value store is the only collaborator the core talks
//! to through a trait of its own; the durable store is reached through the
//! per-crate store traits built directly on sqlx.

pub mod coordination;

pub use coordination::{CoordinationStore, MemoryCoordination, RedisCoordination};
