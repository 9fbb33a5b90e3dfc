//! Infrastructure layer
//!
//! Implementations for external systems: durable document stores, the
//! in-memory vector index and retry handling for durable calls.

pub mod knowledge;
pub mod retry;
pub mod vector;
