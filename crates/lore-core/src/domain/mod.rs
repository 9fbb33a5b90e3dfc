//! Domain layer
//!
//! Contains the core retrieval logic and domain models.

pub mod cache;
pub mod event;
pub mod knowledge;
pub mod search;
pub mod similarity;
