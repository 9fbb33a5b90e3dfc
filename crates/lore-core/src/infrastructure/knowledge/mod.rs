//! Knowledge graph document store implementations

mod memory;
mod repository;

pub use memory::InMemoryDocumentStore;
pub use repository::SqliteDocumentStore;
