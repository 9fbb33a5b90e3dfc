//! Storage layer
//!
//! SQLite database holding the `graph_nodes` and `graph_edges` collections
//! behind [`SqliteDocumentStore`](crate::infrastructure::knowledge::SqliteDocumentStore).
//!
//! ```ignore
//! let db = Database::new(DatabaseConfig::with_path("lore.db")).await?;
//! let documents = SqliteDocumentStore::new(db.pool().clone());
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
