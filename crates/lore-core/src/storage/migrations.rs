//! Schema migrations
//!
//! Versioned SQLite schema for the knowledge graph collections. Each
//! migration runs in its own transaction together with its bookkeeping row,
//! so a failed migration leaves the schema at the previous version.

use sqlx::SqlitePool;
use tracing::{debug, info};

struct Migration {
    version: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "graph node and edge collections",
        sql: r#"
            CREATE TABLE IF NOT EXISTS graph_nodes (
                id TEXT PRIMARY KEY NOT NULL,
                node_type TEXT NOT NULL
                    CHECK (node_type IN ('pattern', 'agent', 'technology', 'concept', 'category')),
                label TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS graph_edges (
                id TEXT PRIMARY KEY NOT NULL,
                source TEXT NOT NULL REFERENCES graph_nodes(id),
                target TEXT NOT NULL REFERENCES graph_nodes(id),
                relationship TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0 CHECK (weight BETWEEN 0.0 AND 1.0),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (source, target, relationship)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "node type, label and edge endpoint indexes",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_graph_nodes_type ON graph_nodes(node_type);
            CREATE INDEX IF NOT EXISTS idx_graph_nodes_label ON graph_nodes(label);
            CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source);
            CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target);
        "#,
    },
];

/// Schema version this build expects
pub const CURRENT_VERSION: i32 = 2;

const CREATE_SCHEMA_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        description TEXT NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Where the schema stands relative to this build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
    /// Versions not yet applied, in order
    pub pending: Vec<i32>,
}

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_SCHEMA_TABLE).execute(pool).await?;

    // MAX over an empty table is NULL
    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded schema version
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current = applied_version(pool).await?;
    if current >= CURRENT_VERSION {
        debug!(version = current, "Schema is up to date");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "Applying schema migration"
        );

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    info!(from = current, to = CURRENT_VERSION, "Schema migrated");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = applied_version(pool).await?;
    let pending: Vec<i32> = MIGRATIONS
        .iter()
        .map(|m| m.version)
        .filter(|v| *v > current_version)
        .collect();

    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: !pending.is_empty(),
        pending,
    })
}
