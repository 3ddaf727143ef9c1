//! Database schema definitions.
//!
//! Three append-only tables. Timestamps are Unix milliseconds assigned by the
//! writer; every table carries a `ts` index used by the expiry pass.

use sqlx::SqlitePool;

use crate::storage::StorageError;

/// Per-network aggregate snapshots.
pub const NETWORK_SNAPSHOTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS network_snapshots (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    network              TEXT    NOT NULL,
    ts                   INTEGER NOT NULL,
    cycle_id             TEXT    NOT NULL,
    total_pods           INTEGER NOT NULL,
    sampled_pods         INTEGER NOT NULL,
    online_pods          INTEGER NOT NULL,
    offline_pods         INTEGER NOT NULL,
    total_storage        INTEGER NOT NULL,
    avg_cpu              REAL    NOT NULL,
    avg_ram              REAL    NOT NULL,
    total_streams        INTEGER NOT NULL,
    total_bytes          INTEGER NOT NULL,
    version_distribution TEXT    NOT NULL DEFAULT '{}',
    estimate             INTEGER NOT NULL DEFAULT 0
)
"#;

/// Per-node rows, flattened from `NodeStats`.
pub const NODE_HISTORY_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS node_history (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    network          TEXT    NOT NULL,
    address          TEXT    NOT NULL,
    pubkey           TEXT,
    ts               INTEGER NOT NULL,
    cycle_id         TEXT    NOT NULL,
    status           TEXT    NOT NULL,
    version          TEXT,
    cpu_percent      REAL,
    ram_used         INTEGER,
    ram_total        INTEGER,
    ram_percent      REAL,
    file_size        INTEGER,
    uptime_seconds   INTEGER,
    active_streams   INTEGER,
    packets_received INTEGER,
    packets_sent     INTEGER,
    total_bytes      INTEGER,
    peers_count      INTEGER,
    error            TEXT
)
"#;

/// Periodic full registry listings (pods stored as JSON).
pub const REGISTRY_SNAPSHOTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS registry_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    network     TEXT    NOT NULL,
    ts          INTEGER NOT NULL,
    total_count INTEGER NOT NULL,
    pods        TEXT    NOT NULL
)
"#;

const INDEX_DDL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_network_snapshots_network_ts ON network_snapshots (network, ts DESC)",
    "CREATE INDEX IF NOT EXISTS idx_network_snapshots_ts ON network_snapshots (ts)",
    "CREATE INDEX IF NOT EXISTS idx_node_history_address_ts ON node_history (address, ts DESC)",
    "CREATE INDEX IF NOT EXISTS idx_node_history_ts ON node_history (ts)",
    "CREATE INDEX IF NOT EXISTS idx_registry_snapshots_network_ts ON registry_snapshots (network, ts DESC)",
    "CREATE INDEX IF NOT EXISTS idx_registry_snapshots_ts ON registry_snapshots (ts)",
];

/// Create all tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for ddl in [NETWORK_SNAPSHOTS_DDL, NODE_HISTORY_DDL, REGISTRY_SNAPSHOTS_DDL] {
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in INDEX_DDL {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db;

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let pool = db::SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(pool.inner()).await.unwrap();
        init_schema(pool.inner()).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool.inner())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec!["network_snapshots", "node_history", "registry_snapshots"]
        );

        let (indexes,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
        )
        .fetch_one(pool.inner())
        .await
        .unwrap();
        assert_eq!(indexes, 6);
    }
}
