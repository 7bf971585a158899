//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration is a SQL batch that
//! transforms the schema from version N to N+1.

use rusqlite::Connection;

use chronicle_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Audit events: one row per sealed event, never updated
        CREATE TABLE audit_events (
            event_id TEXT PRIMARY KEY,        -- UUID, hyphenated lowercase
            chain_id BLOB NOT NULL,           -- 32 bytes, derived from the chain key
            sequence INTEGER NOT NULL,        -- 0-based position within the chain
            organization_id TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            request_id TEXT NOT NULL,
            user_id TEXT,                     -- NULL for system-initiated events
            session_id TEXT,
            ip_address TEXT,
            user_agent TEXT,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            resource_id TEXT,
            resource_type TEXT,
            timestamp INTEGER NOT NULL,       -- Unix ms
            before_data TEXT,                 -- canonical JSON
            before_hash TEXT,                 -- hex SHA-256 of before_data
            after_data TEXT,
            after_hash TEXT,
            previous_hash TEXT,               -- hex, NULL for the first event
            integrity_hash TEXT NOT NULL,     -- hex
            severity TEXT NOT NULL,
            tags BLOB NOT NULL,               -- CBOR array of strings
            metadata BLOB NOT NULL,           -- CBOR map
            ingested_at INTEGER NOT NULL,     -- local time of the write

            UNIQUE(chain_id, sequence)
        );

        -- Chain registry, one row per chain key
        CREATE TABLE chains (
            chain_id BLOB PRIMARY KEY,
            organization_id TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_events_org_time ON audit_events(organization_id, timestamp);
        CREATE INDEX idx_events_chain_time ON audit_events(chain_id, timestamp, sequence);
        CREATE INDEX idx_chains_org ON chains(organization_id);
        "#,
    )?;

    Ok(())
}

/// Migration v2: enforce append-only at the database level.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TRIGGER audit_events_no_update
        BEFORE UPDATE ON audit_events
        BEGIN
            SELECT RAISE(ABORT, 'audit_events is append-only');
        END;

        CREATE TRIGGER audit_events_no_delete
        BEFORE DELETE ON audit_events
        BEGIN
            SELECT RAISE(ABORT, 'audit_events is append-only');
        END;
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables = names(&conn, "table");
        assert!(tables.contains(&"audit_events".to_string()));
        assert!(tables.contains(&"chains".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));

        let triggers = names(&conn, "trigger");
        assert!(triggers.contains(&"audit_events_no_update".to_string()));
        assert!(triggers.contains(&"audit_events_no_delete".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
