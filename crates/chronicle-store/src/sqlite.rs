//! SQLite implementation of the LedgerStore trait.
//!
//! This is the primary storage backend for Chronicle. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use chronicle_core::{
    now_millis, AuditEvent, ChainId, ChainKey, ChainTail, EventId, Sha256Hash, Snapshot,
};

use crate::error::{exhausted, Result, StoreError};
use crate::migration;
use crate::query::{ChainCursor, ChainPage, EventFilter, Page, PageRequest, TimeRange};
use crate::traits::{AppendResult, LedgerStore};

/// How long a writer waits for another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_COLUMNS: &str = "event_id, sequence, organization_id, correlation_id, event_type,
    request_id, user_id, session_id, ip_address, user_agent, action, resource, resource_id,
    resource_type, timestamp, before_data, before_hash, after_data, after_hash, previous_hash,
    integrity_hash, severity, tags, metadata";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime. Appends run in an immediate
/// transaction, so the tail precondition also holds against writers in
/// other processes sharing the same database file.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "opened sqlite ledger");
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(StoreError::poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row Conversion
// ─────────────────────────────────────────────────────────────────────────────

fn invalid(column: &str, err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(StoreError::InvalidData(format!("{column}: {err}"))),
    )
}

fn parse_hash(column: &str, hex: &str) -> rusqlite::Result<Sha256Hash> {
    Sha256Hash::from_hex(hex).map_err(|e| invalid(column, e))
}

fn parse_snapshot(
    side: &str,
    data: Option<String>,
    hash: Option<String>,
) -> rusqlite::Result<Option<Snapshot>> {
    match (data, hash) {
        (Some(canonical), Some(hash)) => Ok(Some(Snapshot::from_parts(
            canonical,
            parse_hash(side, &hash)?,
        ))),
        (None, None) => Ok(None),
        _ => Err(invalid(side, "snapshot data and hash must both be present")),
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let id: String = row.get("event_id")?;
    let event_type: String = row.get("event_type")?;
    let severity: String = row.get("severity")?;
    let previous_hash: Option<String> = row.get("previous_hash")?;
    let integrity_hash: String = row.get("integrity_hash")?;
    let tags: Vec<u8> = row.get("tags")?;
    let metadata: Vec<u8> = row.get("metadata")?;

    Ok(AuditEvent {
        id: id.parse().map_err(|e| invalid("event_id", e))?,
        organization_id: row.get("organization_id")?,
        user_id: row.get("user_id")?,
        correlation_id: row.get("correlation_id")?,
        request_id: row.get("request_id")?,
        session_id: row.get("session_id")?,
        ip_address: row.get("ip_address")?,
        user_agent: row.get("user_agent")?,
        event_type: event_type.parse().map_err(|e| invalid("event_type", e))?,
        action: row.get("action")?,
        resource: row.get("resource")?,
        resource_id: row.get("resource_id")?,
        resource_type: row.get("resource_type")?,
        sequence: row.get::<_, i64>("sequence")? as u64,
        timestamp: row.get("timestamp")?,
        before: parse_snapshot("before", row.get("before_data")?, row.get("before_hash")?)?,
        after: parse_snapshot("after", row.get("after_data")?, row.get("after_hash")?)?,
        previous_hash: previous_hash
            .map(|h| parse_hash("previous_hash", &h))
            .transpose()?,
        integrity_hash: parse_hash("integrity_hash", &integrity_hash)?,
        severity: severity.parse().map_err(|e| invalid("severity", e))?,
        tags: ciborium::from_reader(&tags[..]).map_err(|e| invalid("tags", e))?,
        metadata: ciborium::from_reader(&metadata[..]).map_err(|e| invalid("metadata", e))?,
    })
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn latest_tail(conn: &Connection, chain: &ChainId) -> Result<Option<ChainTail>> {
    let row = conn
        .query_row(
            "SELECT sequence, integrity_hash, timestamp FROM audit_events
             WHERE chain_id = ?1
             ORDER BY timestamp DESC, sequence DESC LIMIT 1",
            params![chain.as_bytes().as_slice()],
            |row| {
                let hash: String = row.get(1)?;
                Ok(ChainTail {
                    sequence: row.get::<_, i64>(0)? as u64,
                    integrity_hash: parse_hash("integrity_hash", &hash)?,
                    timestamp: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn insert_event(conn: &Connection, event: &AuditEvent, chain: &ChainId) -> rusqlite::Result<usize> {
    let tags = encode_cbor(&event.tags).map_err(|e| invalid("tags", e))?;
    let metadata = encode_cbor(&event.metadata).map_err(|e| invalid("metadata", e))?;

    conn.execute(
        "INSERT INTO audit_events (
            event_id, chain_id, sequence, organization_id, correlation_id, event_type,
            request_id, user_id, session_id, ip_address, user_agent, action, resource,
            resource_id, resource_type, timestamp, before_data, before_hash, after_data,
            after_hash, previous_hash, integrity_hash, severity, tags, metadata, ingested_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
        params![
            event.id.to_hyphenated(),
            chain.as_bytes().as_slice(),
            event.sequence as i64,
            event.organization_id,
            event.correlation_id,
            event.event_type.as_str(),
            event.request_id,
            event.user_id,
            event.session_id,
            event.ip_address,
            event.user_agent,
            event.action,
            event.resource,
            event.resource_id,
            event.resource_type,
            event.timestamp,
            event.before.as_ref().map(|s| s.canonical.as_str()),
            event.before.as_ref().map(|s| s.hash.to_hex()),
            event.after.as_ref().map(|s| s.canonical.as_str()),
            event.after.as_ref().map(|s| s.hash.to_hex()),
            event.previous_hash.map(|h| h.to_hex()),
            event.integrity_hash.to_hex(),
            event.severity.as_str(),
            tags,
            metadata,
            now_millis(),
        ],
    )
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Build the WHERE clause and parameters for an organization query.
fn filter_clause(organization_id: &str, filter: &EventFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["organization_id = ?".to_string()];
    let mut params = vec![SqlValue::Text(organization_id.to_string())];

    fn any_of(column: &str, values: Vec<SqlValue>, clauses: &mut Vec<String>, params: &mut Vec<SqlValue>) {
        if values.is_empty() {
            return;
        }
        let marks = vec!["?"; values.len()].join(", ");
        clauses.push(format!("{column} IN ({marks})"));
        params.extend(values);
    }

    any_of(
        "COALESCE(user_id, 'system')",
        filter.user_ids.iter().cloned().map(SqlValue::Text).collect(),
        &mut clauses,
        &mut params,
    );
    any_of(
        "event_type",
        filter
            .event_types
            .iter()
            .map(|t| SqlValue::Text(t.as_str().to_string()))
            .collect(),
        &mut clauses,
        &mut params,
    );
    any_of(
        "severity",
        filter
            .severities
            .iter()
            .map(|s| SqlValue::Text(s.as_str().to_string()))
            .collect(),
        &mut clauses,
        &mut params,
    );
    any_of(
        "resource_type",
        filter.resource_types.iter().cloned().map(SqlValue::Text).collect(),
        &mut clauses,
        &mut params,
    );

    if let Some(start) = filter.time_range.start {
        clauses.push("timestamp >= ?".into());
        params.push(SqlValue::Integer(start));
    }
    if let Some(end) = filter.time_range.end {
        clauses.push("timestamp <= ?".into());
        params.push(SqlValue::Integer(end));
    }

    if let Some(cursor) = &filter.before {
        clauses.push("(timestamp, sequence, event_id) < (?, ?, ?)".into());
        params.push(SqlValue::Integer(cursor.timestamp));
        params.push(SqlValue::Integer(cursor.sequence as i64));
        params.push(SqlValue::Text(cursor.id.to_hyphenated()));
    }

    if let Some(needle) = filter.text_needle() {
        // LIKE is ASCII case-insensitive, matching EventFilter::matches.
        let pattern = format!("%{}%", escape_like(&needle));
        let columns = [
            "action",
            "resource",
            "COALESCE(resource_id, '')",
            "COALESCE(resource_type, '')",
            "COALESCE(user_id, 'system')",
        ];
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} LIKE ? ESCAPE '\\'"))
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            params.push(SqlValue::Text(pattern.clone()));
        }
    }

    (clauses.join(" AND "), params)
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, event: &AuditEvent) -> Result<AppendResult> {
        let event = event.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM audit_events WHERE event_id = ?1",
                    params![event.id.to_hyphenated()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Ok(AppendResult::Duplicate);
            }

            let key = event.chain_key();
            let chain = key.id();
            let current = latest_tail(&tx, &chain)?;

            let expected_sequence = match current {
                Some(tail) => tail.next_sequence().ok_or_else(|| exhausted(&key, &tail))?,
                None => 0,
            };
            let expected_previous = current.map(|t| t.integrity_hash);
            if event.sequence != expected_sequence || event.previous_hash != expected_previous {
                return Ok(AppendResult::StaleTail { current });
            }

            tx.execute(
                "INSERT OR IGNORE INTO chains
                    (chain_id, organization_id, correlation_id, event_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chain.as_bytes().as_slice(),
                    key.organization_id,
                    key.correlation_id,
                    key.event_type.as_str(),
                    now_millis(),
                ],
            )?;

            match insert_event(&tx, &event, &chain) {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    let current = latest_tail(&tx, &chain)?;
                    return Ok(AppendResult::StaleTail { current });
                }
                Err(e) => return Err(e.into()),
            }

            tx.commit()?;
            Ok(AppendResult::Appended)
        })
        .await
    }

    async fn latest(&self, chain: &ChainId) -> Result<Option<AuditEvent>> {
        let chain = *chain;
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM audit_events
                     WHERE chain_id = ?1
                     ORDER BY timestamp DESC, sequence DESC LIMIT 1"
                ),
                params![chain.as_bytes().as_slice()],
                row_to_event,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn query_chain(
        &self,
        chain: &ChainId,
        range: TimeRange,
        cursor: ChainCursor,
        limit: u32,
    ) -> Result<ChainPage> {
        // Start applies no sequence bound so that rows with out-of-range
        // sequences still reach the verifier.
        let first = match cursor {
            ChainCursor::Start => None,
            ChainCursor::After(_) => match cursor.first_sequence().map(i64::try_from) {
                Some(Ok(first)) => Some(first),
                _ => return Ok(ChainPage::from_events(Vec::new(), limit)),
            },
        };
        let chain = *chain;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM audit_events
                 WHERE chain_id = ?1 AND (?2 IS NULL OR sequence >= ?2)
                   AND (?3 IS NULL OR timestamp >= ?3)
                   AND (?4 IS NULL OR timestamp <= ?4)
                 ORDER BY timestamp ASC, sequence ASC
                 LIMIT ?5"
            ))?;
            let events = stmt
                .query_map(
                    params![
                        chain.as_bytes().as_slice(),
                        first,
                        range.start,
                        range.end,
                        i64::from(limit),
                    ],
                    row_to_event,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ChainPage::from_events(events, limit))
        })
        .await
    }

    async fn count_chain(&self, chain: &ChainId) -> Result<u64> {
        let chain = *chain;
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_events WHERE chain_id = ?1",
                params![chain.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>> {
        let id = *id;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM audit_events WHERE event_id = ?1"),
                params![id.to_hyphenated()],
                row_to_event,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn query_events(
        &self,
        organization_id: &str,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEvent>> {
        let (clause, params) = filter_clause(organization_id, filter);
        let limit = page.effective_limit();

        self.blocking(move |conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM audit_events WHERE {clause}"),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM audit_events WHERE {clause}
                 ORDER BY timestamp DESC, sequence DESC, event_id DESC
                 LIMIT {limit} OFFSET {offset}",
                offset = page.offset,
            ))?;
            let items = stmt
                .query_map(params_from_iter(params.iter()), row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page {
                items,
                total: total as u64,
                offset: page.offset,
                limit,
            })
        })
        .await
    }

    async fn list_chains(&self, organization_id: &str) -> Result<Vec<ChainKey>> {
        let organization_id = organization_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT organization_id, correlation_id, event_type FROM chains
                 WHERE organization_id = ?1",
            )?;
            let mut keys = stmt
                .query_map(params![organization_id], |row| {
                    let event_type: String = row.get(2)?;
                    Ok(ChainKey::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        event_type.parse().map_err(|e| invalid("event_type", e))?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            keys.sort();
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::EventCursor;
    use crate::traits::LedgerStoreExt;
    use chronicle_core::{EventBuilder, EventType, Severity};
    use serde_json::json;

    fn key() -> ChainKey {
        ChainKey::new("org-1", "req-1", EventType::RoleChange)
    }

    fn build(key: &ChainKey, tail: Option<&ChainTail>, ts: i64) -> AuditEvent {
        EventBuilder::new(key.clone(), "req-1", "update", "member")
            .user(Some("user-1".into()))
            .resource_id(Some("m-1".into()))
            .resource_type(Some("membership".into()))
            .before(Some(&json!({"role": "member"})))
            .after(Some(&json!({"role": "admin", "n": 1.5})))
            .tags(vec!["rbac".into()])
            .metadata(json!({"source": "console", "attempt": 2}))
            .timestamp(ts)
            .follows(tail)
            .seal()
            .unwrap()
    }

    async fn append_n(store: &SqliteStore, key: &ChainKey, n: usize) -> Vec<AuditEvent> {
        let mut events: Vec<AuditEvent> = Vec::new();
        for i in 0..n {
            let tail = events.last().map(|e| e.as_tail());
            let event = build(key, tail.as_ref(), 1_000 + i as i64);
            assert_eq!(store.append(&event).await.unwrap(), AppendResult::Appended);
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_event_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let events = append_n(&store, &key(), 1).await;

        let stored = store.get_event(&events[0].id).await.unwrap().unwrap();
        assert_eq!(stored, events[0]);
        assert!(stored.verify_integrity());
    }

    #[tokio::test]
    async fn test_system_event_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let event = EventBuilder::new(
            ChainKey::new("org-1", "job-7", EventType::SystemEvent),
            "job-7",
            "rotate",
            "keys",
        )
        .timestamp(10)
        .seal()
        .unwrap();
        store.append(&event).await.unwrap();
        let stored = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, None);
        assert_eq!(stored.before, None);
        assert_eq!(stored, event);
    }

    #[tokio::test]
    async fn test_duplicate_and_stale() {
        let store = SqliteStore::open_memory().unwrap();
        let events = append_n(&store, &key(), 2).await;

        assert_eq!(
            store.append(&events[1]).await.unwrap(),
            AppendResult::Duplicate
        );

        let stale = build(&key(), Some(&events[0].as_tail()), 9_000);
        assert_eq!(
            store.append(&stale).await.unwrap(),
            AppendResult::StaleTail {
                current: Some(events[1].as_tail())
            }
        );
        assert_eq!(store.count_chain(&key().id()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_latest_and_query_chain() {
        let store = SqliteStore::open_memory().unwrap();
        let events = append_n(&store, &key(), 5).await;

        let latest = store.latest(&key().id()).await.unwrap().unwrap();
        assert_eq!(latest.id, events[4].id);

        let page = store
            .query_chain(&key().id(), TimeRange::ALL, ChainCursor::Start, 3)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 3);
        assert_eq!(page.next, Some(ChainCursor::After(2)));

        let page = store
            .query_chain(&key().id(), TimeRange::new(Some(1_003), None), ChainCursor::Start, 10)
            .await
            .unwrap();
        let seqs: Vec<u64> = page.events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_query_events_filters() {
        let store = SqliteStore::open_memory().unwrap();
        append_n(&store, &key(), 3).await;
        let access = ChainKey::new("org-1", "req-2", EventType::DataAccess);
        append_n(&store, &access, 2).await;
        append_n(&store, &ChainKey::new("org-2", "req-3", EventType::DataAccess), 2).await;

        let all = store
            .query_events("org-1", &EventFilter::all(), PageRequest::first(2))
            .await
            .unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.items.len(), 2);
        assert!(all.items[0].timestamp >= all.items[1].timestamp);

        let high = EventFilter {
            severities: vec![Severity::High],
            ..Default::default()
        };
        let page = store
            .query_events("org-1", &high, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);

        let text = EventFilter {
            text: Some("MEMBERSHIP".into()),
            event_types: vec![EventType::DataAccess],
            ..Default::default()
        };
        let page = store
            .query_events("org-1", &text, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let wildcard = EventFilter {
            text: Some("%".into()),
            ..Default::default()
        };
        let page = store
            .query_events("org-1", &wildcard, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_query_events_resumes_from_cursor() {
        let store = SqliteStore::open_memory().unwrap();
        let events = append_n(&store, &key(), 5).await;

        let first = store
            .query_events("org-1", &EventFilter::all(), PageRequest::first(2))
            .await
            .unwrap();
        let after = EventFilter {
            before: first.items.last().map(EventCursor::at),
            ..Default::default()
        };

        // A newer event appended between pages does not shift the listing.
        let late = build(&key(), Some(&events[4].as_tail()), 9_000);
        store.append(&late).await.unwrap();

        let rest = store
            .query_events("org-1", &after, PageRequest::first(10))
            .await
            .unwrap();
        let seqs: Vec<u64> = rest.items.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 1, 0]);
        assert_eq!(rest.total, 3);
    }

    #[tokio::test]
    async fn test_list_chains_sorted() {
        let store = SqliteStore::open_memory().unwrap();
        append_n(&store, &key(), 1).await;
        let earlier = ChainKey::new("org-1", "req-0", EventType::DataAccess);
        append_n(&store, &earlier, 1).await;

        assert_eq!(store.list_chains("org-1").await.unwrap(), vec![earlier, key()]);
    }

    #[tokio::test]
    async fn test_rows_are_append_only() {
        let store = SqliteStore::open_memory().unwrap();
        let events = append_n(&store, &key(), 1).await;
        let id = events[0].id.to_hyphenated();

        let conn = store.conn.lock().unwrap();
        assert!(conn
            .execute(
                "UPDATE audit_events SET action = 'x' WHERE event_id = ?1",
                params![id]
            )
            .is_err());
        assert!(conn
            .execute("DELETE FROM audit_events WHERE event_id = ?1", params![id])
            .is_err());
    }

    #[tokio::test]
    async fn test_negative_sequence_row_ends_the_chain() {
        let store = SqliteStore::open_memory().unwrap();
        let events = append_n(&store, &key(), 3).await;
        {
            let conn = store.conn.lock().unwrap();
            conn.execute_batch("DROP TRIGGER audit_events_no_update").unwrap();
            conn.execute(
                "UPDATE audit_events SET sequence = -1 WHERE event_id = ?1",
                params![events[2].id.to_hyphenated()],
            )
            .unwrap();
        }

        let latest = store.tail(&key().id()).await.unwrap().unwrap();
        assert_eq!(latest.sequence, u64::MAX);

        let next = build(&key(), Some(&events[2].as_tail()), 9_000);
        let err = store.append(&next).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)), "{err}");

        let loaded = store.load_chain(&key().id(), 10).await.unwrap();
        let seqs: Vec<u64> = loaded.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, u64::MAX]);
    }

    #[tokio::test]
    async fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let events = {
            let store = SqliteStore::open(&path).unwrap();
            append_n(&store, &key(), 3).await
        };

        let store = SqliteStore::open(&path).unwrap();
        let latest = store.latest(&key().id()).await.unwrap().unwrap();
        assert_eq!(latest, events[2]);

        let next = build(&key(), Some(&latest.as_tail()), 2_000);
        assert_eq!(store.append(&next).await.unwrap(), AppendResult::Appended);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
