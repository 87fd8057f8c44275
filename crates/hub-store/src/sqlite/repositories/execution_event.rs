//! Persisted worker events.
//!
//! Workers may resend events after a reconnect; `(execution_id, seq)` is the
//! primary key and duplicates are silently dropped.

use hub_core::ExecutionEvent;
use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::row_types::ExecutionEventRow;

/// Execution event repository. Stateless; every method takes `&Connection`.
pub struct ExecutionEventRepo;

impl ExecutionEventRepo {
    /// Store an event. Returns `false` when the sequence was already stored.
    pub fn append(conn: &Connection, event: &ExecutionEvent) -> Result<bool> {
        let payload = serde_json::to_string(&event.payload)?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO execution_events (execution_id, seq, ts, type, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.execution_id.as_str(),
                event.sequence.to_wire(),
                event.timestamp,
                event.event_type,
                payload,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Stored events with a sequence greater than `after_seq`, ascending.
    pub fn list_after(
        conn: &Connection,
        execution_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<ExecutionEventRow>> {
        let mut stmt = conn.prepare(
            "SELECT execution_id, seq, ts, type, payload_json FROM execution_events
             WHERE execution_id = ?1 AND seq > ?2
             ORDER BY seq ASC LIMIT ?3",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![execution_id, after_seq, limit], |row| {
                Ok(ExecutionEventRow {
                    execution_id: row.get(0)?,
                    seq: row.get(1)?,
                    ts: row.get(2)?,
                    event_type: row.get(3)?,
                    payload_json: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
