//! Audit log repository.

use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::row_types::AuditRecord;

/// Audit repository. Stateless; every method takes `&Connection`.
pub struct AuditRepo;

impl AuditRepo {
    /// Insert an audit record.
    ///
    /// An empty `audit_id` or `created_at` is filled in.
    pub fn record(conn: &Connection, record: &AuditRecord) -> Result<AuditRecord> {
        let mut row = record.clone();
        if row.audit_id.is_empty() {
            row.audit_id = hub_core::AuditId::new().to_string();
        }
        if row.created_at.is_empty() {
            row.created_at = hub_core::time::now();
        }

        let _ = conn.execute(
            "INSERT INTO audit_logs (audit_id, workspace_id, project_id, session_id, execution_id,
             user_id, action, tool_name, parameters_summary, outcome, trace_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.audit_id,
                row.workspace_id,
                row.project_id,
                row.session_id,
                row.execution_id,
                row.user_id,
                row.action,
                row.tool_name,
                row.parameters_summary,
                row.outcome,
                row.trace_id,
                row.created_at,
            ],
        )?;
        Ok(row)
    }

    /// All audit records for an execution, oldest first.
    pub fn list_for_execution(conn: &Connection, execution_id: &str) -> Result<Vec<AuditRecord>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_logs WHERE execution_id = ?1 ORDER BY created_at, audit_id",
        )?;
        let rows = stmt
            .query_map(params![execution_id], |row| {
                Ok(AuditRecord {
                    audit_id: row.get("audit_id")?,
                    workspace_id: row.get("workspace_id")?,
                    project_id: row.get("project_id")?,
                    session_id: row.get("session_id")?,
                    execution_id: row.get("execution_id")?,
                    user_id: row.get("user_id")?,
                    action: row.get("action")?,
                    tool_name: row.get("tool_name")?,
                    parameters_summary: row.get("parameters_summary")?,
                    outcome: row.get("outcome")?,
                    trace_id: row.get("trace_id")?,
                    created_at: row.get("created_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    #[test]
    fn record_and_list() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();

        let stored = AuditRepo::record(
            &conn,
            &AuditRecord {
                execution_id: "e1".into(),
                user_id: "system".into(),
                action: "execution.timeout".into(),
                outcome: "failure".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(stored.audit_id.starts_with("audit_"));
        assert!(!stored.created_at.is_empty());

        let rows = AuditRepo::list_for_execution(&conn, "e1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "execution.timeout");
        assert!(AuditRepo::list_for_execution(&conn, "e2").unwrap().is_empty());
    }
}
