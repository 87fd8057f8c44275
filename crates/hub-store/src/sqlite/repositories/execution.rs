//! Execution repository.
//!
//! Every state-changing statement is conditioned on the current state, so
//! a terminal execution never moves again and concurrent writers (scheduler,
//! watchdog, ingestor) cannot undo each other.

use hub_core::{ExecutionState, time};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use crate::errors::Result;
use crate::sqlite::row_types::ExecutionRow;

/// Fields for a newly admitted execution.
pub struct NewExecution<'a> {
    /// Execution ID.
    pub execution_id: &'a str,
    /// Owning session.
    pub session_id: &'a str,
    /// Project reference.
    pub project_id: &'a str,
    /// Owning workspace.
    pub workspace_id: &'a str,
    /// Requesting user.
    pub created_by: &'a str,
    /// Correlation ID.
    pub trace_id: &'a str,
    /// Prompt text.
    pub user_message: &'a str,
    /// Repository root.
    pub repo_root: &'a str,
    /// Worktree path (empty when unused).
    pub worktree_root: &'a str,
    /// Whether a worktree was requested.
    pub use_worktree: bool,
}

/// Execution repository. Stateless; every method takes `&Connection`.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Insert an execution in the `pending` state.
    pub fn insert(conn: &Connection, new: &NewExecution<'_>) -> Result<ExecutionRow> {
        let now = time::now();
        let _ = conn.execute(
            "INSERT INTO executions (execution_id, session_id, project_id, workspace_id, created_by,
             state, trace_id, user_message, repo_root, worktree_root, use_worktree, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.execution_id,
                new.session_id,
                new.project_id,
                new.workspace_id,
                new.created_by,
                ExecutionState::Pending.as_str(),
                new.trace_id,
                new.user_message,
                new.repo_root,
                new.worktree_root,
                new.use_worktree,
                now,
            ],
        )?;

        Ok(ExecutionRow {
            execution_id: new.execution_id.to_string(),
            session_id: new.session_id.to_string(),
            project_id: new.project_id.to_string(),
            workspace_id: new.workspace_id.to_string(),
            created_by: new.created_by.to_string(),
            state: ExecutionState::Pending.as_str().to_string(),
            trace_id: new.trace_id.to_string(),
            user_message: new.user_message.to_string(),
            repo_root: new.repo_root.to_string(),
            worktree_root: new.worktree_root.to_string(),
            use_worktree: new.use_worktree,
            created_at: now,
            started_at: None,
            ended_at: None,
            last_event_ts: None,
        })
    }

    /// Get an execution by ID.
    pub fn get(conn: &Connection, execution_id: &str) -> Result<Option<ExecutionRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM executions WHERE execution_id = ?1",
                params![execution_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Get an execution only if it belongs to `workspace_id`.
    pub fn get_in_workspace(
        conn: &Connection,
        workspace_id: &str,
        execution_id: &str,
    ) -> Result<Option<ExecutionRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM executions WHERE execution_id = ?1 AND workspace_id = ?2",
                params![execution_id, workspace_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Number of `pending` or `executing` executions in a workspace.
    pub fn count_active_in_workspace(conn: &Connection, workspace_id: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM executions
             WHERE workspace_id = ?1 AND state IN ('pending', 'executing')",
            params![workspace_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// `pending` → `executing`, keeping an earlier `started_at` if present.
    pub fn mark_executing(conn: &Connection, execution_id: &str, started_at: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE executions SET state = 'executing', started_at = COALESCE(started_at, ?1)
             WHERE execution_id = ?2 AND state = 'pending'",
            params![started_at, execution_id],
        )?;
        Ok(changed > 0)
    }

    /// Record a worker heartbeat.
    ///
    /// `last_event_ts` only moves forward. A pending execution becomes
    /// executing; terminal executions keep their state.
    pub fn record_heartbeat(conn: &Connection, execution_id: &str, ts: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE executions SET
                last_event_ts = CASE
                    WHEN last_event_ts IS NULL OR last_event_ts < ?1 THEN ?1
                    ELSE last_event_ts END,
                started_at = CASE
                    WHEN state = 'pending' THEN COALESCE(started_at, ?1)
                    ELSE started_at END,
                state = CASE WHEN state = 'pending' THEN 'executing' ELSE state END
             WHERE execution_id = ?2",
            params![ts, execution_id],
        )?;
        Ok(changed > 0)
    }

    /// Move an active execution to a terminal state.
    ///
    /// Returns `false` when the execution was already terminal (or unknown).
    pub fn finish(
        conn: &Connection,
        execution_id: &str,
        state: ExecutionState,
        ended_at: &str,
    ) -> Result<bool> {
        debug_assert!(state.is_terminal());
        let changed = conn.execute(
            "UPDATE executions SET state = ?1, ended_at = COALESCE(ended_at, ?2)
             WHERE execution_id = ?3 AND state IN ('pending', 'executing')",
            params![state.as_str(), ended_at, execution_id],
        )?;
        Ok(changed > 0)
    }

    /// Mark an execution cancelled whatever its current state.
    ///
    /// `ended_at` keeps an earlier value, so repeating the call changes
    /// nothing. Returns `false` for an unknown execution.
    pub fn cancel(conn: &Connection, execution_id: &str, ended_at: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE executions SET state = 'cancelled', ended_at = COALESCE(ended_at, ?1)
             WHERE execution_id = ?2",
            params![ended_at, execution_id],
        )?;
        Ok(changed > 0)
    }

    /// `executing` → `failed`, only if still executing.
    ///
    /// Used by the watchdog so a late legitimate completion wins the race.
    pub fn fail_if_executing(conn: &Connection, execution_id: &str, ended_at: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE executions SET state = 'failed', ended_at = ?1
             WHERE execution_id = ?2 AND state = 'executing'",
            params![ended_at, execution_id],
        )?;
        Ok(changed > 0)
    }

    /// Executing runs with no heartbeat or start newer than `cutoff`.
    #[instrument(skip(conn))]
    pub fn list_stale(conn: &Connection, cutoff: &str) -> Result<Vec<ExecutionRow>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM executions
             WHERE state = 'executing'
               AND (last_event_ts IS NULL OR last_event_ts < ?1)
               AND (started_at IS NULL OR started_at < ?1)
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![cutoff], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
        Ok(ExecutionRow {
            execution_id: row.get("execution_id")?,
            session_id: row.get("session_id")?,
            project_id: row.get("project_id")?,
            workspace_id: row.get("workspace_id")?,
            created_by: row.get("created_by")?,
            state: row.get("state")?,
            trace_id: row.get("trace_id")?,
            user_message: row.get("user_message")?,
            repo_root: row.get("repo_root")?,
            worktree_root: row.get("worktree_root")?,
            use_worktree: row.get("use_worktree")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            last_event_ts: row.get("last_event_ts")?,
        })
    }
}
