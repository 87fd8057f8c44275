//! Session repository: the per-session execution mutex.
//!
//! `active_execution_id` is non-null exactly while the session is
//! `executing` or `waiting_confirmation`. Binding and releasing always update
//! both columns together.

use hub_core::{SessionStatus, time};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::SessionRow;

/// Options for creating a session.
#[derive(Default)]
pub struct CreateSessionOptions<'a> {
    /// Explicit ID; minted when `None`.
    pub session_id: Option<&'a str>,
    /// Owning workspace.
    pub workspace_id: &'a str,
    /// Project reference.
    pub project_id: &'a str,
    /// Optional title.
    pub title: Option<&'a str>,
    /// Agent mode (defaults to `agent`).
    pub mode: Option<&'a str>,
    /// Request a worktree per execution.
    pub use_worktree: bool,
    /// Model configuration reference.
    pub model_config_id: Option<&'a str>,
    /// Skill set IDs JSON (defaults to `[]`).
    pub skill_set_ids: Option<&'a str>,
    /// MCP connector IDs JSON (defaults to `[]`).
    pub mcp_connector_ids: Option<&'a str>,
    /// Creating user.
    pub created_by: &'a str,
}

/// Session repository. Stateless; every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert an idle session.
    pub fn create(conn: &Connection, opts: &CreateSessionOptions<'_>) -> Result<SessionRow> {
        let session_id = opts
            .session_id
            .map_or_else(|| hub_core::SessionId::new().to_string(), String::from);
        let now = time::now();
        let row = SessionRow {
            session_id,
            workspace_id: opts.workspace_id.to_string(),
            project_id: opts.project_id.to_string(),
            title: opts.title.map(String::from),
            mode: opts.mode.unwrap_or("agent").to_string(),
            use_worktree: opts.use_worktree,
            model_config_id: opts.model_config_id.map(String::from),
            skill_set_ids: opts.skill_set_ids.unwrap_or("[]").to_string(),
            mcp_connector_ids: opts.mcp_connector_ids.unwrap_or("[]").to_string(),
            active_execution_id: None,
            status: SessionStatus::Idle.as_str().to_string(),
            created_by: opts.created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let _ = conn.execute(
            "INSERT INTO sessions (session_id, workspace_id, project_id, title, mode, use_worktree,
             model_config_id, skill_set_ids, mcp_connector_ids, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                row.session_id,
                row.workspace_id,
                row.project_id,
                row.title,
                row.mode,
                row.use_worktree,
                row.model_config_id,
                row.skill_set_ids,
                row.mcp_connector_ids,
                row.status,
                row.created_by,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(row)
    }

    /// Get a session by ID.
    pub fn get(conn: &Connection, session_id: &str) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM sessions WHERE session_id = ?1",
                params![session_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Get a session only if it belongs to `workspace_id`.
    pub fn get_in_workspace(
        conn: &Connection,
        workspace_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM sessions WHERE session_id = ?1 AND workspace_id = ?2",
                params![session_id, workspace_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// The session currently bound to `execution_id`, if any.
    pub fn get_by_active_execution(
        conn: &Connection,
        execution_id: &str,
    ) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM sessions WHERE active_execution_id = ?1",
                params![execution_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Take the session mutex for `execution_id` and mark it executing.
    ///
    /// Returns whether a row was updated.
    pub fn bind_execution(conn: &Connection, session_id: &str, execution_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET active_execution_id = ?1, status = ?2, updated_at = ?3
             WHERE session_id = ?4",
            params![
                execution_id,
                SessionStatus::Executing.as_str(),
                time::now(),
                session_id
            ],
        )?;
        Ok(changed > 0)
    }

    /// Release the mutex held by `execution_id`, returning the session to idle.
    ///
    /// Only the session bound to that execution is touched, so a stale release
    /// never frees a mutex a newer execution already holds.
    pub fn release_execution(conn: &Connection, execution_id: &str) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE sessions SET active_execution_id = NULL, status = ?1, updated_at = ?2
             WHERE active_execution_id = ?3",
            params![SessionStatus::Idle.as_str(), time::now(), execution_id],
        )?;
        Ok(changed)
    }

    /// Move the session bound to `execution_id` from one status to another.
    ///
    /// No-op when the session is not bound or is in a different status.
    pub fn transition_status(
        conn: &Connection,
        execution_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2
             WHERE active_execution_id = ?3 AND status = ?4",
            params![to.as_str(), time::now(), execution_id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            session_id: row.get("session_id")?,
            workspace_id: row.get("workspace_id")?,
            project_id: row.get("project_id")?,
            title: row.get("title")?,
            mode: row.get("mode")?,
            use_worktree: row.get("use_worktree")?,
            model_config_id: row.get("model_config_id")?,
            skill_set_ids: row.get("skill_set_ids")?,
            mcp_connector_ids: row.get("mcp_connector_ids")?,
            active_execution_id: row.get("active_execution_id")?,
            status: row.get("status")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
