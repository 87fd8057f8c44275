//! Project repository. The hub only reads projects to resolve repo roots.

use hub_core::time;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::ProjectRow;

/// Options for creating a project.
#[derive(Default)]
pub struct CreateProjectOptions<'a> {
    /// Explicit ID; minted when `None`.
    pub project_id: Option<&'a str>,
    /// Owning workspace.
    pub workspace_id: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Local checkout path.
    pub repo_cache_path: Option<&'a str>,
    /// Upstream location.
    pub root_uri: Option<&'a str>,
}

/// Project repository. Stateless; every method takes `&Connection`.
pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert a project.
    pub fn create(conn: &Connection, opts: &CreateProjectOptions<'_>) -> Result<ProjectRow> {
        let row = ProjectRow {
            project_id: opts
                .project_id
                .map_or_else(|| hub_core::ProjectId::new().to_string(), String::from),
            workspace_id: opts.workspace_id.to_string(),
            name: opts.name.to_string(),
            repo_cache_path: opts.repo_cache_path.map(String::from),
            root_uri: opts.root_uri.map(String::from),
            created_at: time::now(),
        };
        let _ = conn.execute(
            "INSERT INTO projects (project_id, workspace_id, name, repo_cache_path, root_uri, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.project_id,
                row.workspace_id,
                row.name,
                row.repo_cache_path,
                row.root_uri,
                row.created_at,
            ],
        )?;
        Ok(row)
    }

    /// Get a project by ID.
    pub fn get(conn: &Connection, project_id: &str) -> Result<Option<ProjectRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM projects WHERE project_id = ?1",
                params![project_id],
                |row| {
                    Ok(ProjectRow {
                        project_id: row.get("project_id")?,
                        workspace_id: row.get("workspace_id")?,
                        name: row.get("name")?,
                        repo_cache_path: row.get("repo_cache_path")?,
                        root_uri: row.get("root_uri")?,
                        created_at: row.get("created_at")?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Repository root for a project; empty when the project is unknown or
    /// has neither a cache path nor a root URI.
    pub fn repo_root(conn: &Connection, project_id: &str) -> Result<String> {
        Ok(Self::get(conn, project_id)?
            .map(|p| p.repo_root().to_string())
            .unwrap_or_default())
    }
}
