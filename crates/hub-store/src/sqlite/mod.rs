//! `SQLite` backend.
//!
//! - **[`connection`]**: `r2d2` pool with per-connection pragmas.
//! - **[`migrations`]**: embedded, version-tracked schema.
//! - **[`row_types`]**: raw row structs.
//! - **[`repositories`]**: stateless repository structs.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, new_file, new_in_memory,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};
