//! Branded string identifiers.
//!
//! Freshly minted IDs are `<prefix>_<uuid v7>`, so they are globally unique
//! and sort by creation time. IDs read back from the database or supplied by
//! callers are wrapped verbatim with [`from_raw`](ExecutionId::from_raw).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new, globally unique identifier.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing identifier without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Identifies a conversation context.
    SessionId,
    "sess"
);
branded_id!(
    /// Identifies one agent run.
    ExecutionId,
    "exec"
);
branded_id!(
    /// Identifies a tenant workspace (the quota scope).
    WorkspaceId,
    "ws"
);
branded_id!(
    /// Identifies a project inside a workspace.
    ProjectId,
    "proj"
);
branded_id!(
    /// Correlation identifier threaded through events and audit rows.
    TraceId,
    "trace"
);
branded_id!(
    /// Identifies an audit log row.
    AuditId,
    "audit"
);
branded_id!(
    /// Identifies the acting user.
    UserId,
    "user"
);

impl UserId {
    /// The actor recorded for hub-initiated actions (watchdog, compensation).
    pub fn system() -> Self {
        Self::from_raw("system")
    }
}
