//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings for the hub process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Store location and pool sizing.
    pub database: DatabaseSettings,
    /// Admission and worker dispatch.
    pub scheduler: SchedulerSettings,
    /// Stale execution recovery.
    pub watchdog: WatchdogSettings,
    /// In-memory event distribution.
    pub event_bus: EventBusSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// `SQLite` store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file path.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `busy_timeout` pragma in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "./data/hub.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Admission control and dispatch settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Per-workspace limit on pending/executing executions; `0` disables it.
    pub max_concurrent_executions: usize,
    /// Worker base URL; empty means no worker is configured.
    pub worker_base_url: String,
    /// Shared secret sent to the worker as `X-Hub-Auth`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_shared_secret: Option<String>,
    /// Dispatch request timeout in milliseconds.
    pub dispatch_timeout_ms: u64,
}

impl SchedulerSettings {
    /// Dispatch timeout as a [`Duration`].
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            worker_base_url: "http://127.0.0.1:8040".to_string(),
            runtime_shared_secret: None,
            dispatch_timeout_ms: 30_000,
        }
    }
}

/// Watchdog settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogSettings {
    /// Run the periodic sweep at all.
    pub enabled: bool,
    /// Longest tolerated silence before an executing run is failed.
    pub timeout_secs: u64,
    /// Sweep cadence.
    pub interval_secs: u64,
}

impl WatchdogSettings {
    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
            interval_secs: 30,
        }
    }
}

/// Event bus sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventBusSettings {
    /// Events retained per execution for replay.
    pub ring_capacity: usize,
    /// Queue depth per subscriber before events are dropped.
    pub subscriber_queue: usize,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            ring_capacity: 500,
            subscriber_queue: 64,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
