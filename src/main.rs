//! # hub
//!
//! Execution hub process host: wires the store, event bus, scheduler and
//! watchdog, then runs until Ctrl-C.

#![deny(unsafe_code)]

mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hub_events::{EventBus, EventBusConfig};
use hub_scheduler::{HttpDispatcher, Scheduler, SchedulerConfig, Watchdog, WatchdogConfig};
use hub_store::{ConnectionConfig, HubStore};

use crate::shutdown::ShutdownCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // settings come first: they carry the log level
    let settings_path = hub_settings::settings_path();
    let settings = hub_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    hub_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let db_path = PathBuf::from(&settings.database.path);
    let store = HubStore::open_file(
        &db_path,
        &ConnectionConfig {
            pool_size: settings.database.pool_size,
            busy_timeout_ms: settings.database.busy_timeout_ms,
        },
    )
    .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let bus = EventBus::new(EventBusConfig {
        ring_capacity: settings.event_bus.ring_capacity,
        subscriber_queue: settings.event_bus.subscriber_queue,
    });

    let scheduler_settings = &settings.scheduler;
    if scheduler_settings.worker_base_url.trim().is_empty() {
        tracing::warn!("no worker configured, every execution will fail dispatch");
    }
    let dispatcher = HttpDispatcher::new(
        &scheduler_settings.worker_base_url,
        scheduler_settings.runtime_shared_secret.clone(),
        scheduler_settings.dispatch_timeout(),
    )
    .context("Failed to build worker HTTP client")?;

    let scheduler = Scheduler::new(
        store.clone(),
        bus.clone(),
        Arc::new(dispatcher),
        SchedulerConfig {
            max_concurrent_executions: scheduler_settings.max_concurrent_executions,
        },
    );

    let mut shutdown = ShutdownCoordinator::new();
    if settings.watchdog.enabled {
        let watchdog = Watchdog::new(
            store.clone(),
            bus.clone(),
            WatchdogConfig {
                timeout: settings.watchdog.timeout(),
                interval: settings.watchdog.interval(),
            },
        );
        shutdown.track(watchdog.spawn(shutdown.token()));
    } else {
        tracing::info!("watchdog disabled in settings");
    }

    tracing::info!(
        db = %db_path.display(),
        worker = %scheduler_settings.worker_base_url,
        max_concurrent_executions = scheduler_settings.max_concurrent_executions,
        "hub ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = shutdown
        .graceful_shutdown(scheduler.dispatch_pool(), None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
