//! # hub-settings
//!
//! Configuration for the execution hub, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **Settings file**: `~/.hub/settings.json` or `$HUB_SETTINGS_PATH`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `HUB_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
