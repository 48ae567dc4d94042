//! # muse-settings
//!
//! Layered configuration for the Muse inference server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MuseSettings::default()`]
//! 2. **Settings file**: `$MUSE_SETTINGS_FILE` or `./muse.json` (deep-merged over defaults)
//! 3. **Environment variables**: `MUSE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use muse_settings::load_settings;
//!
//! let settings = load_settings().expect("valid settings");
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
