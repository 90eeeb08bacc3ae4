//! # quibbler-settings
//!
//! Configuration with layered sources, resolved once at startup.
//!
//! Layers, lowest priority first:
//! 1. **Compiled defaults**: [`QuibblerSettings::default()`]
//! 2. **User file**: `$QUIBBLER_HOME/settings.json`
//! 3. **Project file**: `<project>/.quibbler/config.json`
//! 4. **Environment variables**: `QUIBBLER_*` overrides
//!
//! The result is an explicit value that callers pass down (usually inside an
//! `Arc`). There is no process-wide settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_paths};
pub use types::*;
