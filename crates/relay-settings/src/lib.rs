//! # relay-settings
//!
//! Layered configuration for the relay service.
//!
//! Settings are resolved in three layers (later wins):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or an explicit path, deep-merged over defaults
//! 3. **Environment variables**: `RELAY_*` overrides
//!
//! The resolved value is passed explicitly to the store and server
//! constructors; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, relay_home, settings_path};
pub use types::*;
