//! Configuration for loom.
//!
//! [`load_settings`] layers compiled defaults, `~/.loom/settings.json` and
//! `LOOM_*` environment variables, then validates the result. The returned
//! [`LoomSettings`] is handed to each component by the caller.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
