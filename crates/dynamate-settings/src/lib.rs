//! # dynamate-settings
//!
//! Layered configuration for the DynaMate agents.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`DynamateSettings::default()`]
//! 2. **Settings file** — `dynamate.json` or the path given by `--settings` /
//!    `DYNAMATE_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables** — `DYNAMATE_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to every component that needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
