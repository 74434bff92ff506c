//! Inspection Configuration Module
//!
//! Provides deployment configuration loaded from TOML files: pipeline
//! thresholds, analytics windows, model paths, server and storage settings.
//!
//! ## Loading Order
//!
//! 1. `WAFER_CONFIG` environment variable (path to TOML file)
//! 2. `inspection_config.toml` in the current working directory
//! 3. Built-in defaults (see `defaults.rs`)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(InspectionConfig::load());
//! let attempts = config::get().validation.max_attempts;
//! ```

mod inspection_config;
pub mod defaults;
pub mod validation;

pub use inspection_config::*;

use std::sync::OnceLock;

/// Global inspection configuration, initialized once at startup.
static INSPECTION_CONFIG: OnceLock<InspectionConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// Later calls are ignored with a warning.
pub fn init(config: InspectionConfig) {
    if INSPECTION_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global configuration.
///
/// Falls back to built-in defaults if `init()` was never called (tests,
/// one-shot CLI commands).
pub fn get() -> &'static InspectionConfig {
    INSPECTION_CONFIG.get_or_init(|| {
        tracing::debug!("config::get() before init(), using defaults");
        InspectionConfig::default()
    })
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    INSPECTION_CONFIG.get().is_some()
}
