//! # haggle-settings
//!
//! Configuration management with layered sources for the Haggle agent.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`HaggleSettings::default()`]
//! 2. **User file** — `~/.haggle/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `HAGGLE_*` overrides (highest priority)
//!
//! Long-lived tasks hold a [`SettingsHandle`] and take cheap [`Arc`]
//! snapshots per operation, so a reload never tears a task's view of the
//! configuration mid-flight.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::Arc;

use parking_lot::RwLock;

/// Shared, reloadable view of the settings.
///
/// Cloning the handle is cheap; all clones observe the same underlying
/// value. Readers call [`SettingsHandle::snapshot`] once per operation and
/// work off the returned [`Arc`].
#[derive(Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Arc<HaggleSettings>>>,
}

impl SettingsHandle {
    /// Wrap an already-loaded settings value.
    #[must_use]
    pub fn new(settings: HaggleSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Load from the default path and wrap the result.
    pub fn load() -> Result<Self> {
        Ok(Self::new(load_settings()?))
    }

    /// Current settings snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HaggleSettings> {
        self.inner.read().clone()
    }

    /// Replace the settings; existing snapshots are unaffected.
    pub fn replace(&self, settings: HaggleSettings) {
        *self.inner.write() = Arc::new(settings);
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(HaggleSettings::default())
    }
}

impl std::fmt::Debug for SettingsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsHandle").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
