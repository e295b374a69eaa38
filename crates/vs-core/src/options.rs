//! Options page controller
//!
//! Reads and writes the synchronized preferences. The coordinator and the
//! content scripts pick changes up from storage; nothing is messaged.

use serde::{Deserialize, Serialize};

use crate::platform::KeyValueStore;
use crate::storage::{self, keys, StorageError};
use crate::types::{validate_rate, Defaults, RateError, Theme};

/// Error type for saving preferences.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionsError {
    #[error("Invalid default rate: {0}")]
    Rate(#[from] RateError),
    #[error("Failed to save: {0}")]
    Storage(#[from] StorageError),
}

/// Every synchronized preference, with fallbacks applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub defaults: Defaults,
    pub badge_enabled: bool,
    pub theme: Theme,
}

pub struct OptionsController<'a> {
    sync: &'a dyn KeyValueStore,
}

impl<'a> OptionsController<'a> {
    pub fn new(sync: &'a dyn KeyValueStore) -> Self {
        Self { sync }
    }

    pub async fn load(&self) -> Preferences {
        Preferences {
            defaults: storage::read_defaults(self.sync).await,
            badge_enabled: storage::read_badge_enabled(self.sync).await,
            theme: storage::read_theme(self.sync).await,
        }
    }

    pub async fn save_defaults(&self, enabled: bool, playback_rate: f64) -> Result<Defaults, OptionsError> {
        let defaults = Defaults {
            enabled,
            playback_rate: validate_rate(playback_rate)?,
        };
        storage::write(self.sync, keys::DEFAULTS, &defaults).await?;
        Ok(defaults)
    }

    pub async fn set_badge_enabled(&self, enabled: bool) -> Result<(), OptionsError> {
        storage::write(self.sync, keys::BADGE_ENABLED, &enabled).await?;
        Ok(())
    }

    pub async fn set_theme(&self, theme: &Theme) -> Result<(), OptionsError> {
        storage::write(self.sync, keys::THEME, theme).await?;
        Ok(())
    }
}
