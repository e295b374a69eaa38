//! Storage layer
//!
//! Two key/value tiers back the extension:
//!
//! - sync: user preferences (`defaults`, `badgeEnabled`, `theme`)
//! - local: the context-menu definition and one `playbackRate_<tabId>`
//!   entry per live tab
//!
//! Reads never fail from the caller's point of view. A missing key, an
//! undecodable value or a backend error all yield the documented fallback.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::KeyValueStore;
use crate::types::{menu_options, Defaults, MenuOption, TabId, Theme, DEFAULT_RATE};

// =============================================================================
// Keys
// =============================================================================

pub mod keys {
    /// Sync tier: `{ enabled, playbackRate }`
    pub const DEFAULTS: &str = "defaults";
    /// Sync tier: bool
    pub const BADGE_ENABLED: &str = "badgeEnabled";
    /// Sync tier: string
    pub const THEME: &str = "theme";
    /// Local tier: menu definition written at install
    pub const CONTEXT_MENU_OPTIONS: &str = "contextMenuOptions";
    /// Local tier: prefix of the per-tab rate keys
    pub const TAB_RATE_PREFIX: &str = "playbackRate_";
}

/// Storage key holding the last reported rate of a tab.
///
/// The key is the decimal tab id appended to a fixed prefix. Tab ids are
/// assumed to never collide once formatted.
pub fn tab_rate_key(tab_id: TabId) -> String {
    format!("{}{}", keys::TAB_RATE_PREFIX, tab_id)
}

/// Inverse of [`tab_rate_key`].
pub fn parse_tab_rate_key(key: &str) -> Option<TabId> {
    key.strip_prefix(keys::TAB_RATE_PREFIX)?.parse().ok()
}

// =============================================================================
// Errors
// =============================================================================

/// Error type for storage backends.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to encode value for '{key}': {reason}")]
    Encode { key: String, reason: String },
}

// =============================================================================
// Typed Accessors
// =============================================================================

/// Read and decode a key, falling back on any kind of miss.
pub async fn read_or<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, fallback: T) -> T {
    match store.get(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("Ignoring malformed value for '{}': {}", key, e);
                fallback
            }
        },
        Ok(None) => fallback,
        Err(e) => {
            log::warn!("Failed to read '{}': {}", key, e);
            fallback
        }
    }
}

/// Encode and write a key.
pub async fn write<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StorageError> {
    let encoded = serde_json::to_value(value).map_err(|e| StorageError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, encoded).await
}

pub async fn read_defaults(sync: &dyn KeyValueStore) -> Defaults {
    read_or(sync, keys::DEFAULTS, Defaults::default()).await
}

pub async fn read_badge_enabled(sync: &dyn KeyValueStore) -> bool {
    read_or(sync, keys::BADGE_ENABLED, true).await
}

pub async fn read_theme(sync: &dyn KeyValueStore) -> Theme {
    read_or(sync, keys::THEME, Theme::default()).await
}

/// Menu definition persisted at install, or the static table when absent.
pub async fn read_menu_options(local: &dyn KeyValueStore) -> Vec<MenuOption> {
    read_or(local, keys::CONTEXT_MENU_OPTIONS, menu_options()).await
}

pub async fn write_menu_options(local: &dyn KeyValueStore, options: &[MenuOption]) -> Result<(), StorageError> {
    write(local, keys::CONTEXT_MENU_OPTIONS, &options).await
}

/// Last rate reported for a tab, or 1 when none was reported.
pub async fn read_tab_rate(local: &dyn KeyValueStore, tab_id: TabId) -> f64 {
    read_or(local, &tab_rate_key(tab_id), DEFAULT_RATE).await
}

pub async fn write_tab_rate(local: &dyn KeyValueStore, tab_id: TabId, rate: f64) -> Result<(), StorageError> {
    write(local, &tab_rate_key(tab_id), &rate).await
}

pub async fn remove_tab_rate(local: &dyn KeyValueStore, tab_id: TabId) -> Result<(), StorageError> {
    local.remove(&tab_rate_key(tab_id)).await
}

/// Write install-time preferences, leaving existing user choices alone.
pub async fn seed_preferences(sync: &dyn KeyValueStore) -> Result<(), StorageError> {
    if sync.get(keys::DEFAULTS).await?.is_none() {
        write(sync, keys::DEFAULTS, &Defaults::default()).await?;
    }
    if sync.get(keys::BADGE_ENABLED).await?.is_none() {
        write(sync, keys::BADGE_ENABLED, &true).await?;
    }
    Ok(())
}

// =============================================================================
// Change Notifications
// =============================================================================

/// Storage tier a change happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Sync,
    Local,
}

/// One changed key, in the browser's `storage.onChanged` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Changed keys of one notification.
pub type StorageChanges = BTreeMap<String, StorageChange>;

bitflags::bitflags! {
    /// Which kinds of persisted state a change notification touched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PrefChanges: u8 {
        const DEFAULTS = 1 << 0;
        const BADGE_ENABLED = 1 << 1;
        const THEME = 1 << 2;
        const TAB_RATE = 1 << 3;
        const CONTEXT_MENU = 1 << 4;
    }
}

impl PrefChanges {
    /// Classify the keys of a change notification.
    pub fn classify(area: StorageArea, changes: &StorageChanges) -> Self {
        let mut flags = Self::empty();
        for key in changes.keys() {
            flags |= match (area, key.as_str()) {
                (StorageArea::Sync, keys::DEFAULTS) => Self::DEFAULTS,
                (StorageArea::Sync, keys::BADGE_ENABLED) => Self::BADGE_ENABLED,
                (StorageArea::Sync, keys::THEME) => Self::THEME,
                (StorageArea::Local, keys::CONTEXT_MENU_OPTIONS) => Self::CONTEXT_MENU,
                (StorageArea::Local, key) if parse_tab_rate_key(key).is_some() => Self::TAB_RATE,
                _ => Self::empty(),
            };
        }
        flags
    }
}

// =============================================================================
// In-memory Backend
// =============================================================================

/// In-memory [`KeyValueStore`], used by the simulator and tests.
///
/// Records a pending change notification for every mutation, which the
/// owner drains with [`MemoryStore::take_changes`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, Value>>,
    pending: RefCell<StorageChanges>,
    writes: RefCell<BTreeMap<String, usize>>,
    unavailable: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as a torn-down backend would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    /// Direct read without going through the async trait.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.borrow().clone()
    }

    /// Number of `set` calls that hit `key`.
    pub fn write_count(&self, key: &str) -> usize {
        self.writes.borrow().get(key).copied().unwrap_or(0)
    }

    /// Drain the changes recorded since the last call.
    pub fn take_changes(&self) -> StorageChanges {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.get() {
            return Err(StorageError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    fn record(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        if old_value == new_value {
            return;
        }
        let mut pending = self.pending.borrow_mut();
        let entry = pending.entry(key.to_string()).or_insert_with(|| StorageChange {
            old_value,
            new_value: None,
        });
        entry.new_value = new_value;
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.check()?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check()?;
        *self.writes.borrow_mut().entry(key.to_string()).or_insert(0) += 1;
        let old = self.entries.borrow_mut().insert(key.to_string(), value.clone());
        self.record(key, old, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        let old = self.entries.borrow_mut().remove(key);
        self.record(key, old, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tab_rate_key() {
        assert_eq!(tab_rate_key(42), "playbackRate_42");
        assert_eq!(parse_tab_rate_key("playbackRate_42"), Some(42));
        assert_eq!(parse_tab_rate_key("playbackRate_x"), None);
        assert_eq!(parse_tab_rate_key("theme"), None);
    }

    #[tokio::test]
    async fn test_read_fallbacks() {
        let store = MemoryStore::new();
        assert_eq!(read_defaults(&store).await, Defaults::default());
        assert!(read_badge_enabled(&store).await);
        assert_eq!(read_theme(&store).await, Theme::default());
        assert_eq!(read_tab_rate(&store, 3).await, 1.0);
        assert_eq!(read_menu_options(&store).await.len(), 12);

        store.set(keys::BADGE_ENABLED, json!("yes")).await.unwrap();
        assert!(read_badge_enabled(&store).await);

        store.set_unavailable(true);
        assert!(read_badge_enabled(&store).await);
        assert!(write_tab_rate(&store, 1, 2.0).await.is_err());
    }

    #[tokio::test]
    async fn test_tab_rate_roundtrip_and_removal() {
        let store = MemoryStore::new();
        write_tab_rate(&store, 5, 1.5).await.unwrap();
        assert_eq!(read_tab_rate(&store, 5).await, 1.5);
        remove_tab_rate(&store, 5).await.unwrap();
        assert_eq!(store.peek("playbackRate_5"), None);
    }

    #[tokio::test]
    async fn test_seed_preserves_user_choices() {
        let store = MemoryStore::new();
        write(&store, keys::BADGE_ENABLED, &false).await.unwrap();
        seed_preferences(&store).await.unwrap();

        assert_eq!(store.peek(keys::BADGE_ENABLED), Some(json!(false)));
        assert_eq!(
            store.peek(keys::DEFAULTS),
            Some(json!({"enabled": false, "playbackRate": 1.0}))
        );
    }

    #[tokio::test]
    async fn test_change_recording() {
        let store = MemoryStore::new();
        store.set("theme", json!("dark")).await.unwrap();
        store.set("theme", json!("light")).await.unwrap();
        store.set("badgeEnabled", json!(true)).await.unwrap();
        store.set("badgeEnabled", json!(true)).await.unwrap();

        let changes = store.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["theme"].old_value, None);
        assert_eq!(changes["theme"].new_value, Some(json!("light")));
        assert_eq!(store.write_count("badgeEnabled"), 2);
        assert!(store.take_changes().is_empty());
    }

    #[test]
    fn test_classify_changes() {
        let mut changes = StorageChanges::new();
        changes.insert(keys::BADGE_ENABLED.to_string(), StorageChange::default());
        changes.insert("playbackRate_9".to_string(), StorageChange::default());

        assert_eq!(PrefChanges::classify(StorageArea::Sync, &changes), PrefChanges::BADGE_ENABLED);
        assert_eq!(PrefChanges::classify(StorageArea::Local, &changes), PrefChanges::TAB_RATE);

        let mut changes = StorageChanges::new();
        changes.insert(keys::DEFAULTS.to_string(), StorageChange::default());
        changes.insert(keys::THEME.to_string(), StorageChange::default());
        changes.insert(keys::CONTEXT_MENU_OPTIONS.to_string(), StorageChange::default());

        assert_eq!(
            PrefChanges::classify(StorageArea::Sync, &changes),
            PrefChanges::DEFAULTS | PrefChanges::THEME
        );
        assert_eq!(PrefChanges::classify(StorageArea::Local, &changes), PrefChanges::CONTEXT_MENU);
    }
}
