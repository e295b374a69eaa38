//! Background coordinator
//!
//! The coordinator owns the visible affordances (toolbar badge, context
//! menu) and routes rate reports from content scripts. It runs in a service
//! worker that the browser may evict between any two events, so it keeps no
//! state of its own: every handler reads what it needs from storage or from
//! the event, and [`Coordinator`] is cheap to rebuild per event.

use serde_json::Value;

use crate::message::{Message, TabIdReply};
use crate::platform::BackgroundPlatform;
use crate::storage::{self, PrefChanges, StorageArea, StorageChanges};
use crate::types::{
    format_rate, menu_options, FrameId, MenuOption, ScriptTarget, SetRateScript, TabId,
    BADGE_COLOR, MAIN_FRAME_ID,
};
use crate::url::is_injectable;

/// Metadata the browser attaches to an incoming message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageSender {
    /// Tab of a content-script sender; None for extension pages
    pub tab_id: Option<TabId>,
    pub frame_id: Option<FrameId>,
}

impl MessageSender {
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            frame_id: Some(MAIN_FRAME_ID),
        }
    }
}

/// A click on one of our context-menu entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuClick {
    pub menu_item_id: String,
    /// Source URL of the clicked media element, when there was one
    pub src_url: Option<String>,
    pub frame_id: Option<FrameId>,
}

/// Tab loading status from `tabs.onUpdated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    Loading,
    Complete,
    Other,
}

impl TabStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "loading" => Self::Loading,
            "complete" => Self::Complete,
            _ => Self::Other,
        }
    }
}

pub struct Coordinator<P: BackgroundPlatform> {
    platform: P,
}

impl<P: BackgroundPlatform> Coordinator<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    // =========================================================================
    // Install and Injection
    // =========================================================================

    /// `runtime.onInstalled`: build the menu and reach already-open tabs.
    pub async fn on_installed(&self) {
        if let Err(e) = storage::seed_preferences(self.platform.sync_store()).await {
            log::warn!("Failed to seed preferences: {}", e);
        }

        let options = menu_options();
        let menus = self.platform.menus();
        if let Err(e) = menus.remove_all().await {
            log::warn!("Failed to clear context menu: {}", e);
        }
        for option in &options {
            if let Err(e) = menus.create_radio_item(option, option.default).await {
                log::warn!("Failed to create menu item {}: {}", option.id, e);
            }
        }
        if let Err(e) = storage::write_menu_options(self.platform.local_store(), &options).await {
            log::warn!("Failed to persist menu options: {}", e);
        }

        let tabs = match self.platform.tabs().query_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                log::warn!("Failed to list tabs: {}", e);
                return;
            }
        };
        let mut injected = 0usize;
        for tab in tabs {
            if tab.url.as_deref().is_some_and(is_injectable) {
                self.inject(tab.id).await;
                injected += 1;
            }
        }
        log::info!("Installed; content script injected into {} open tab(s)", injected);
    }

    /// `tabs.onUpdated`: re-inject once a navigation completes.
    pub async fn on_tab_updated(&self, tab_id: TabId, status: TabStatus) {
        if status == TabStatus::Complete {
            self.inject(tab_id).await;
        }
    }

    async fn inject(&self, tab_id: TabId) {
        if let Err(e) = self.platform.tabs().inject_content_script(tab_id).await {
            log::debug!("Injection into tab {} failed: {}", tab_id, e);
        }
    }

    // =========================================================================
    // Context Menu
    // =========================================================================

    /// `contextMenus.onClicked`: set the clicked video's rate directly.
    pub async fn on_menu_clicked(&self, click: &MenuClick, tab_id: Option<TabId>) {
        let options = storage::read_menu_options(self.platform.local_store()).await;
        let Some(option) = options.iter().find(|o| o.id == click.menu_item_id) else {
            log::debug!("Ignoring click on unknown menu item {}", click.menu_item_id);
            return;
        };
        let Some(tab_id) = tab_id else {
            return;
        };

        let target = ScriptTarget {
            tab_id,
            frame_id: click.frame_id.unwrap_or(MAIN_FRAME_ID),
        };
        let script = SetRateScript {
            rate: option.rate,
            src_match: click.src_url.clone(),
        };
        if let Err(e) = self.platform.tabs().execute_set_rate(target, &script).await {
            log::debug!("Rate script in tab {} failed: {}", tab_id, e);
        }

        self.update_badge(tab_id, option.rate).await;
    }

    /// Check the menu entry closest to `rate` and uncheck every other one.
    pub async fn sync_context_menu(&self, rate: f64) {
        let options = storage::read_menu_options(self.platform.local_store()).await;
        let Some(closest) = find_closest_option(rate, &options) else {
            return;
        };

        let menus = self.platform.menus();
        for option in &options {
            if let Err(e) = menus.set_checked(&option.id, option.id == closest.id).await {
                log::debug!("Failed to update menu item {}: {}", option.id, e);
            }
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// `runtime.onMessage`. Returns the reply, if the message expects one.
    pub async fn on_message(&self, message: &Message, sender: MessageSender) -> Option<Value> {
        match message {
            Message::UpdateUi { rate, tab_id } => {
                let Some(tab_id) = tab_id.or(sender.tab_id) else {
                    log::warn!("UPDATE_UI without a tab, ignoring");
                    return None;
                };
                self.update_badge(tab_id, *rate).await;
                self.sync_context_menu(*rate).await;
                None
            }
            Message::UpdateContextMenu { rate } => {
                self.sync_context_menu(*rate).await;
                None
            }
            Message::GetTabId => {
                let tab_id = sender.tab_id?;
                serde_json::to_value(TabIdReply { tab_id }).ok()
            }
            Message::Set { .. } | Message::SetSpecific { .. } | Message::Retrieve => {
                log::debug!("{} is addressed to content scripts, ignoring", message.action());
                None
            }
            Message::Unknown => None,
        }
    }

    /// Show `rate` on the tab's badge when badges are enabled, and always
    /// persist it so the popup can sync later.
    pub async fn update_badge(&self, tab_id: TabId, rate: f64) {
        if storage::read_badge_enabled(self.platform.sync_store()).await {
            let action = self.platform.action();
            if let Err(e) = action.set_badge_text(tab_id, &format_rate(rate)).await {
                log::debug!("Failed to set badge for tab {}: {}", tab_id, e);
            }
            if let Err(e) = action.set_badge_background_color(tab_id, BADGE_COLOR).await {
                log::debug!("Failed to set badge color for tab {}: {}", tab_id, e);
            }
        }

        if let Err(e) = storage::write_tab_rate(self.platform.local_store(), tab_id, rate).await {
            log::warn!("Failed to persist rate for tab {}: {}", tab_id, e);
        }
    }

    // =========================================================================
    // Lifecycle Events
    // =========================================================================

    /// `storage.onChanged`: turning badges off clears them everywhere.
    ///
    /// Turning them back on repaints nothing; badges return with the next
    /// rate report.
    pub async fn on_storage_changed(&self, area: StorageArea, changes: &StorageChanges) {
        let changed = PrefChanges::classify(area, changes);
        if changed.intersects(PrefChanges::DEFAULTS | PrefChanges::THEME) {
            log::debug!("Preferences changed: {:?}", changed);
        }
        if changed.intersects(PrefChanges::TAB_RATE | PrefChanges::CONTEXT_MENU) {
            log::trace!("Per-tab state changed in {:?} storage", area);
        }
        if !changed.contains(PrefChanges::BADGE_ENABLED) {
            return;
        }

        let disabled = changes
            .get(storage::keys::BADGE_ENABLED)
            .and_then(|change| change.new_value.as_ref())
            .and_then(Value::as_bool)
            == Some(false);
        if !disabled {
            return;
        }

        match self.platform.tabs().query_tabs().await {
            Ok(tabs) => {
                for tab in tabs {
                    self.clear_badge(tab.id).await;
                }
            }
            Err(e) => log::warn!("Failed to list tabs for badge reset: {}", e),
        }
    }

    /// `tabs.onRemoved`: drop the tab's persisted rate.
    pub async fn on_tab_removed(&self, tab_id: TabId) {
        if let Err(e) = storage::remove_tab_rate(self.platform.local_store(), tab_id).await {
            log::warn!("Failed to drop rate for closed tab {}: {}", tab_id, e);
        }
    }

    /// `webNavigation.onBeforeNavigate`: clear the badge of a main-frame
    /// navigation. Subframe navigations are ignored.
    pub async fn on_navigation_started(&self, tab_id: TabId, frame_id: FrameId) {
        if frame_id == MAIN_FRAME_ID {
            self.clear_badge(tab_id).await;
        }
    }

    async fn clear_badge(&self, tab_id: TabId) {
        if let Err(e) = self.platform.action().set_badge_text(tab_id, "").await {
            log::debug!("Failed to clear badge for tab {}: {}", tab_id, e);
        }
    }
}

/// Menu option whose rate is closest to `rate`.
///
/// Linear scan keeping the first option with the smallest distance, so an
/// exact midpoint resolves to the lower-indexed (lower-rate) option.
pub fn find_closest_option(rate: f64, options: &[MenuOption]) -> Option<&MenuOption> {
    let mut closest = options.first()?;
    let mut min_diff = (closest.rate - rate).abs();

    for option in &options[1..] {
        let diff = (option.rate - rate).abs();
        if diff < min_diff {
            closest = option;
            min_diff = diff;
        }
    }
    Some(closest)
}
