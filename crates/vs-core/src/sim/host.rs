//! Platform bundles handed to each simulated context.

use std::rc::{Rc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use super::page::SimPage;
use super::{BrowserState, MenuEntry};
use crate::content::{apply_set_rate_script, Dispatch};
use crate::coordinator::MessageSender;
use crate::message::Message;
use crate::messaging::TransportError;
use crate::platform::{
    ActionApi, BackgroundPlatform, ContentPlatform, ContextMenuApi, Destination, KeyValueStore,
    MessageTransport, PlatformError, PopupPlatform, TabsApi,
};
use crate::storage::MemoryStore;
use crate::types::{MenuOption, ScriptTarget, SetRateScript, TabId, TabInfo};
use crate::url::is_injectable;

/// Deliver a message the way the browser's messaging layer would.
pub(super) async fn route(
    browser: &Weak<BrowserState>,
    sender: MessageSender,
    to: Destination,
    message: &Message,
) -> Result<Option<Value>, TransportError> {
    let state = browser
        .upgrade()
        .ok_or_else(|| TransportError::Failed("browser shut down".to_string()))?;
    state.count_message(to, message);

    match to {
        Destination::Coordinator => Ok(BrowserState::coordinator(&state).on_message(message, sender).await),
        Destination::Tab(tab_id) => {
            let runtime = state.runtime(tab_id).ok_or(TransportError::NoReceiver)?;
            match runtime.handle_message(message) {
                Dispatch::Reply(reply) => Ok(Some(reply)),
                Dispatch::Handled | Dispatch::Unhandled => Ok(None),
            }
        }
    }
}

// =============================================================================
// Content Script
// =============================================================================

/// Capabilities of the content script injected into one tab.
pub struct ContentHost {
    pub(super) browser: Weak<BrowserState>,
    pub(super) tab_id: TabId,
    pub(super) page: Rc<SimPage>,
    pub(super) sync: Rc<MemoryStore>,
    pub(super) local: Rc<MemoryStore>,
}

impl ContentPlatform for ContentHost {
    type Dom = SimPage;

    fn dom(&self) -> &SimPage {
        &self.page
    }

    fn sync_store(&self) -> &dyn KeyValueStore {
        &*self.sync
    }

    fn local_store(&self) -> &dyn KeyValueStore {
        &*self.local
    }

    fn transport(&self) -> &dyn MessageTransport {
        self
    }
}

#[async_trait(?Send)]
impl MessageTransport for ContentHost {
    async fn deliver(&self, to: Destination, message: &Message) -> Result<Option<Value>, TransportError> {
        route(&self.browser, MessageSender::tab(self.tab_id), to, message).await
    }
}

// =============================================================================
// Background Coordinator
// =============================================================================

/// Capabilities of the service worker.
pub struct BackgroundHost {
    pub(super) browser: Weak<BrowserState>,
    pub(super) sync: Rc<MemoryStore>,
    pub(super) local: Rc<MemoryStore>,
}

impl BackgroundHost {
    fn state(&self) -> Result<Rc<BrowserState>, PlatformError> {
        self.browser.upgrade().ok_or(PlatformError::CallFailed {
            api: "runtime",
            reason: "browser shut down".to_string(),
        })
    }
}

impl BackgroundPlatform for BackgroundHost {
    fn sync_store(&self) -> &dyn KeyValueStore {
        &*self.sync
    }

    fn local_store(&self) -> &dyn KeyValueStore {
        &*self.local
    }

    fn tabs(&self) -> &dyn TabsApi {
        self
    }

    fn action(&self) -> &dyn ActionApi {
        self
    }

    fn menus(&self) -> &dyn ContextMenuApi {
        self
    }
}

#[async_trait(?Send)]
impl TabsApi for BackgroundHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, PlatformError> {
        Ok(self.state()?.tab_infos())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, PlatformError> {
        Ok(self.state()?.tab_infos().into_iter().find(|tab| tab.active))
    }

    async fn inject_content_script(&self, tab_id: TabId) -> Result<(), PlatformError> {
        let state = self.state()?;
        let url = state.tab_url(tab_id).ok_or(PlatformError::NoSuchTab(tab_id))?;
        if !is_injectable(&url) {
            return Err(PlatformError::CallFailed {
                api: "scripting.executeScript",
                reason: format!("Cannot access contents of {}", url),
            });
        }

        let runtime = BrowserState::runtime_or_create(&state, tab_id).ok_or(PlatformError::NoSuchTab(tab_id))?;
        state.injections.set(state.injections.get() + 1);
        runtime.initialize().await;
        Ok(())
    }

    async fn execute_set_rate(&self, target: ScriptTarget, script: &SetRateScript) -> Result<(), PlatformError> {
        let state = self.state()?;
        let url = state.tab_url(target.tab_id).ok_or(PlatformError::NoSuchTab(target.tab_id))?;
        if !is_injectable(&url) {
            return Err(PlatformError::CallFailed {
                api: "scripting.executeScript",
                reason: format!("Cannot access contents of {}", url),
            });
        }
        let page = state.page(target.tab_id).ok_or(PlatformError::NoSuchTab(target.tab_id))?;
        if !apply_set_rate_script(&*page, script) {
            log::debug!("No video in tab {} for rate script", target.tab_id);
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl ActionApi for BackgroundHost {
    async fn set_badge_text(&self, tab_id: TabId, text: &str) -> Result<(), PlatformError> {
        let state = self.state()?;
        if state.tab_url(tab_id).is_none() {
            return Err(PlatformError::NoSuchTab(tab_id));
        }
        state.badges.borrow_mut().entry(tab_id).or_default().text = text.to_string();
        Ok(())
    }

    async fn set_badge_background_color(&self, tab_id: TabId, color: &str) -> Result<(), PlatformError> {
        let state = self.state()?;
        if state.tab_url(tab_id).is_none() {
            return Err(PlatformError::NoSuchTab(tab_id));
        }
        state.badges.borrow_mut().entry(tab_id).or_default().color = Some(color.to_string());
        Ok(())
    }
}

#[async_trait(?Send)]
impl ContextMenuApi for BackgroundHost {
    async fn remove_all(&self) -> Result<(), PlatformError> {
        self.state()?.menu.borrow_mut().clear();
        Ok(())
    }

    async fn create_radio_item(&self, option: &MenuOption, checked: bool) -> Result<(), PlatformError> {
        let state = self.state()?;
        let mut menu = state.menu.borrow_mut();
        if menu.iter().any(|entry| entry.id == option.id) {
            return Err(PlatformError::CallFailed {
                api: "contextMenus.create",
                reason: format!("Cannot create item with duplicate id {}", option.id),
            });
        }
        // Radio items in one group are mutually exclusive.
        if checked {
            menu.iter_mut().for_each(|entry| entry.checked = false);
        }
        menu.push(MenuEntry {
            id: option.id.clone(),
            title: option.title.clone(),
            rate: option.rate,
            checked,
        });
        Ok(())
    }

    async fn set_checked(&self, id: &str, checked: bool) -> Result<(), PlatformError> {
        let state = self.state()?;
        let mut menu = state.menu.borrow_mut();
        let entry = menu
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| PlatformError::CallFailed {
                api: "contextMenus.update",
                reason: format!("Cannot find menu item with id {}", id),
            })?;
        entry.checked = checked;
        Ok(())
    }
}

// =============================================================================
// Popup
// =============================================================================

/// Capabilities of the popup page.
pub struct PopupHost {
    pub(super) background: BackgroundHost,
}

impl PopupPlatform for PopupHost {
    fn sync_store(&self) -> &dyn KeyValueStore {
        &*self.background.sync
    }

    fn tabs(&self) -> &dyn TabsApi {
        &self.background
    }

    fn transport(&self) -> &dyn MessageTransport {
        self
    }
}

#[async_trait(?Send)]
impl MessageTransport for PopupHost {
    async fn deliver(&self, to: Destination, message: &Message) -> Result<Option<Value>, TransportError> {
        route(&self.background.browser, MessageSender::default(), to, message).await
    }
}
