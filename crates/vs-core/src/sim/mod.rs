//! In-process simulated browser
//!
//! Wires one [`Coordinator`], a [`ContentRuntime`] per injected tab and the
//! popup together over in-memory storage, messaging, badge and menu
//! implementations. Page events (`ratechange`, `loadstart`) are queued by
//! the simulated elements and dispatched by [`SimBrowser::run_until_idle`],
//! the way an event loop would.
//!
//! Every coordinator event is handled by a freshly built [`Coordinator`],
//! so nothing can survive in memory between two events, just as nothing
//! survives a service worker eviction.

mod host;
mod page;

pub use host::{BackgroundHost, ContentHost, PopupHost};
pub use page::{PageEvent, SimPage, SimVideo};

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::content::{ContentRuntime, RuntimeConfig, RuntimeState};
use crate::coordinator::{Coordinator, MenuClick, MessageSender, TabStatus};
use crate::message::Message;
use crate::messaging::TransportError;
use crate::options::{OptionsController, OptionsError};
use crate::platform::{Destination, VideoHandle};
use crate::popup::PopupController;
use crate::storage::{self, MemoryStore, StorageArea};
use crate::types::{Defaults, TabId, TabInfo, MAIN_FRAME_ID};

/// Upper bound on events dispatched by one `run_until_idle` call.
const MAX_EVENT_TURNS: usize = 10_000;

/// Badge state of one tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub text: String,
    pub color: Option<String>,
}

/// One context-menu radio entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
    pub rate: f64,
    pub checked: bool,
}

struct TabSlot {
    url: String,
    page: Rc<SimPage>,
    runtime: Option<Rc<ContentRuntime<ContentHost>>>,
}

pub(crate) struct BrowserState {
    sync: Rc<MemoryStore>,
    local: Rc<MemoryStore>,
    config: RuntimeConfig,
    tabs: RefCell<BTreeMap<TabId, TabSlot>>,
    next_tab_id: Cell<TabId>,
    active_tab: Cell<Option<TabId>>,
    badges: RefCell<BTreeMap<TabId, Badge>>,
    menu: RefCell<Vec<MenuEntry>>,
    injections: Cell<usize>,
    received: RefCell<BTreeMap<String, usize>>,
}

impl BrowserState {
    fn background_host(state: &Rc<Self>) -> BackgroundHost {
        BackgroundHost {
            browser: Rc::downgrade(state),
            sync: state.sync.clone(),
            local: state.local.clone(),
        }
    }

    fn coordinator(state: &Rc<Self>) -> Coordinator<BackgroundHost> {
        Coordinator::new(Self::background_host(state))
    }

    fn runtime(&self, tab_id: TabId) -> Option<Rc<ContentRuntime<ContentHost>>> {
        self.tabs.borrow().get(&tab_id)?.runtime.clone()
    }

    /// The tab's runtime, creating it on first injection.
    ///
    /// Re-injecting into the same document reuses the runtime, since the
    /// script's isolated world outlives a single injection.
    fn runtime_or_create(state: &Rc<Self>, tab_id: TabId) -> Option<Rc<ContentRuntime<ContentHost>>> {
        let mut tabs = state.tabs.borrow_mut();
        let slot = tabs.get_mut(&tab_id)?;
        if let Some(runtime) = &slot.runtime {
            return Some(runtime.clone());
        }

        let host = ContentHost {
            browser: Rc::downgrade(state),
            tab_id,
            page: slot.page.clone(),
            sync: state.sync.clone(),
            local: state.local.clone(),
        };
        let runtime = Rc::new(ContentRuntime::new(host, state.config));
        slot.runtime = Some(runtime.clone());
        Some(runtime)
    }

    fn page(&self, tab_id: TabId) -> Option<Rc<SimPage>> {
        self.tabs.borrow().get(&tab_id).map(|slot| slot.page.clone())
    }

    fn tab_url(&self, tab_id: TabId) -> Option<String> {
        self.tabs.borrow().get(&tab_id).map(|slot| slot.url.clone())
    }

    fn tab_infos(&self) -> Vec<TabInfo> {
        let active = self.active_tab.get();
        self.tabs
            .borrow()
            .iter()
            .map(|(&id, slot)| TabInfo {
                id,
                url: Some(slot.url.clone()),
                active: active == Some(id),
            })
            .collect()
    }

    fn count_message(&self, to: Destination, message: &Message) {
        if to == Destination::Coordinator {
            *self.received.borrow_mut().entry(message.action().to_string()).or_insert(0) += 1;
        }
    }
}

/// Serializable view of the whole browser.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimSnapshot {
    pub tabs: Vec<TabSnapshot>,
    pub checked_menu_item: Option<String>,
    pub sync_storage: BTreeMap<String, Value>,
    pub local_storage: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: TabId,
    pub url: String,
    pub active: bool,
    pub injected: bool,
    pub badge: Option<Badge>,
    pub videos: Vec<VideoSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnapshot {
    pub src: String,
    pub playback_rate: f64,
}

/// The simulated browser with the extension installed.
pub struct SimBrowser {
    state: Rc<BrowserState>,
}

impl Default for SimBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBrowser {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            state: Rc::new(BrowserState {
                sync: Rc::new(MemoryStore::new()),
                local: Rc::new(MemoryStore::new()),
                config,
                tabs: RefCell::new(BTreeMap::new()),
                next_tab_id: Cell::new(1),
                active_tab: Cell::new(None),
                badges: RefCell::new(BTreeMap::new()),
                menu: RefCell::new(Vec::new()),
                injections: Cell::new(0),
                received: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    pub fn sync_store(&self) -> &MemoryStore {
        &self.state.sync
    }

    pub fn local_store(&self) -> &MemoryStore {
        &self.state.local
    }

    /// A coordinator for one event, as a freshly started service worker.
    pub fn coordinator(&self) -> Coordinator<BackgroundHost> {
        BrowserState::coordinator(&self.state)
    }

    /// A popup bound to nothing until opened.
    pub fn popup(&self) -> PopupController<PopupHost> {
        PopupController::new(PopupHost {
            background: BrowserState::background_host(&self.state),
        })
    }

    pub fn options(&self) -> OptionsController<'_> {
        OptionsController::new(&*self.state.sync)
    }

    // =========================================================================
    // Extension Lifecycle
    // =========================================================================

    pub async fn install(&self) {
        self.coordinator().on_installed().await;
        self.run_until_idle().await;
    }

    // =========================================================================
    // Tabs
    // =========================================================================

    /// Add a tab that was open before the extension existed. No events fire.
    pub fn add_existing_tab(&self, url: &str, video_srcs: &[&str]) -> TabId {
        let tab_id = self.state.next_tab_id.get();
        self.state.next_tab_id.set(tab_id + 1);
        self.state.tabs.borrow_mut().insert(
            tab_id,
            TabSlot {
                url: url.to_string(),
                page: Rc::new(SimPage::with_videos(video_srcs)),
                runtime: None,
            },
        );
        self.state.active_tab.set(Some(tab_id));
        tab_id
    }

    /// Open a tab, load `url` and let the coordinator react.
    pub async fn open_tab(&self, url: &str, video_srcs: &[&str]) -> TabId {
        let tab_id = self.add_existing_tab(url, video_srcs);
        let coordinator = self.coordinator();
        coordinator.on_navigation_started(tab_id, MAIN_FRAME_ID).await;
        coordinator.on_tab_updated(tab_id, TabStatus::Complete).await;
        self.run_until_idle().await;
        tab_id
    }

    /// Main-frame navigation to a new document.
    pub async fn navigate(&self, tab_id: TabId, url: &str, video_srcs: &[&str]) -> bool {
        let Some(old_runtime) = self.state.tabs.borrow().get(&tab_id).map(|slot| slot.runtime.clone()) else {
            return false;
        };
        if let Some(runtime) = old_runtime {
            runtime.on_page_hide();
        }

        self.coordinator().on_navigation_started(tab_id, MAIN_FRAME_ID).await;
        if let Some(slot) = self.state.tabs.borrow_mut().get_mut(&tab_id) {
            slot.url = url.to_string();
            slot.page = Rc::new(SimPage::with_videos(video_srcs));
            slot.runtime = None;
        }
        self.coordinator().on_tab_updated(tab_id, TabStatus::Complete).await;
        self.run_until_idle().await;
        true
    }

    /// An iframe of the tab starts navigating.
    pub async fn navigate_subframe(&self, tab_id: TabId, frame_id: i32) {
        self.coordinator().on_navigation_started(tab_id, frame_id).await;
        self.run_until_idle().await;
    }

    /// Fire another "complete" update, re-injecting the content script.
    pub async fn reinject(&self, tab_id: TabId) {
        self.coordinator().on_tab_updated(tab_id, TabStatus::Complete).await;
        self.run_until_idle().await;
    }

    pub async fn close_tab(&self, tab_id: TabId) -> bool {
        let removed = self.state.tabs.borrow_mut().remove(&tab_id);
        if removed.is_none() {
            return false;
        }
        self.state.badges.borrow_mut().remove(&tab_id);
        if self.state.active_tab.get() == Some(tab_id) {
            self.state.active_tab.set(None);
        }
        self.coordinator().on_tab_removed(tab_id).await;
        self.run_until_idle().await;
        true
    }

    pub fn activate(&self, tab_id: TabId) -> bool {
        if self.state.tab_url(tab_id).is_none() {
            return false;
        }
        self.state.active_tab.set(Some(tab_id));
        true
    }

    // =========================================================================
    // Page Interaction
    // =========================================================================

    /// Insert a video into the tab's document. Returns its index.
    pub async fn add_video(&self, tab_id: TabId, src: &str) -> Option<usize> {
        let page = self.state.page(tab_id)?;
        let video = SimVideo::new(src);
        page.push_video(video.clone());

        if page.active_observers() > 0 {
            if let Some(runtime) = self.state.runtime(tab_id) {
                runtime.on_videos_added(std::slice::from_ref(&video));
            }
        }
        video.begin_load();
        self.run_until_idle().await;
        Some(page.video_count() - 1)
    }

    /// The user changes a video's rate through its native controls.
    pub async fn set_native_rate(&self, tab_id: TabId, index: usize, rate: f64) -> bool {
        let Some(video) = self.video(tab_id, index) else {
            return false;
        };
        video.set_playback_rate(rate);
        self.run_until_idle().await;
        true
    }

    /// The page swaps a video's source (e.g. single-page-app navigation).
    pub async fn change_source(&self, tab_id: TabId, index: usize, src: &str) -> bool {
        let Some(video) = self.video(tab_id, index) else {
            return false;
        };
        video.change_source(src);
        self.run_until_idle().await;
        true
    }

    /// Right-click on a video; the content script sees `contextmenu`.
    pub async fn right_click_video(&self, tab_id: TabId, index: usize) -> bool {
        let (Some(video), Some(runtime)) = (self.video(tab_id, index), self.state.runtime(tab_id)) else {
            return false;
        };
        runtime.on_context_menu(Some(&video)).await;
        self.run_until_idle().await;
        true
    }

    /// Click one of the extension's context-menu entries.
    pub async fn click_menu_item(&self, tab_id: TabId, menu_item_id: &str, src_url: Option<&str>) {
        let click = MenuClick {
            menu_item_id: menu_item_id.to_string(),
            src_url: src_url.map(str::to_string),
            frame_id: Some(MAIN_FRAME_ID),
        };
        self.coordinator().on_menu_clicked(&click, Some(tab_id)).await;
        self.run_until_idle().await;
    }

    /// Send a message to a tab from an extension page.
    pub async fn send_to_tab(&self, tab_id: TabId, message: &Message) -> Result<Option<Value>, TransportError> {
        let result = host::route(
            &Rc::downgrade(&self.state),
            MessageSender::default(),
            Destination::Tab(tab_id),
            message,
        )
        .await;
        self.run_until_idle().await;
        result
    }

    // =========================================================================
    // Preferences
    // =========================================================================

    pub async fn set_defaults(&self, enabled: bool, rate: f64) -> Result<Defaults, OptionsError> {
        let defaults = self.options().save_defaults(enabled, rate).await?;
        self.run_until_idle().await;
        Ok(defaults)
    }

    pub async fn set_badge_enabled(&self, enabled: bool) -> Result<(), OptionsError> {
        self.options().set_badge_enabled(enabled).await?;
        self.run_until_idle().await;
        Ok(())
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Dispatch queued page events and storage notifications until none remain.
    pub async fn run_until_idle(&self) {
        for _ in 0..MAX_EVENT_TURNS {
            self.flush_storage_changes().await;
            let Some((tab_id, event)) = self.next_event() else {
                return;
            };
            self.dispatch(tab_id, event).await;
        }
        log::warn!("Simulated event loop did not settle after {} turns", MAX_EVENT_TURNS);
    }

    fn next_event(&self) -> Option<(TabId, PageEvent)> {
        self.state
            .tabs
            .borrow()
            .iter()
            .find_map(|(&tab_id, slot)| slot.page.take_event().map(|event| (tab_id, event)))
    }

    async fn dispatch(&self, tab_id: TabId, event: PageEvent) {
        let Some(runtime) = self.state.runtime(tab_id) else {
            return;
        };
        match event {
            PageEvent::RateChange(video) => {
                for _ in 0..video.listener_count() {
                    runtime.on_rate_change(&video).await;
                }
            }
            PageEvent::LoadStart(video) => {
                for _ in 0..video.listener_count() {
                    runtime.on_load_start(&video).await;
                }
            }
        }
    }

    async fn flush_storage_changes(&self) {
        for (area, store) in [(StorageArea::Sync, &self.state.sync), (StorageArea::Local, &self.state.local)] {
            let changes = store.take_changes();
            if !changes.is_empty() {
                self.coordinator().on_storage_changed(area, &changes).await;
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.state.tabs.borrow().keys().copied().collect()
    }

    pub fn page(&self, tab_id: TabId) -> Option<Rc<SimPage>> {
        self.state.page(tab_id)
    }

    pub fn video(&self, tab_id: TabId, index: usize) -> Option<SimVideo> {
        self.state.page(tab_id)?.video(index)
    }

    pub fn video_rate(&self, tab_id: TabId, index: usize) -> Option<f64> {
        self.video(tab_id, index).map(|video| video.playback_rate())
    }

    pub fn runtime_state(&self, tab_id: TabId) -> Option<RuntimeState> {
        self.state.runtime(tab_id).map(|runtime| runtime.state())
    }

    pub fn badge(&self, tab_id: TabId) -> Option<Badge> {
        self.state.badges.borrow().get(&tab_id).cloned()
    }

    /// Badge text of a tab; empty when nothing was ever shown.
    pub fn badge_text(&self, tab_id: TabId) -> String {
        self.badge(tab_id).map(|badge| badge.text).unwrap_or_default()
    }

    pub fn menu(&self) -> Vec<MenuEntry> {
        self.state.menu.borrow().clone()
    }

    pub fn checked_menu_item(&self) -> Option<String> {
        self.state
            .menu
            .borrow()
            .iter()
            .find(|entry| entry.checked)
            .map(|entry| entry.id.clone())
    }

    /// Rate persisted for a tab in the local tier, if any.
    pub fn stored_tab_rate(&self, tab_id: TabId) -> Option<f64> {
        self.state
            .local
            .peek(&storage::tab_rate_key(tab_id))
            .and_then(|value| value.as_f64())
    }

    /// Messages the coordinator received with this action.
    pub fn coordinator_received(&self, action: &str) -> usize {
        self.state.received.borrow().get(action).copied().unwrap_or(0)
    }

    /// Content script injections that reached a page.
    pub fn injection_count(&self) -> usize {
        self.state.injections.get()
    }

    pub fn snapshot(&self) -> SimSnapshot {
        let active = self.state.active_tab.get();
        let badges = self.state.badges.borrow();
        let tabs = self
            .state
            .tabs
            .borrow()
            .iter()
            .map(|(&id, slot)| TabSnapshot {
                id,
                url: slot.url.clone(),
                active: active == Some(id),
                injected: slot.runtime.is_some(),
                badge: badges.get(&id).cloned(),
                videos: (0..slot.page.video_count())
                    .filter_map(|i| slot.page.video(i))
                    .map(|video| VideoSnapshot {
                        src: video.src(),
                        playback_rate: video.playback_rate(),
                    })
                    .collect(),
            })
            .collect();

        SimSnapshot {
            tabs,
            checked_menu_item: self.checked_menu_item(),
            sync_storage: self.state.sync.snapshot(),
            local_storage: self.state.local.snapshot(),
        }
    }
}
