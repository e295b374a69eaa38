//! Content script runtime
//!
//! One runtime lives in every page and frame the content script is injected
//! into. It bridges the live DOM to the message protocol: it applies the
//! persisted default rate, answers popup queries, executes rate changes and
//! reports every rate the page actually ends up with.
//!
//! The coordinator re-injects the script on every completed navigation, so
//! [`ContentRuntime::initialize`] may run several times against the same
//! document. Listener attachment is guarded by a marker attribute on each
//! element and the previous mutation observer is disconnected first.

use std::cell::{Cell, RefCell};

use serde_json::Value;

use crate::message::{Message, RetrieveReply, TabIdReply};
use crate::messaging::{notify, request};
use crate::platform::{
    ContentPlatform, Destination, MutationWatch, ObserveOptions, PageDom, VideoHandle,
};
use crate::selector::video_src_selector;
use crate::storage;
use crate::types::{validate_rate, SetRateScript, TabId, DEFAULT_RATE};

/// Attribute marking a video whose listeners are attached.
pub const LISTENER_MARKER: &str = "data-vs-listening";

/// Lifecycle of one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Initializing,
    Active,
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Handled; no reply is sent
    Handled,
    /// Nothing in this frame could act on the message
    Unhandled,
    /// Handled; the value goes back over the channel
    Reply(Value),
}

/// Runtime configuration.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Descend into same-origin frames added to the page
    pub observe_frames: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { observe_frames: true }
    }
}

pub struct ContentRuntime<P: ContentPlatform> {
    platform: P,
    config: RuntimeConfig,
    state: Cell<RuntimeState>,
    tab_id: Cell<Option<TabId>>,
    observer: RefCell<Option<Box<dyn MutationWatch>>>,
}

impl<P: ContentPlatform> ContentRuntime<P> {
    pub fn new(platform: P, config: RuntimeConfig) -> Self {
        Self {
            platform,
            config,
            state: Cell::new(RuntimeState::Uninitialized),
            tab_id: Cell::new(None),
            observer: RefCell::new(None),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn state(&self) -> RuntimeState {
        self.state.get()
    }

    /// Cached tab id, if one has been resolved during this cycle.
    pub fn cached_tab_id(&self) -> Option<TabId> {
        self.tab_id.get()
    }

    /// Run one initialization cycle. Safe to call again on re-injection.
    pub async fn initialize(&self) {
        self.state.set(RuntimeState::Initializing);
        self.disconnect_observer();
        self.tab_id.set(None);

        let attached = self.attach_all();
        log::debug!("Attached listeners to {} video(s)", attached);

        self.apply_defaults().await;

        let watch = self.platform.dom().observe_mutations(ObserveOptions {
            subtree: true,
            frames: self.config.observe_frames,
        });
        *self.observer.borrow_mut() = Some(watch);

        self.state.set(RuntimeState::Active);
    }

    // =========================================================================
    // Message Handling
    // =========================================================================

    /// Dispatch one incoming message. Replies are produced synchronously.
    pub fn handle_message(&self, message: &Message) -> Dispatch {
        match message {
            Message::Set { rate } => {
                if self.set_all(*rate) {
                    Dispatch::Handled
                } else {
                    Dispatch::Unhandled
                }
            }
            Message::SetSpecific { rate, src_match } => {
                if let Some(video) = find_video_by_src(self.platform.dom(), src_match) {
                    video.set_playback_rate(*rate);
                }
                Dispatch::Handled
            }
            Message::Retrieve => {
                let reply = self.retrieve();
                match serde_json::to_value(reply) {
                    Ok(value) => Dispatch::Reply(value),
                    Err(e) => {
                        log::warn!("Failed to encode RETRIEVE reply: {}", e);
                        Dispatch::Unhandled
                    }
                }
            }
            Message::UpdateUi { .. }
            | Message::UpdateContextMenu { .. }
            | Message::GetTabId
            | Message::Unknown => Dispatch::Unhandled,
        }
    }

    /// Set every video of the document to `rate`. False when there are none.
    fn set_all(&self, rate: f64) -> bool {
        let videos = self.platform.dom().videos();
        for video in &videos {
            video.set_playback_rate(rate);
        }
        !videos.is_empty()
    }

    fn retrieve(&self) -> RetrieveReply {
        let videos = self.platform.dom().videos();
        RetrieveReply {
            playback_rate: videos.first().map_or(DEFAULT_RATE, |v| v.playback_rate()),
            video_count: videos.len() as u32,
        }
    }

    // =========================================================================
    // Listener Attachment
    // =========================================================================

    /// Attach listeners unless a previous cycle already did.
    fn attach(&self, video: &<P::Dom as PageDom>::Video) -> bool {
        if video.has_marker(LISTENER_MARKER) {
            return false;
        }
        video.set_marker(LISTENER_MARKER);
        self.platform.dom().attach_video_listeners(video);
        true
    }

    fn attach_all(&self) -> usize {
        self.platform
            .dom()
            .videos()
            .iter()
            .filter(|video| self.attach(video))
            .count()
    }

    /// Mutation observer callback: videos appeared in the document.
    pub fn on_videos_added(&self, videos: &[<P::Dom as PageDom>::Video]) {
        let attached = videos.iter().filter(|video| self.attach(video)).count();
        if attached > 0 {
            log::debug!("Attached listeners to {} new video(s)", attached);
        }
    }

    // =========================================================================
    // Element Events
    // =========================================================================

    /// `ratechange`: persist the tab's rate and report it upward.
    pub async fn on_rate_change(&self, video: &<P::Dom as PageDom>::Video) {
        let rate = video.playback_rate();

        match self.resolve_tab_id().await {
            Some(tab_id) => {
                if let Err(e) = storage::write_tab_rate(self.platform.local_store(), tab_id, rate).await {
                    log::warn!("Failed to persist rate for tab {}: {}", tab_id, e);
                }
            }
            None => log::debug!("Tab id unavailable, skipping local rate write"),
        }

        self.report(rate).await;
    }

    /// `loadstart`: the browser reset the rate to 1 on a source change.
    pub async fn on_load_start(&self, video: &<P::Dom as PageDom>::Video) {
        if let Some(rate) = self.default_rate().await {
            video.set_playback_rate(rate);
        }
    }

    /// `contextmenu`: highlight the clicked video's rate before the menu opens.
    pub async fn on_context_menu(&self, target: Option<&<P::Dom as PageDom>::Video>) {
        let Some(video) = target else {
            return;
        };
        let message = Message::UpdateContextMenu {
            rate: video.playback_rate(),
        };
        notify(self.platform.transport(), Destination::Coordinator, &message).await;
    }

    /// `pagehide`: drop the observer before the page enters the back/forward cache.
    pub fn on_page_hide(&self) {
        self.disconnect_observer();
    }

    fn disconnect_observer(&self) {
        let stale = self.observer.borrow_mut().take();
        if let Some(watch) = stale {
            watch.disconnect();
        }
    }

    // =========================================================================
    // Defaults and Reporting
    // =========================================================================

    /// Apply the persisted default rate to every current video.
    ///
    /// Returns the applied rate, or None when defaults are disabled or the
    /// document has no video.
    pub async fn apply_defaults(&self) -> Option<f64> {
        let rate = self.default_rate().await?;
        if !self.set_all(rate) {
            return None;
        }
        self.report(rate).await;
        Some(rate)
    }

    /// The enabled default rate. A stored rate outside the accepted range
    /// was not written by this extension's options page and is ignored.
    async fn default_rate(&self) -> Option<f64> {
        let defaults = storage::read_defaults(self.platform.sync_store()).await;
        if !defaults.enabled {
            return None;
        }
        match validate_rate(defaults.playback_rate) {
            Ok(rate) => Some(rate),
            Err(e) => {
                log::warn!("Ignoring stored default rate: {}", e);
                None
            }
        }
    }

    async fn report(&self, rate: f64) {
        let message = Message::UpdateUi { rate, tab_id: None };
        notify(self.platform.transport(), Destination::Coordinator, &message).await;
    }

    /// Ask the coordinator for our tab id, once per cycle.
    pub async fn resolve_tab_id(&self) -> Option<TabId> {
        if let Some(tab_id) = self.tab_id.get() {
            return Some(tab_id);
        }

        match request::<TabIdReply>(self.platform.transport(), Destination::Coordinator, &Message::GetTabId).await {
            Ok(reply) => {
                self.tab_id.set(Some(reply.tab_id));
                Some(reply.tab_id)
            }
            Err(e) => {
                log::debug!("Tab id lookup failed: {}", e);
                None
            }
        }
    }
}

/// First video whose `src` attribute, or failing that whose resolved
/// `currentSrc`, equals `src`.
pub fn find_video_by_src<D: PageDom>(dom: &D, src: &str) -> Option<D::Video> {
    dom.query_video(&video_src_selector(src))
        .or_else(|| dom.videos().into_iter().find(|v| v.current_src() == src))
}

/// Body of the script the coordinator runs on a context-menu click.
///
/// Returns whether a video was found.
pub fn apply_set_rate_script<D: PageDom>(dom: &D, script: &SetRateScript) -> bool {
    let target = script
        .src_match
        .as_deref()
        .filter(|src| !src.is_empty())
        .and_then(|src| find_video_by_src(dom, src))
        .or_else(|| dom.videos().into_iter().next());

    match target {
        Some(video) => {
            video.set_playback_rate(script.rate);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPage, SimVideo};

    fn page(srcs: &[&str]) -> SimPage {
        let page = SimPage::new();
        for src in srcs {
            page.push_video(SimVideo::new(src));
        }
        page
    }

    #[test]
    fn test_find_video_by_src() {
        let page = page(&["a.mp4", "b \"odd\".mp4", "a.mp4"]);
        let found = find_video_by_src(&page, "b \"odd\".mp4").unwrap();
        assert_eq!(found.src(), "b \"odd\".mp4");

        let first = find_video_by_src(&page, "a.mp4").unwrap();
        assert!(first.same_element(&page.video(0).unwrap()));

        assert!(find_video_by_src(&page, "missing.mp4").is_none());
    }

    #[test]
    fn test_find_video_by_current_src() {
        let page = page(&[""]);
        page.video(0).unwrap().set_current_src("https://cdn.test/stream.m3u8");
        assert!(find_video_by_src(&page, "https://cdn.test/stream.m3u8").is_some());
    }

    #[test]
    fn test_set_rate_script_falls_back_to_first_video() {
        let page = page(&["a.mp4", "b.mp4"]);

        let script = SetRateScript { rate: 2.0, src_match: Some("b.mp4".into()) };
        assert!(apply_set_rate_script(&page, &script));
        assert_eq!(page.video(1).unwrap().playback_rate(), 2.0);
        assert_eq!(page.video(0).unwrap().playback_rate(), 1.0);

        let script = SetRateScript { rate: 3.0, src_match: Some("nope.mp4".into()) };
        assert!(apply_set_rate_script(&page, &script));
        assert_eq!(page.video(0).unwrap().playback_rate(), 3.0);

        let empty = SimPage::new();
        assert!(!apply_set_rate_script(&empty, &script));
    }
}
