//! Capability traits for the browser facilities the extension consumes.
//!
//! The core never talks to a browser directly. Each execution context is
//! handed a platform bundle ([`ContentPlatform`], [`BackgroundPlatform`],
//! [`PopupPlatform`]) that exposes just the capabilities it may use.
//! All calls are asynchronous and single-threaded, hence `?Send`.

use async_trait::async_trait;
use serde_json::Value;

use crate::message::Message;
use crate::messaging::TransportError;
use crate::storage::StorageError;
use crate::types::{MenuOption, ScriptTarget, SetRateScript, TabId, TabInfo};

/// Error type for tab, badge and menu calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("No tab with id {0}")]
    NoSuchTab(TabId),
    #[error("{api} failed: {reason}")]
    CallFailed { api: &'static str, reason: String },
}

// =============================================================================
// Storage and Messaging
// =============================================================================

/// One persistence tier. Last write wins per key; there are no transactions.
#[async_trait(?Send)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Receiver of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The background coordinator
    Coordinator,
    /// Every content script of a tab
    Tab(TabId),
}

/// Raw extension messaging channel.
///
/// `Ok(None)` means a receiver took the message without answering.
/// Callers go through [`crate::messaging::notify`] and
/// [`crate::messaging::request`] rather than calling this directly.
#[async_trait(?Send)]
pub trait MessageTransport {
    async fn deliver(&self, to: Destination, message: &Message) -> Result<Option<Value>, TransportError>;
}

// =============================================================================
// Tabs, Badge, Context Menu
// =============================================================================

#[async_trait(?Send)]
pub trait TabsApi {
    /// Every open tab.
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, PlatformError>;

    /// Active tab of the focused window.
    async fn active_tab(&self) -> Result<Option<TabInfo>, PlatformError>;

    /// Inject the content script into all frames of a tab.
    async fn inject_content_script(&self, tab_id: TabId) -> Result<(), PlatformError>;

    /// Run a rate-setting script directly in one frame of a tab.
    async fn execute_set_rate(&self, target: ScriptTarget, script: &SetRateScript) -> Result<(), PlatformError>;
}

#[async_trait(?Send)]
pub trait ActionApi {
    async fn set_badge_text(&self, tab_id: TabId, text: &str) -> Result<(), PlatformError>;
    async fn set_badge_background_color(&self, tab_id: TabId, color: &str) -> Result<(), PlatformError>;
}

#[async_trait(?Send)]
pub trait ContextMenuApi {
    async fn remove_all(&self) -> Result<(), PlatformError>;
    /// Create one entry of the mutually exclusive radio group.
    async fn create_radio_item(&self, option: &MenuOption, checked: bool) -> Result<(), PlatformError>;
    async fn set_checked(&self, id: &str, checked: bool) -> Result<(), PlatformError>;
}

// =============================================================================
// Page DOM
// =============================================================================

/// A video element of the page.
///
/// Handles are cheap clones referring to the same live element.
pub trait VideoHandle: Clone {
    fn playback_rate(&self) -> f64;
    fn set_playback_rate(&self, rate: f64);
    /// The `src` attribute, empty when absent
    fn src(&self) -> String;
    /// The resolved source currently playing, empty when none
    fn current_src(&self) -> String;
    /// Whether an attribute marker is present on the element.
    fn has_marker(&self, name: &str) -> bool;
    fn set_marker(&self, name: &str);
}

/// A live mutation observer.
pub trait MutationWatch {
    fn disconnect(&self);
}

/// What a mutation observer watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Look inside added subtrees, not only at added nodes
    pub subtree: bool,
    /// Look inside same-origin frames added to the page
    pub frames: bool,
}

/// The content script's view of its document.
pub trait PageDom {
    type Video: VideoHandle;

    /// Every video element, in document order.
    fn videos(&self) -> Vec<Self::Video>;

    /// First video matching a CSS selector.
    fn query_video(&self, selector: &str) -> Option<Self::Video>;

    /// Hook the element's `ratechange` and `loadstart` events up to the
    /// runtime. Called at most once per element.
    fn attach_video_listeners(&self, video: &Self::Video);

    /// Start reporting videos added to the document.
    fn observe_mutations(&self, options: ObserveOptions) -> Box<dyn MutationWatch>;
}

// =============================================================================
// Platform Bundles
// =============================================================================

/// Capabilities of a content script.
pub trait ContentPlatform {
    type Dom: PageDom;

    fn dom(&self) -> &Self::Dom;
    fn sync_store(&self) -> &dyn KeyValueStore;
    fn local_store(&self) -> &dyn KeyValueStore;
    fn transport(&self) -> &dyn MessageTransport;
}

/// Capabilities of the background coordinator.
pub trait BackgroundPlatform {
    fn sync_store(&self) -> &dyn KeyValueStore;
    fn local_store(&self) -> &dyn KeyValueStore;
    fn tabs(&self) -> &dyn TabsApi;
    fn action(&self) -> &dyn ActionApi;
    fn menus(&self) -> &dyn ContextMenuApi;
}

/// Capabilities of the popup.
pub trait PopupPlatform {
    fn sync_store(&self) -> &dyn KeyValueStore;
    fn tabs(&self) -> &dyn TabsApi;
    fn transport(&self) -> &dyn MessageTransport;
}
