//! VideoSpeed Core Library
//!
//! This crate holds the platform-independent half of the VideoSpeed browser
//! extension: the message protocol spoken between the extension's execution
//! contexts and the state machines that run inside each of them.
//!
//! # Architecture
//!
//! Three contexts cooperate without shared memory:
//!
//! - the content script, one per page/frame, which owns the page's videos
//! - the background coordinator, restartable at any point, which owns the
//!   toolbar badge and the context menu
//! - the popup, which lives only while it is open
//!
//! Every browser facility they touch (storage, messaging, tabs, badge,
//! context menu, DOM) is reached through the capability traits in
//! [`platform`], so the same logic runs in the wasm build and in the
//! in-process [`sim`] browser used by tests and the CLI.
//!
//! # Modules
//!
//! - `types`: rates, the context-menu table, preference records
//! - `message`: wire messages and replies
//! - `messaging`: notify/request operations over a transport
//! - `storage`: storage keys, typed accessors, change classification
//! - `platform`: capability traits
//! - `selector`: CSS escaping for attribute selectors
//! - `url`: scheme detection for injectable tabs
//! - `content`: content script runtime
//! - `coordinator`: background coordinator
//! - `popup`: popup controller
//! - `options`: options page controller
//! - `sim`: in-memory browser wiring all contexts together

pub mod content;
pub mod coordinator;
pub mod message;
pub mod messaging;
pub mod options;
pub mod platform;
pub mod popup;
pub mod selector;
pub mod sim;
pub mod storage;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use content::{ContentRuntime, Dispatch, RuntimeConfig, RuntimeState};
pub use coordinator::{find_closest_option, Coordinator, MenuClick, MessageSender, TabStatus};
pub use message::{Message, RetrieveReply, TabIdReply};
pub use messaging::{notify, request, MessageError, TransportError};
pub use options::{OptionsController, OptionsError, Preferences};
pub use popup::{PopupController, PopupView, RateControl};
pub use storage::{MemoryStore, StorageError};
pub use types::{Defaults, MenuOption, TabId, Theme};
