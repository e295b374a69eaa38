//! Popup controller
//!
//! Bound to the active tab for as long as the popup is open. It reads the
//! current rate from the tab's content script and streams every slider
//! movement back as `SET`. It never writes storage or the badge itself:
//! those follow from the content script's `ratechange` report, so they
//! reflect the rate the page actually applied.

use std::cell::Cell;

use serde::Serialize;

use crate::message::{Message, RetrieveReply};
use crate::messaging::{notify, request};
use crate::platform::{Destination, PopupPlatform};
use crate::storage;
use crate::types::{validate_rate, RateError, TabId, Theme};

/// Rate control state shown when the tab has a content script.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateControl {
    pub rate: f64,
    pub video_count: u32,
}

/// What the popup renders on open.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupView {
    pub theme: Theme,
    /// None renders the empty-state message instead of the control
    pub control: Option<RateControl>,
}

pub struct PopupController<P: PopupPlatform> {
    platform: P,
    tab_id: Cell<Option<TabId>>,
}

impl<P: PopupPlatform> PopupController<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            tab_id: Cell::new(None),
        }
    }

    /// Tab the popup is bound to, once opened.
    pub fn tab_id(&self) -> Option<TabId> {
        self.tab_id.get()
    }

    /// Query the active tab and build the initial view.
    ///
    /// There is no timeout: only a missing responder counts as "no content
    /// script", a slow one is simply awaited.
    pub async fn open(&self) -> PopupView {
        let theme = storage::read_theme(self.platform.sync_store()).await;

        let tab_id = match self.platform.tabs().active_tab().await {
            Ok(Some(tab)) => tab.id,
            Ok(None) => return PopupView { theme, control: None },
            Err(e) => {
                log::warn!("Failed to find the active tab: {}", e);
                return PopupView { theme, control: None };
            }
        };
        self.tab_id.set(Some(tab_id));

        let control = match request::<RetrieveReply>(self.platform.transport(), Destination::Tab(tab_id), &Message::Retrieve).await {
            Ok(reply) => Some(RateControl {
                rate: reply.playback_rate,
                video_count: reply.video_count,
            }),
            Err(e) => {
                log::debug!("No content script in tab {}: {}", tab_id, e);
                None
            }
        };

        PopupView { theme, control }
    }

    /// Slider input event: push the value to the tab immediately.
    pub async fn on_input(&self, rate: f64) -> Result<(), RateError> {
        let rate = validate_rate(rate)?;
        let Some(tab_id) = self.tab_id.get() else {
            return Ok(());
        };
        notify(self.platform.transport(), Destination::Tab(tab_id), &Message::Set { rate }).await;
        Ok(())
    }
}
