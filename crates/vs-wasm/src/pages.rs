//! Popup and options page entry points.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use wasm_bindgen::prelude::*;

use vs_core::storage::StorageArea;
use vs_core::types::{parse_rate, Theme};
use vs_core::{OptionsController, PopupController};

use crate::host::{to_js, ExtensionHost, JsStore, PopupHost};

thread_local! {
    static POPUP: RefCell<Option<Rc<PopupController<PopupHost>>>> = const { RefCell::new(None) };
}

fn encode<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let value: Value = serde_json::to_value(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    to_js(&value).map_err(|e| JsValue::from_str(&e))
}

// =============================================================================
// Popup
// =============================================================================

/// Bind the popup to the active tab. Resolves to `{theme, control}`, with
/// `control` null when the tab has no content script.
#[wasm_bindgen]
pub async fn popup_open(host: ExtensionHost) -> Result<JsValue, JsValue> {
    let popup = Rc::new(PopupController::new(PopupHost::new(host)));
    POPUP.with(|slot| *slot.borrow_mut() = Some(popup.clone()));
    let view = popup.open().await;
    encode(&view)
}

/// Slider `input` event.
#[wasm_bindgen]
pub async fn popup_input(value: String) -> Result<(), JsValue> {
    let rate = parse_rate(&value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let Some(popup) = POPUP.with(|slot| slot.borrow().clone()) else {
        return Err(JsValue::from_str("Popup is not open"));
    };
    popup
        .on_input(rate)
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

// =============================================================================
// Options
// =============================================================================

#[wasm_bindgen]
pub async fn options_load(host: ExtensionHost) -> Result<JsValue, JsValue> {
    let sync = JsStore::new(host, StorageArea::Sync);
    let prefs = OptionsController::new(&sync).load().await;
    encode(&prefs)
}

#[wasm_bindgen]
pub async fn options_save_defaults(host: ExtensionHost, enabled: bool, rate: String) -> Result<JsValue, JsValue> {
    let rate = parse_rate(&rate).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let sync = JsStore::new(host, StorageArea::Sync);
    let defaults = OptionsController::new(&sync)
        .save_defaults(enabled, rate)
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    encode(&defaults)
}

#[wasm_bindgen]
pub async fn options_set_badge_enabled(host: ExtensionHost, enabled: bool) -> Result<(), JsValue> {
    let sync = JsStore::new(host, StorageArea::Sync);
    OptionsController::new(&sync)
        .set_badge_enabled(enabled)
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub async fn options_set_theme(host: ExtensionHost, theme: String) -> Result<(), JsValue> {
    let sync = JsStore::new(host, StorageArea::Sync);
    OptionsController::new(&sync)
        .set_theme(&Theme(theme))
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))
}
