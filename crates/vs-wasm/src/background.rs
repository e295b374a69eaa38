//! Service worker entry points.
//!
//! Each event builds its own [`Coordinator`], so an eviction between two
//! events loses nothing.

use wasm_bindgen::prelude::*;

use vs_core::storage::{StorageArea, StorageChanges};
use vs_core::{Coordinator, MenuClick, Message, MessageSender, TabStatus};

use crate::host::{from_js, to_js, BackgroundHost, ExtensionHost};

fn coordinator(host: ExtensionHost) -> Coordinator<BackgroundHost> {
    Coordinator::new(BackgroundHost::new(host))
}

#[wasm_bindgen]
pub async fn background_on_installed(host: ExtensionHost) {
    coordinator(host).on_installed().await;
}

#[wasm_bindgen]
pub async fn background_on_tab_updated(host: ExtensionHost, tab_id: i32, status: String) {
    coordinator(host)
        .on_tab_updated(tab_id, TabStatus::from_str(&status))
        .await;
}

#[wasm_bindgen]
pub async fn background_on_menu_clicked(
    host: ExtensionHost,
    menu_item_id: String,
    src_url: Option<String>,
    frame_id: Option<i32>,
    tab_id: Option<i32>,
) {
    let click = MenuClick {
        menu_item_id,
        src_url,
        frame_id,
    };
    coordinator(host).on_menu_clicked(&click, tab_id).await;
}

/// `runtime.onMessage` handler. Resolves to the reply, or `undefined`.
#[wasm_bindgen]
pub async fn background_on_message(
    host: ExtensionHost,
    message: JsValue,
    sender_tab_id: Option<i32>,
    sender_frame_id: Option<i32>,
) -> Result<JsValue, JsValue> {
    let message = from_js(&message).map_or(Message::Unknown, Message::from_value);
    let sender = MessageSender {
        tab_id: sender_tab_id,
        frame_id: sender_frame_id,
    };

    match coordinator(host).on_message(&message, sender).await {
        Some(reply) => to_js(&reply).map_err(|e| JsValue::from_str(&e)),
        None => Ok(JsValue::UNDEFINED),
    }
}

#[wasm_bindgen]
pub async fn background_on_storage_changed(host: ExtensionHost, area: String, changes: JsValue) {
    let area = match area.as_str() {
        "sync" => StorageArea::Sync,
        "local" => StorageArea::Local,
        _ => return,
    };
    let Some(changes) = from_js(&changes).and_then(|value| serde_json::from_value::<StorageChanges>(value).ok()) else {
        log::debug!("Ignoring unreadable storage change");
        return;
    };
    coordinator(host).on_storage_changed(area, &changes).await;
}

#[wasm_bindgen]
pub async fn background_on_tab_removed(host: ExtensionHost, tab_id: i32) {
    coordinator(host).on_tab_removed(tab_id).await;
}

#[wasm_bindgen]
pub async fn background_on_navigation_started(host: ExtensionHost, tab_id: i32, frame_id: i32) {
    coordinator(host).on_navigation_started(tab_id, frame_id).await;
}
