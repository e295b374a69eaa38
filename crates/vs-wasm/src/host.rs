//! Bindings to the JavaScript glue that owns the `chrome.*` calls.
//!
//! The glue passes an `ExtensionHost` object into every entry point. Each of
//! its methods wraps one browser API call and returns a promise; rejections
//! carry the browser's error. Values cross the boundary as plain JSON.

use async_trait::async_trait;
use js_sys::{Promise, JSON};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use vs_core::message::Message;
use vs_core::messaging::TransportError;
use vs_core::platform::{
    ActionApi, BackgroundPlatform, ContentPlatform, ContextMenuApi, Destination, KeyValueStore,
    MessageTransport, PlatformError, PopupPlatform, TabsApi,
};
use vs_core::storage::{StorageArea, StorageError};
use vs_core::types::{MenuOption, ScriptTarget, SetRateScript, TabId, TabInfo};

use crate::dom::WebDom;

#[wasm_bindgen]
extern "C" {
    #[derive(Debug, Clone)]
    pub type ExtensionHost;

    #[wasm_bindgen(method, catch, js_name = storageGet)]
    fn storage_get(this: &ExtensionHost, area: &str, key: &str) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = storageSet)]
    fn storage_set(this: &ExtensionHost, area: &str, key: &str, value: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = storageRemove)]
    fn storage_remove(this: &ExtensionHost, area: &str, key: &str) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = sendToCoordinator)]
    fn send_to_coordinator(this: &ExtensionHost, message: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = sendToTab)]
    fn send_to_tab(this: &ExtensionHost, tab_id: i32, message: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = queryTabs)]
    fn query_tabs(this: &ExtensionHost) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = activeTab)]
    fn active_tab(this: &ExtensionHost) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = injectContentScript)]
    fn inject_content_script(this: &ExtensionHost, tab_id: i32) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = executeSetRate)]
    fn execute_set_rate(this: &ExtensionHost, tab_id: i32, frame_id: i32, script: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = setBadgeText)]
    fn set_badge_text(this: &ExtensionHost, tab_id: i32, text: &str) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = setBadgeBackgroundColor)]
    fn set_badge_background_color(this: &ExtensionHost, tab_id: i32, color: &str) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = menusRemoveAll)]
    fn menus_remove_all(this: &ExtensionHost) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = menusCreateRadio)]
    fn menus_create_radio(this: &ExtensionHost, id: &str, title: &str, checked: bool) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = menusSetChecked)]
    fn menus_set_checked(this: &ExtensionHost, id: &str, checked: bool) -> Result<Promise, JsValue>;
}

/// Error text Chrome uses when a message has no listener on the other end.
const NO_RECEIVER_TEXT: &str = "Receiving end does not exist";

async fn settle(promise: Result<Promise, JsValue>) -> Result<JsValue, JsValue> {
    JsFuture::from(promise?).await
}

/// Human-readable text of a thrown value.
pub fn error_text(error: &JsValue) -> String {
    if let Some(error) = error.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    error.as_string().unwrap_or_else(|| format!("{:?}", error))
}

/// Whether a rejected `sendMessage` means nobody was listening.
pub fn is_missing_receiver(reason: &str) -> bool {
    reason.contains(NO_RECEIVER_TEXT)
}

pub fn to_js(value: &Value) -> Result<JsValue, String> {
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    JSON::parse(&text).map_err(|e| error_text(&e))
}

/// JSON view of a JavaScript value. `undefined` and `null` read as absent.
pub fn from_js(value: &JsValue) -> Option<Value> {
    if value.is_undefined() || value.is_null() {
        return None;
    }
    let text = JSON::stringify(value).ok()?.as_string()?;
    serde_json::from_str(&text).ok()
}

/// Tabs from a `tabs.query` result. Entries without an id are skipped.
pub fn parse_tabs(value: Option<Value>) -> Vec<TabInfo> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn area_name(area: StorageArea) -> &'static str {
    match area {
        StorageArea::Sync => "sync",
        StorageArea::Local => "local",
    }
}

fn call_failed(api: &'static str, error: JsValue) -> PlatformError {
    PlatformError::CallFailed {
        api,
        reason: error_text(&error),
    }
}

// =============================================================================
// Storage
// =============================================================================

/// One `chrome.storage` area.
pub struct JsStore {
    host: ExtensionHost,
    area: StorageArea,
}

impl JsStore {
    pub fn new(host: ExtensionHost, area: StorageArea) -> Self {
        Self { host, area }
    }
}

#[async_trait(?Send)]
impl KeyValueStore for JsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let value = settle(self.host.storage_get(area_name(self.area), key))
            .await
            .map_err(|e| StorageError::Unavailable(error_text(&e)))?;
        Ok(from_js(&value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let value = to_js(&value).map_err(|reason| StorageError::Encode {
            key: key.to_string(),
            reason,
        })?;
        settle(self.host.storage_set(area_name(self.area), key, &value))
            .await
            .map_err(|e| StorageError::Unavailable(error_text(&e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        settle(self.host.storage_remove(area_name(self.area), key))
            .await
            .map_err(|e| StorageError::Unavailable(error_text(&e)))?;
        Ok(())
    }
}

// =============================================================================
// Messaging, Tabs, Badge, Menus
// =============================================================================

/// Browser APIs reached through the glue.
pub struct JsBrowser {
    host: ExtensionHost,
}

impl JsBrowser {
    pub fn new(host: ExtensionHost) -> Self {
        Self { host }
    }
}

#[async_trait(?Send)]
impl MessageTransport for JsBrowser {
    async fn deliver(&self, to: Destination, message: &Message) -> Result<Option<Value>, TransportError> {
        let payload = to_js(&message.to_value()).map_err(TransportError::Failed)?;
        let promise = match to {
            Destination::Coordinator => self.host.send_to_coordinator(&payload),
            Destination::Tab(tab_id) => self.host.send_to_tab(tab_id, &payload),
        };

        match settle(promise).await {
            Ok(reply) => Ok(from_js(&reply)),
            Err(e) => {
                let reason = error_text(&e);
                if is_missing_receiver(&reason) {
                    Err(TransportError::NoReceiver)
                } else {
                    Err(TransportError::Failed(reason))
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl TabsApi for JsBrowser {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, PlatformError> {
        let tabs = settle(self.host.query_tabs())
            .await
            .map_err(|e| call_failed("tabs.query", e))?;
        Ok(parse_tabs(from_js(&tabs)))
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, PlatformError> {
        let tab = settle(self.host.active_tab())
            .await
            .map_err(|e| call_failed("tabs.query", e))?;
        Ok(from_js(&tab).and_then(|value| serde_json::from_value(value).ok()))
    }

    async fn inject_content_script(&self, tab_id: TabId) -> Result<(), PlatformError> {
        settle(self.host.inject_content_script(tab_id))
            .await
            .map_err(|e| call_failed("scripting.executeScript", e))?;
        Ok(())
    }

    async fn execute_set_rate(&self, target: ScriptTarget, script: &SetRateScript) -> Result<(), PlatformError> {
        let args = serde_json::to_value(script)
            .map_err(|e| e.to_string())
            .and_then(|value| to_js(&value))
            .map_err(|reason| PlatformError::CallFailed {
                api: "scripting.executeScript",
                reason,
            })?;
        settle(self.host.execute_set_rate(target.tab_id, target.frame_id, &args))
            .await
            .map_err(|e| call_failed("scripting.executeScript", e))?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl ActionApi for JsBrowser {
    async fn set_badge_text(&self, tab_id: TabId, text: &str) -> Result<(), PlatformError> {
        settle(self.host.set_badge_text(tab_id, text))
            .await
            .map_err(|e| call_failed("action.setBadgeText", e))?;
        Ok(())
    }

    async fn set_badge_background_color(&self, tab_id: TabId, color: &str) -> Result<(), PlatformError> {
        settle(self.host.set_badge_background_color(tab_id, color))
            .await
            .map_err(|e| call_failed("action.setBadgeBackgroundColor", e))?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl ContextMenuApi for JsBrowser {
    async fn remove_all(&self) -> Result<(), PlatformError> {
        settle(self.host.menus_remove_all())
            .await
            .map_err(|e| call_failed("contextMenus.removeAll", e))?;
        Ok(())
    }

    async fn create_radio_item(&self, option: &MenuOption, checked: bool) -> Result<(), PlatformError> {
        settle(self.host.menus_create_radio(&option.id, &option.title, checked))
            .await
            .map_err(|e| call_failed("contextMenus.create", e))?;
        Ok(())
    }

    async fn set_checked(&self, id: &str, checked: bool) -> Result<(), PlatformError> {
        settle(self.host.menus_set_checked(id, checked))
            .await
            .map_err(|e| call_failed("contextMenus.update", e))?;
        Ok(())
    }
}

// =============================================================================
// Platform Bundles
// =============================================================================

pub struct ContentHost {
    dom: WebDom,
    sync: JsStore,
    local: JsStore,
    browser: JsBrowser,
}

impl ContentHost {
    pub fn new(host: ExtensionHost, dom: WebDom) -> Self {
        Self {
            dom,
            sync: JsStore::new(host.clone(), StorageArea::Sync),
            local: JsStore::new(host.clone(), StorageArea::Local),
            browser: JsBrowser::new(host),
        }
    }
}

impl ContentPlatform for ContentHost {
    type Dom = WebDom;

    fn dom(&self) -> &WebDom {
        &self.dom
    }

    fn sync_store(&self) -> &dyn KeyValueStore {
        &self.sync
    }

    fn local_store(&self) -> &dyn KeyValueStore {
        &self.local
    }

    fn transport(&self) -> &dyn MessageTransport {
        &self.browser
    }
}

pub struct BackgroundHost {
    sync: JsStore,
    local: JsStore,
    browser: JsBrowser,
}

impl BackgroundHost {
    pub fn new(host: ExtensionHost) -> Self {
        Self {
            sync: JsStore::new(host.clone(), StorageArea::Sync),
            local: JsStore::new(host.clone(), StorageArea::Local),
            browser: JsBrowser::new(host),
        }
    }
}

impl BackgroundPlatform for BackgroundHost {
    fn sync_store(&self) -> &dyn KeyValueStore {
        &self.sync
    }

    fn local_store(&self) -> &dyn KeyValueStore {
        &self.local
    }

    fn tabs(&self) -> &dyn TabsApi {
        &self.browser
    }

    fn action(&self) -> &dyn ActionApi {
        &self.browser
    }

    fn menus(&self) -> &dyn ContextMenuApi {
        &self.browser
    }
}

pub struct PopupHost {
    sync: JsStore,
    browser: JsBrowser,
}

impl PopupHost {
    pub fn new(host: ExtensionHost) -> Self {
        Self {
            sync: JsStore::new(host.clone(), StorageArea::Sync),
            browser: JsBrowser::new(host),
        }
    }
}

impl PopupPlatform for PopupHost {
    fn sync_store(&self) -> &dyn KeyValueStore {
        &self.sync
    }

    fn tabs(&self) -> &dyn TabsApi {
        &self.browser
    }

    fn transport(&self) -> &dyn MessageTransport {
        &self.browser
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_receiver() {
        assert!(is_missing_receiver(
            "Could not establish connection. Receiving end does not exist."
        ));
        assert!(!is_missing_receiver("The message port closed before a response was received."));
    }

    #[test]
    fn test_parse_tabs_skips_incomplete_entries() {
        let tabs = parse_tabs(Some(json!([
            {"id": 3, "url": "https://a.example/", "active": true, "windowId": 1},
            {"url": "devtools://devtools/bundled/inspector.html"},
            {"id": 9}
        ])));
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].id, 3);
        assert!(tabs[0].active);
        assert_eq!(tabs[1].url, None);
        assert!(!tabs[1].active);

        assert!(parse_tabs(None).is_empty());
        assert!(parse_tabs(Some(json!({"id": 1}))).is_empty());
    }
}
