//! Content script entry points.
//!
//! The runtime is kept per isolated world: re-injection into the same world
//! reuses it, while a fresh world starts a new one and relies on the
//! element markers to skip videos that already have listeners.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Element, Event, HtmlVideoElement};

use vs_core::content::apply_set_rate_script;
use vs_core::types::SetRateScript;
use vs_core::{ContentRuntime, Dispatch, Message, RuntimeConfig};

use crate::dom::{WebDom, WebVideo};
use crate::host::{from_js, to_js, ContentHost, ExtensionHost};

type Runtime = ContentRuntime<ContentHost>;

thread_local! {
    static RUNTIME: RefCell<Option<Rc<Runtime>>> = const { RefCell::new(None) };
    static PAGE_HOOKS: Cell<bool> = const { Cell::new(false) };
}

fn runtime() -> Option<Rc<Runtime>> {
    RUNTIME.with(|slot| slot.borrow().clone())
}

/// Run one initialization cycle, creating the runtime on first use.
#[wasm_bindgen]
pub async fn content_init(host: ExtensionHost) -> Result<(), JsValue> {
    let runtime = match runtime() {
        Some(runtime) => runtime,
        None => {
            let config = RuntimeConfig::default();
            let dom = WebDom::current(config.observe_frames)
                .ok_or_else(|| JsValue::from_str("No document to attach to"))?;
            let runtime = Rc::new(ContentRuntime::new(ContentHost::new(host, dom), config));
            RUNTIME.with(|slot| *slot.borrow_mut() = Some(runtime.clone()));
            runtime
        }
    };

    install_page_hooks();
    runtime.initialize().await;
    Ok(())
}

/// `runtime.onMessage` handler.
///
/// Returns the reply object, `false` when nothing in this frame could act on
/// the message, and `undefined` otherwise.
#[wasm_bindgen]
pub fn content_handle_message(message: JsValue) -> JsValue {
    let Some(runtime) = runtime() else {
        return JsValue::FALSE;
    };
    let message = from_js(&message).map_or(Message::Unknown, Message::from_value);

    match runtime.handle_message(&message) {
        Dispatch::Reply(reply) => to_js(&reply).unwrap_or(JsValue::UNDEFINED),
        Dispatch::Handled => JsValue::UNDEFINED,
        Dispatch::Unhandled => JsValue::FALSE,
    }
}

/// Body of the script the coordinator executes on a context-menu click.
#[wasm_bindgen]
pub fn content_apply_set_rate(rate: f64, src_match: Option<String>) -> bool {
    let Some(dom) = WebDom::current(RuntimeConfig::default().observe_frames) else {
        return false;
    };
    apply_set_rate_script(&dom, &SetRateScript { rate, src_match })
}

pub(crate) fn dispatch_rate_change(video: WebVideo) {
    let Some(runtime) = runtime() else {
        return;
    };
    spawn_local(async move {
        runtime.on_rate_change(&video).await;
    });
}

pub(crate) fn dispatch_load_start(video: WebVideo) {
    let Some(runtime) = runtime() else {
        return;
    };
    spawn_local(async move {
        runtime.on_load_start(&video).await;
    });
}

pub(crate) fn dispatch_videos_added(videos: &[WebVideo]) {
    if let Some(runtime) = runtime() {
        runtime.on_videos_added(videos);
    }
}

/// Document-level `contextmenu` and window-level `pagehide`, once per world.
fn install_page_hooks() {
    if PAGE_HOOKS.with(|installed| installed.replace(true)) {
        return;
    }
    let Some(window) = web_sys::window() else {
        return;
    };

    let on_context_menu = Closure::<dyn FnMut(Event)>::new(|event: Event| {
        let Some(video) = event
            .target()
            .and_then(|target| target.dyn_into::<Element>().ok())
            .and_then(|element| element.closest("video").ok().flatten())
            .and_then(|element| element.dyn_into::<HtmlVideoElement>().ok())
            .map(WebVideo::new)
        else {
            return;
        };
        let Some(runtime) = runtime() else {
            return;
        };
        spawn_local(async move {
            runtime.on_context_menu(Some(&video)).await;
        });
    });
    let on_page_hide = Closure::<dyn FnMut(Event)>::new(|_event: Event| {
        if let Some(runtime) = runtime() {
            runtime.on_page_hide();
        }
    });

    if let Some(document) = window.document() {
        if let Err(e) = document.add_event_listener_with_callback("contextmenu", on_context_menu.as_ref().unchecked_ref()) {
            log::warn!("Failed to listen for contextmenu: {:?}", e);
        }
    }
    if let Err(e) = window.add_event_listener_with_callback("pagehide", on_page_hide.as_ref().unchecked_ref()) {
        log::warn!("Failed to listen for pagehide: {:?}", e);
    }

    on_context_menu.forget();
    on_page_hide.forget();
}
