//! WebAssembly bindings for VideoSpeed
//!
//! The extension's JavaScript is glue only: it forwards browser events to
//! the exported functions below and implements [`ExtensionHost`] on
//! top of the `chrome.*` APIs. Everything else runs in `vs-core`.

mod background;
mod content;
mod dom;
mod host;
mod pages;

use wasm_bindgen::prelude::*;

pub use background::*;
pub use content::{content_apply_set_rate, content_handle_message, content_init};
pub use host::ExtensionHost;
pub use pages::*;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    let level = if cfg!(debug_assertions) {
        log::Level::Debug
    } else {
        log::Level::Warn
    };
    wasm_logger::init(wasm_logger::Config::new(level));
}

/// Crate version, shown on the options page.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Menu rate closest to `rate`, for highlighting outside the coordinator.
#[wasm_bindgen]
pub fn closest_menu_rate(rate: f64) -> f64 {
    let options = vs_core::types::menu_options();
    vs_core::find_closest_option(rate, &options).map_or(rate, |option| option.rate)
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_closest_menu_rate() {
        assert_eq!(closest_menu_rate(1.25), 1.25);
        assert_eq!(closest_menu_rate(1.75), 1.5);
        assert_eq!(closest_menu_rate(10.0), 4.0);
    }

    #[wasm_bindgen_test]
    fn test_json_crosses_boundary() {
        let value = serde_json::json!({"action": "SET", "rate": 1.5});
        let js = host::to_js(&value).unwrap();
        assert_eq!(host::from_js(&js), Some(value));
        assert_eq!(host::from_js(&JsValue::UNDEFINED), None);
        assert_eq!(host::from_js(&JsValue::NULL), None);
    }
}
