//! Live DOM access for the content script.

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Document, Element, Event, HtmlIFrameElement, HtmlVideoElement, MutationObserver,
    MutationObserverInit, MutationRecord, Node, NodeList,
};

use vs_core::platform::{MutationWatch, ObserveOptions, PageDom, VideoHandle};

use crate::content;

/// A `<video>` element of the page.
#[derive(Debug, Clone)]
pub struct WebVideo(HtmlVideoElement);

impl WebVideo {
    pub fn new(element: HtmlVideoElement) -> Self {
        Self(element)
    }

    pub fn element(&self) -> &HtmlVideoElement {
        &self.0
    }
}

impl VideoHandle for WebVideo {
    fn playback_rate(&self) -> f64 {
        self.0.playback_rate()
    }

    fn set_playback_rate(&self, rate: f64) {
        self.0.set_playback_rate(rate);
    }

    fn src(&self) -> String {
        self.0.get_attribute("src").unwrap_or_default()
    }

    fn current_src(&self) -> String {
        self.0.current_src()
    }

    fn has_marker(&self, name: &str) -> bool {
        self.0.has_attribute(name)
    }

    fn set_marker(&self, name: &str) {
        if let Err(e) = self.0.set_attribute(name, "true") {
            log::debug!("Failed to mark video: {:?}", e);
        }
    }
}

fn push_videos(list: NodeList, out: &mut Vec<WebVideo>) {
    for i in 0..list.length() {
        if let Some(video) = list.item(i).and_then(|node| node.dyn_into::<HtmlVideoElement>().ok()) {
            out.push(WebVideo(video));
        }
    }
}

/// Videos of a same-origin frame. Cross-origin frames have no document.
fn push_frame_videos(frame: &HtmlIFrameElement, out: &mut Vec<WebVideo>) {
    if let Some(document) = frame.content_document() {
        if let Ok(list) = document.query_selector_all("video") {
            push_videos(list, out);
        }
    }
}

/// Videos at or below a node added to the document.
fn videos_under(node: &Node, frames: bool, out: &mut Vec<WebVideo>) {
    if let Some(video) = node.dyn_ref::<HtmlVideoElement>() {
        out.push(WebVideo(video.clone()));
        return;
    }
    let Some(element) = node.dyn_ref::<Element>() else {
        return;
    };
    if let Ok(list) = element.query_selector_all("video") {
        push_videos(list, out);
    }
    if !frames {
        return;
    }
    if let Some(frame) = element.dyn_ref::<HtmlIFrameElement>() {
        push_frame_videos(frame, out);
    }
    if let Ok(list) = element.query_selector_all("iframe") {
        for i in 0..list.length() {
            if let Some(frame) = list.item(i).and_then(|node| node.dyn_into::<HtmlIFrameElement>().ok()) {
                push_frame_videos(&frame, out);
            }
        }
    }
}

/// The document the content script runs in.
pub struct WebDom {
    document: Document,
    frames: bool,
}

impl WebDom {
    pub fn new(document: Document, frames: bool) -> Self {
        Self { document, frames }
    }

    /// The current window's document, if there is one.
    pub fn current(frames: bool) -> Option<Self> {
        let document = web_sys::window()?.document()?;
        Some(Self::new(document, frames))
    }
}

impl PageDom for WebDom {
    type Video = WebVideo;

    fn videos(&self) -> Vec<WebVideo> {
        let mut videos = Vec::new();
        if let Ok(list) = self.document.query_selector_all("video") {
            push_videos(list, &mut videos);
        }
        if self.frames {
            if let Ok(list) = self.document.query_selector_all("iframe") {
                for i in 0..list.length() {
                    if let Some(frame) = list.item(i).and_then(|node| node.dyn_into::<HtmlIFrameElement>().ok()) {
                        push_frame_videos(&frame, &mut videos);
                    }
                }
            }
        }
        videos
    }

    fn query_video(&self, selector: &str) -> Option<WebVideo> {
        match self.document.query_selector(selector) {
            Ok(found) => found
                .and_then(|element| element.dyn_into::<HtmlVideoElement>().ok())
                .map(WebVideo),
            Err(e) => {
                log::debug!("Invalid selector {}: {:?}", selector, e);
                None
            }
        }
    }

    fn attach_video_listeners(&self, video: &WebVideo) {
        let target = video.clone();
        let on_rate_change = Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
            content::dispatch_rate_change(target.clone());
        });
        let target = video.clone();
        let on_load_start = Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
            content::dispatch_load_start(target.clone());
        });

        let element = video.element();
        for (name, listener) in [("ratechange", &on_rate_change), ("loadstart", &on_load_start)] {
            if let Err(e) = element.add_event_listener_with_callback(name, listener.as_ref().unchecked_ref()) {
                log::warn!("Failed to listen for {}: {:?}", name, e);
            }
        }

        // Listeners live as long as the element
        on_rate_change.forget();
        on_load_start.forget();
    }

    fn observe_mutations(&self, options: ObserveOptions) -> Box<dyn MutationWatch> {
        let frames = options.frames;
        let callback = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
            move |records: js_sys::Array, _observer: MutationObserver| {
                let mut added = Vec::new();
                for record in records.iter() {
                    let Ok(record) = record.dyn_into::<MutationRecord>() else {
                        continue;
                    };
                    let nodes = record.added_nodes();
                    for i in 0..nodes.length() {
                        if let Some(node) = nodes.item(i) {
                            videos_under(&node, frames, &mut added);
                        }
                    }
                }
                if !added.is_empty() {
                    content::dispatch_videos_added(&added);
                }
            },
        );

        let observer = match MutationObserver::new(callback.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(e) => {
                log::warn!("Failed to create mutation observer: {:?}", e);
                return Box::new(WebWatch { observer: None, _callback: callback });
            }
        };

        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(options.subtree);

        let root = self.document.document_element();
        let observing = match &root {
            Some(root) => observer.observe_with_options(root, &init),
            None => observer.observe_with_options(&self.document, &init),
        };
        if let Err(e) = observing {
            log::warn!("Failed to observe document: {:?}", e);
        }

        Box::new(WebWatch {
            observer: Some(observer),
            _callback: callback,
        })
    }
}

struct WebWatch {
    observer: Option<MutationObserver>,
    _callback: Closure<dyn FnMut(js_sys::Array, MutationObserver)>,
}

impl MutationWatch for WebWatch {
    fn disconnect(&self) {
        if let Some(observer) = &self.observer {
            observer.disconnect();
        }
    }
}
