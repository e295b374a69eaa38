//! Simulated documents and media elements.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::platform::{MutationWatch, ObserveOptions, PageDom, VideoHandle};
use crate::selector::video_src_selector;
use crate::types::DEFAULT_RATE;

/// Media event queued by a simulated element.
#[derive(Debug, Clone)]
pub enum PageEvent {
    RateChange(SimVideo),
    LoadStart(SimVideo),
}

type EventQueue = RefCell<VecDeque<PageEvent>>;

#[derive(Debug)]
struct VideoState {
    src: RefCell<String>,
    current_src: RefCell<String>,
    rate: Cell<f64>,
    markers: RefCell<BTreeSet<String>>,
    listeners: Cell<usize>,
    events: RefCell<Weak<EventQueue>>,
}

/// A simulated `<video>` element. Clones refer to the same element.
#[derive(Clone)]
pub struct SimVideo(Rc<VideoState>);

impl fmt::Debug for SimVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimVideo")
            .field("src", &*self.0.src.borrow())
            .field("rate", &self.0.rate.get())
            .finish()
    }
}

impl SimVideo {
    /// A detached element with `src` set and rate 1.
    pub fn new(src: &str) -> Self {
        Self(Rc::new(VideoState {
            src: RefCell::new(src.to_string()),
            current_src: RefCell::new(src.to_string()),
            rate: Cell::new(DEFAULT_RATE),
            markers: RefCell::new(BTreeSet::new()),
            listeners: Cell::new(0),
            events: RefCell::new(Weak::new()),
        }))
    }

    pub fn same_element(&self, other: &SimVideo) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Override the resolved source, as a `<source>` child or MSE would.
    pub fn set_current_src(&self, src: &str) {
        *self.0.current_src.borrow_mut() = src.to_string();
    }

    /// How many times listeners were attached to this element.
    pub fn listener_count(&self) -> usize {
        self.0.listeners.get()
    }

    /// Swap the media source. Like a browser, this resets the rate to 1
    /// and fires `loadstart`.
    pub fn change_source(&self, src: &str) {
        *self.0.src.borrow_mut() = src.to_string();
        *self.0.current_src.borrow_mut() = src.to_string();
        self.set_playback_rate(DEFAULT_RATE);
        self.fire(PageEvent::LoadStart(self.clone()));
    }

    /// Fire `loadstart` without changing anything, as a fresh element does.
    pub fn begin_load(&self) {
        self.fire(PageEvent::LoadStart(self.clone()));
    }

    fn bind(&self, events: &Rc<EventQueue>) {
        *self.0.events.borrow_mut() = Rc::downgrade(events);
    }

    fn fire(&self, event: PageEvent) {
        let queue = self.0.events.borrow().upgrade();
        if let Some(queue) = queue {
            queue.borrow_mut().push_back(event);
        }
    }
}

impl VideoHandle for SimVideo {
    fn playback_rate(&self) -> f64 {
        self.0.rate.get()
    }

    fn set_playback_rate(&self, rate: f64) {
        if self.0.rate.get() == rate {
            return;
        }
        self.0.rate.set(rate);
        self.fire(PageEvent::RateChange(self.clone()));
    }

    fn src(&self) -> String {
        self.0.src.borrow().clone()
    }

    fn current_src(&self) -> String {
        self.0.current_src.borrow().clone()
    }

    fn has_marker(&self, name: &str) -> bool {
        self.0.markers.borrow().contains(name)
    }

    fn set_marker(&self, name: &str) {
        self.0.markers.borrow_mut().insert(name.to_string());
    }
}

struct SimObserver {
    active: Rc<Cell<bool>>,
}

impl MutationWatch for SimObserver {
    fn disconnect(&self) {
        self.active.set(false);
    }
}

/// A simulated document.
#[derive(Default)]
pub struct SimPage {
    videos: RefCell<Vec<SimVideo>>,
    events: Rc<EventQueue>,
    observers: RefCell<Vec<Rc<Cell<bool>>>>,
}

impl SimPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_videos(srcs: &[&str]) -> Self {
        let page = Self::new();
        for src in srcs {
            page.push_video(SimVideo::new(src));
        }
        page
    }

    /// Insert an element at the end of the document.
    pub fn push_video(&self, video: SimVideo) {
        video.bind(&self.events);
        self.videos.borrow_mut().push(video);
    }

    pub fn video(&self, index: usize) -> Option<SimVideo> {
        self.videos.borrow().get(index).cloned()
    }

    pub fn video_count(&self) -> usize {
        self.videos.borrow().len()
    }

    /// Mutation observers still connected to this document.
    pub fn active_observers(&self) -> usize {
        self.observers.borrow().iter().filter(|a| a.get()).count()
    }

    pub fn take_event(&self) -> Option<PageEvent> {
        self.events.borrow_mut().pop_front()
    }
}

impl PageDom for SimPage {
    type Video = SimVideo;

    fn videos(&self) -> Vec<SimVideo> {
        self.videos.borrow().clone()
    }

    fn query_video(&self, selector: &str) -> Option<SimVideo> {
        self.videos
            .borrow()
            .iter()
            .find(|v| !v.src().is_empty() && video_src_selector(&v.src()) == selector)
            .cloned()
    }

    fn attach_video_listeners(&self, video: &SimVideo) {
        video.0.listeners.set(video.0.listeners.get() + 1);
    }

    fn observe_mutations(&self, _options: ObserveOptions) -> Box<dyn MutationWatch> {
        let active = Rc::new(Cell::new(true));
        self.observers.borrow_mut().push(active.clone());
        Box::new(SimObserver { active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_change_fires_only_on_change() {
        let page = SimPage::with_videos(&["a.mp4"]);
        let video = page.video(0).unwrap();

        video.set_playback_rate(1.0);
        assert!(page.take_event().is_none());

        video.set_playback_rate(2.0);
        assert!(matches!(page.take_event(), Some(PageEvent::RateChange(_))));
        assert!(page.take_event().is_none());
    }

    #[test]
    fn test_change_source_resets_rate() {
        let page = SimPage::with_videos(&["a.mp4"]);
        let video = page.video(0).unwrap();
        video.set_playback_rate(2.0);
        page.take_event();

        video.change_source("b.mp4");
        assert_eq!(video.playback_rate(), 1.0);
        assert_eq!(video.src(), "b.mp4");
        assert!(matches!(page.take_event(), Some(PageEvent::RateChange(_))));
        assert!(matches!(page.take_event(), Some(PageEvent::LoadStart(_))));
    }

    #[test]
    fn test_observer_disconnect() {
        let page = SimPage::new();
        let watch = page.observe_mutations(ObserveOptions { subtree: true, frames: true });
        assert_eq!(page.active_observers(), 1);
        watch.disconnect();
        assert_eq!(page.active_observers(), 0);
    }
}
