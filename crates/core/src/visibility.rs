//! Viewport intersection tracking
//!
//! The host environment supplies the actual intersection observation
//! capability behind [`VisibilityObserver`]. The tracker wraps one
//! observer, forwards page registrations to it, and drains its batched
//! enter/exit transitions so the rest of the crate consumes a plain
//! event stream instead of talking to the host directly.

/// One enter or exit transition for a page surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityEvent {
    pub page_number: u32,
    /// `true` when the surface entered the tracked region, `false` when
    /// it left.
    pub is_intersecting: bool,
}

impl VisibilityEvent {
    pub fn enter(page_number: u32) -> Self {
        Self {
            page_number,
            is_intersecting: true,
        }
    }

    pub fn exit(page_number: u32) -> Self {
        Self {
            page_number,
            is_intersecting: false,
        }
    }
}

/// Intersection observation capability provided by the host.
///
/// Implementations accumulate transitions as they happen and hand them
/// over in [`take_events`](VisibilityObserver::take_events) order.
pub trait VisibilityObserver {
    fn observe(&mut self, page_number: u32);
    fn unobserve(&mut self, page_number: u32);

    /// Drain the transitions accumulated since the previous call.
    fn take_events(&mut self) -> Vec<VisibilityEvent>;

    fn disconnect(&mut self);
}

/// Extension of the viewport within which pages count as visible, in
/// pixels.
pub const DEFAULT_VISIBILITY_MARGIN: f32 = 200.0;

/// Fraction of a surface that must intersect before it counts.
pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.01;

/// Parameters handed to the host when an observer is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityConfig {
    /// The tracked region extends this far beyond the viewport on every
    /// side, so pages begin rendering before they scroll into view.
    pub margin: f32,

    /// Intersection ratio at which a transition fires.
    pub threshold: f32,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            margin: DEFAULT_VISIBILITY_MARGIN,
            threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

impl VisibilityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Wraps a host observer and guards every call behind its connection
/// state.
///
/// After [`disconnect`](VisibilityTracker::disconnect) the tracker goes
/// inert: registrations are dropped and polling yields nothing. A second
/// disconnect is a no-op.
pub struct VisibilityTracker {
    observer: Box<dyn VisibilityObserver>,
    connected: bool,
}

impl VisibilityTracker {
    pub fn new(observer: Box<dyn VisibilityObserver>) -> Self {
        Self {
            observer,
            connected: true,
        }
    }

    pub fn observe(&mut self, page_number: u32) {
        if self.connected {
            self.observer.observe(page_number);
        }
    }

    pub fn unobserve(&mut self, page_number: u32) {
        if self.connected {
            self.observer.unobserve(page_number);
        }
    }

    /// Drain pending transitions from the underlying observer.
    pub fn poll(&mut self) -> Vec<VisibilityEvent> {
        if self.connected {
            self.observer.take_events()
        } else {
            Vec::new()
        }
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            self.observer.disconnect();
            self.connected = false;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        observed: Vec<u32>,
        unobserved: Vec<u32>,
        disconnects: u32,
    }

    struct RecordingObserver {
        log: Rc<RefCell<Log>>,
        queued: Vec<VisibilityEvent>,
    }

    impl RecordingObserver {
        fn new(log: Rc<RefCell<Log>>) -> Self {
            Self {
                log,
                queued: Vec::new(),
            }
        }
    }

    impl VisibilityObserver for RecordingObserver {
        fn observe(&mut self, page_number: u32) {
            self.log.borrow_mut().observed.push(page_number);
        }

        fn unobserve(&mut self, page_number: u32) {
            self.log.borrow_mut().unobserved.push(page_number);
        }

        fn take_events(&mut self) -> Vec<VisibilityEvent> {
            std::mem::take(&mut self.queued)
        }

        fn disconnect(&mut self) {
            self.log.borrow_mut().disconnects += 1;
        }
    }

    #[test]
    fn test_tracker_forwards_registrations() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut tracker = VisibilityTracker::new(Box::new(RecordingObserver::new(Rc::clone(&log))));

        tracker.observe(1);
        tracker.observe(2);
        tracker.unobserve(1);

        assert_eq!(log.borrow().observed, vec![1, 2]);
        assert_eq!(log.borrow().unobserved, vec![1]);
    }

    #[test]
    fn test_poll_drains_queued_events_once() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut observer = RecordingObserver::new(log);
        observer.queued = vec![VisibilityEvent::enter(3), VisibilityEvent::exit(2)];
        let mut tracker = VisibilityTracker::new(Box::new(observer));

        let events = tracker.poll();
        assert_eq!(events, vec![VisibilityEvent::enter(3), VisibilityEvent::exit(2)]);
        assert!(tracker.poll().is_empty());
    }

    #[test]
    fn test_disconnect_is_idempotent_and_silences_the_tracker() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut observer = RecordingObserver::new(Rc::clone(&log));
        observer.queued = vec![VisibilityEvent::enter(1)];
        let mut tracker = VisibilityTracker::new(Box::new(observer));

        tracker.disconnect();
        tracker.disconnect();

        assert_eq!(log.borrow().disconnects, 1);
        assert!(!tracker.is_connected());
        assert!(tracker.poll().is_empty());

        tracker.observe(9);
        assert!(log.borrow().observed.is_empty());
    }

    #[test]
    fn test_config_builders() {
        let config = VisibilityConfig::new().with_margin(64.0).with_threshold(0.5);
        assert_eq!(config.margin, 64.0);
        assert_eq!(config.threshold, 0.5);

        let default = VisibilityConfig::default();
        assert_eq!(default.margin, DEFAULT_VISIBILITY_MARGIN);
        assert_eq!(default.threshold, DEFAULT_VISIBILITY_THRESHOLD);
    }
}
