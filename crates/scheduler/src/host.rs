//! Host scheduler seam and yield backends
//!
//! Embedding hosts may expose their own scheduling primitives: a dedicated
//! cooperative-yield call and a priority-tagged task post. Both are optional
//! and individually probe-able; the runner selects a yield backend once at
//! construction and caches it instead of re-probing at every yield point.

use std::sync::Arc;
use std::time::Duration;

/// Priority tag for tasks posted to the host scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostPriority {
    /// Work the user is actively blocked on
    UserBlocking,

    /// Work the user will see soon (repositions, re-renders)
    UserVisible,

    /// Deferrable work (prefetch, housekeeping)
    Background,
}

/// Scheduling primitives an embedding host may provide
///
/// Callers must probe `has_yield` / `has_post_task` before relying on the
/// corresponding primitive; the default implementations report both as
/// absent and do nothing.
pub trait HostScheduler: Send + Sync {
    /// Whether the host exposes a dedicated cooperative-yield primitive
    fn has_yield(&self) -> bool {
        false
    }

    /// Hand control to the host so pending input/paint work can run
    fn yield_now(&self) {}

    /// Whether the host exposes a priority-tagged post-task primitive
    fn has_post_task(&self) -> bool {
        false
    }

    /// Hand a task to the host to run at its chosen time
    fn post_task(&self, _priority: PostPriority, _task: Box<dyn FnOnce() + Send>) {}
}

/// A cached way of yielding control between task slices
pub trait YieldBackend {
    /// Give the host a chance to run pending work
    fn yield_now(&self);

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}

/// Yield through the host's dedicated primitive
pub struct HostYield {
    host: Arc<dyn HostScheduler>,
}

impl HostYield {
    pub fn new(host: Arc<dyn HostScheduler>) -> Self {
        Self { host }
    }
}

impl YieldBackend for HostYield {
    fn yield_now(&self) {
        self.host.yield_now();
    }

    fn name(&self) -> &'static str {
        "host"
    }
}

/// Yield by bouncing through the OS thread scheduler
pub struct ThreadYield;

impl YieldBackend for ThreadYield {
    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

/// Yield by sleeping for a minimal fixed pause
pub struct TimerYield {
    pause: Duration,
}

impl TimerYield {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl Default for TimerYield {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl YieldBackend for TimerYield {
    fn yield_now(&self) {
        std::thread::sleep(self.pause);
    }

    fn name(&self) -> &'static str {
        "timer"
    }
}

/// Pick a yield backend, preferring the host primitive when present
///
/// Probed once; the caller holds onto the returned backend for its
/// lifetime. Hosts without a yield primitive fall back to a thread yield,
/// which every std target provides; [`TimerYield`] stays available for
/// callers that need a real pause instead.
pub fn select_yield_backend(host: Option<Arc<dyn HostScheduler>>) -> Box<dyn YieldBackend> {
    let backend: Box<dyn YieldBackend> = match host {
        Some(host) if host.has_yield() => Box::new(HostYield::new(host)),
        _ => Box::new(ThreadYield),
    };

    tracing::debug!(backend = backend.name(), "selected yield backend");
    backend
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct YieldingHost {
        yields: AtomicU32,
    }

    impl HostScheduler for YieldingHost {
        fn has_yield(&self) -> bool {
            true
        }

        fn yield_now(&self) {
            self.yields.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct BareHost;

    impl HostScheduler for BareHost {}

    #[test]
    fn test_selects_host_backend_when_primitive_present() {
        let host = Arc::new(YieldingHost { yields: AtomicU32::new(0) });
        let backend = select_yield_backend(Some(host.clone()));

        assert_eq!(backend.name(), "host");
        backend.yield_now();
        backend.yield_now();
        assert_eq!(host.yields.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_falls_back_to_thread_yield_without_primitive() {
        let backend = select_yield_backend(Some(Arc::new(BareHost)));
        assert_eq!(backend.name(), "thread");

        let backend = select_yield_backend(None);
        assert_eq!(backend.name(), "thread");
    }

    #[test]
    fn test_timer_yield_pauses() {
        let backend = TimerYield::new(Duration::from_millis(2));
        let start = std::time::Instant::now();
        backend.yield_now();
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn test_default_host_reports_no_capabilities() {
        let host = BareHost;
        assert!(!host.has_yield());
        assert!(!host.has_post_task());
    }
}
