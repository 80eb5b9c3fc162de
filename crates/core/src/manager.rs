//! Windowed page-surface management
//!
//! Turns visibility transitions into render and evict decisions. Pages
//! entering the tracked region are queued and drawn through the task
//! runner; pages leaving it are cleared after a grace delay, so a quick
//! scroll back does not cost a redraw. Surfaces are never deallocated
//! while the page set lives; eviction only wipes pixels.
//!
//! The manager stays correct under churn: a page that exits before its
//! render task's draw step runs is cancelled at the step boundary, and
//! an eviction deadline is dropped the moment its page re-enters.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use quire_engine::{ClipRect, DocumentHandle, DrawingSurface, PageHandle, PageViewport, SharedEngine};
use quire_scheduler::{HostScheduler, RunnerConfig, RunnerStats, Task, TaskRunner};

use crate::page::{PageEntry, PageState};
use crate::render::RenderTask;
use crate::visibility::{VisibilityEvent, VisibilityObserver, VisibilityTracker};

/// How long an off-screen page keeps its pixels before eviction.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(2000);

/// Counters for render and eviction activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Renders that drew a page to completion.
    pub renders_completed: u64,

    /// Renders abandoned because the page left the tracked region
    /// before the draw step ran.
    pub renders_cancelled: u64,

    /// Renders that failed in resolution or drawing.
    pub renders_failed: u64,

    /// Surfaces cleared after the grace delay expired.
    pub evictions: u64,
}

/// Configuration for a [`PageSurfaceManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Grace delay between a page leaving the tracked region and its
    /// surface being cleared.
    pub grace_delay: Duration,

    /// Runner configuration for render batches.
    pub runner: RunnerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            grace_delay: DEFAULT_GRACE_DELAY,
            runner: RunnerConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_delay(mut self, grace_delay: Duration) -> Self {
        self.grace_delay = grace_delay;
        self
    }

    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }
}

/// State shared between the manager and its in-flight render tasks.
pub(crate) struct ManagerInner {
    pub(crate) pages: HashMap<u32, PageEntry>,
    pub(crate) visible: HashSet<u32>,
    pub(crate) pending: HashSet<u32>,
    pub(crate) stats: ManagerStats,
}

impl ManagerInner {
    pub(crate) fn new() -> Self {
        Self {
            pages: HashMap::new(),
            visible: HashSet::new(),
            pending: HashSet::new(),
            stats: ManagerStats::default(),
        }
    }
}

/// Owns per-page surface state and drives rendering from visibility
/// transitions.
///
/// Registered pages are observed through the host's intersection
/// capability. Each [`poll`](PageSurfaceManager::poll) drains the
/// observer, runs the render batch the transitions produced, and fires
/// any eviction deadlines that came due.
pub struct PageSurfaceManager {
    inner: Arc<Mutex<ManagerInner>>,
    tracker: VisibilityTracker,
    runner: TaskRunner,
    engine: SharedEngine,
    doc: DocumentHandle,
    grace_delay: Duration,
    unload_deadlines: HashMap<u32, Instant>,
}

impl PageSurfaceManager {
    pub fn new(
        engine: SharedEngine,
        doc: DocumentHandle,
        observer: Box<dyn VisibilityObserver>,
        config: ManagerConfig,
    ) -> Self {
        let runner = TaskRunner::new(config.runner.clone());
        Self::assemble(engine, doc, observer, runner, config)
    }

    /// Like [`new`](PageSurfaceManager::new), but lets the runner probe
    /// the host scheduler for a yield primitive.
    pub fn with_host(
        engine: SharedEngine,
        doc: DocumentHandle,
        observer: Box<dyn VisibilityObserver>,
        config: ManagerConfig,
        host: Arc<dyn HostScheduler>,
    ) -> Self {
        let runner = TaskRunner::with_host(config.runner.clone(), host);
        Self::assemble(engine, doc, observer, runner, config)
    }

    fn assemble(
        engine: SharedEngine,
        doc: DocumentHandle,
        observer: Box<dyn VisibilityObserver>,
        runner: TaskRunner,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManagerInner::new())),
            tracker: VisibilityTracker::new(observer),
            runner,
            engine,
            doc,
            grace_delay: config.grace_delay,
            unload_deadlines: HashMap::new(),
        }
    }

    /// Register a page surface and begin observing it.
    ///
    /// `document_page` may carry an already-resolved engine handle;
    /// renders then skip the resolution lookup from the start.
    pub fn add_page(
        &mut self,
        page_number: u32,
        surface: Box<dyn DrawingSurface>,
        document_page: Option<PageHandle>,
        viewport: PageViewport,
    ) {
        let entry = PageEntry::new(page_number, surface, document_page, viewport);
        self.inner.lock().unwrap().pages.insert(page_number, entry);
        self.tracker.observe(page_number);
    }

    /// Drain observer transitions, run the resulting render batch, then
    /// fire due evictions.
    pub fn poll(&mut self) {
        let events = self.tracker.poll();
        self.apply_visibility(&events);
        self.process_due_unloads();
    }

    /// Apply one batch of enter/exit transitions.
    ///
    /// Every transition updates the page collections first; render tasks
    /// for the entered pages run afterwards as one batch. An exit that
    /// arrives later in the same batch therefore cancels the render its
    /// earlier enter queued.
    pub fn apply_visibility(&mut self, events: &[VisibilityEvent]) {
        let mut batch: Vec<Box<dyn Task>> = Vec::new();

        {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;

            for event in events {
                let page_number = event.page_number;
                let Some(entry) = inner.pages.get_mut(&page_number) else {
                    continue;
                };

                if event.is_intersecting {
                    self.unload_deadlines.remove(&page_number);
                    inner.visible.insert(page_number);

                    if !inner.pending.contains(&page_number) && !entry.is_rendered() {
                        inner.pending.insert(page_number);
                        if entry.state == PageState::Unloaded {
                            entry.state = PageState::Queued;
                        }
                        batch.push(Box::new(RenderTask::new(
                            Arc::clone(&self.inner),
                            Arc::clone(&self.engine),
                            self.doc,
                            page_number,
                        )));
                    }
                } else {
                    inner.visible.remove(&page_number);
                    inner.pending.remove(&page_number);
                    if entry.state == PageState::Queued {
                        entry.state = PageState::Unloaded;
                    }
                    self.unload_deadlines
                        .insert(page_number, Instant::now() + self.grace_delay);
                }
            }
        }

        if !batch.is_empty() {
            self.runner.run_batched(batch);
        }
    }

    /// Clear surfaces whose grace delay has expired.
    ///
    /// Visibility is re-checked at fire time; a page that is back in
    /// the tracked region keeps its pixels.
    fn process_due_unloads(&mut self) {
        if self.unload_deadlines.is_empty() {
            return;
        }

        let now = Instant::now();
        let due: Vec<u32> = self
            .unload_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(page, _)| *page)
            .collect();
        if due.is_empty() {
            return;
        }

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        for page_number in due {
            self.unload_deadlines.remove(&page_number);

            if inner.visible.contains(&page_number) {
                continue;
            }
            let Some(entry) = inner.pages.get_mut(&page_number) else {
                continue;
            };
            if entry.state == PageState::Unloaded {
                continue;
            }

            let (width, height) = entry.surface.pixel_size();
            let cleared = entry
                .surface
                .acquire_context()
                .map(|ctx| ctx.clear_rect(ClipRect::new(0, 0, width, height)));
            if let Err(err) = cleared {
                tracing::warn!(page = page_number, error = %err, "surface clear failed during eviction");
            }

            entry.state = PageState::Unloaded;
            inner.stats.evictions += 1;
            tracing::debug!(page = entry.page_number, "page surface evicted");
        }
    }

    /// Disconnect observation and drop all page state.
    ///
    /// Safe to call more than once; accumulated stats stay readable.
    pub fn destroy(&mut self) {
        self.tracker.disconnect();
        self.unload_deadlines.clear();

        let mut inner = self.inner.lock().unwrap();
        inner.pages.clear();
        inner.visible.clear();
        inner.pending.clear();
    }

    pub fn stats(&self) -> ManagerStats {
        self.inner.lock().unwrap().stats
    }

    pub fn runner_stats(&self) -> RunnerStats {
        self.runner.stats()
    }

    pub fn page_state(&self, page_number: u32) -> Option<PageState> {
        self.inner.lock().unwrap().pages.get(&page_number).map(|entry| entry.state)
    }

    pub fn is_rendered(&self, page_number: u32) -> bool {
        self.page_state(page_number) == Some(PageState::Rendered)
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().unwrap().pages.len()
    }

    /// Pages currently inside the tracked region, sorted.
    pub fn visible_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.inner.lock().unwrap().visible.iter().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Pages with a queued or in-flight render, sorted.
    pub fn pending_render(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.inner.lock().unwrap().pending.iter().copied().collect();
        pages.sort_unstable();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::thread;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serial_test::serial;

    use quire_engine::{
        DocumentEngine, EngineError, MemorySurface, OpenSource, PageSize, PlaceholderEngine,
        RgbaImage, SurfaceContext,
    };

    struct NullObserver {
        disconnects: Rc<Cell<u32>>,
    }

    impl VisibilityObserver for NullObserver {
        fn observe(&mut self, _page_number: u32) {}

        fn unobserve(&mut self, _page_number: u32) {}

        fn take_events(&mut self) -> Vec<VisibilityEvent> {
            Vec::new()
        }

        fn disconnect(&mut self) {
            self.disconnects.set(self.disconnects.get() + 1);
        }
    }

    struct SharedSurface {
        inner: Rc<RefCell<MemorySurface>>,
    }

    impl SurfaceContext for SharedSurface {
        fn clear_rect(&mut self, rect: ClipRect) {
            self.inner.borrow_mut().clear_rect(rect);
        }

        fn draw_image(&mut self, image: &RgbaImage) {
            self.inner.borrow_mut().draw_image(image);
        }
    }

    impl DrawingSurface for SharedSurface {
        fn pixel_size(&self) -> (u32, u32) {
            self.inner.borrow().pixel_size()
        }

        fn set_pixel_size(&mut self, width: u32, height: u32) {
            self.inner.borrow_mut().set_pixel_size(width, height);
        }

        fn acquire_context(&mut self) -> Result<&mut dyn SurfaceContext, EngineError> {
            Ok(self)
        }
    }

    /// Engine wrapper that fails renders for a configurable page set.
    struct FlakyEngine {
        inner: PlaceholderEngine,
        fail_render: Arc<Mutex<HashSet<u32>>>,
        resolved: HashMap<u64, u32>,
    }

    impl DocumentEngine for FlakyEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, doc: DocumentHandle) -> Result<u32, EngineError> {
            self.inner.page_count(doc)
        }

        fn page_size(&self, doc: DocumentHandle, page_number: u32) -> Result<PageSize, EngineError> {
            self.inner.page_size(doc, page_number)
        }

        fn page(&mut self, doc: DocumentHandle, page_number: u32) -> Result<PageHandle, EngineError> {
            let handle = self.inner.page(doc, page_number)?;
            self.resolved.insert(handle.raw(), page_number);
            Ok(handle)
        }

        fn page_viewport(&self, page: PageHandle, scale: f32) -> Result<PageViewport, EngineError> {
            self.inner.page_viewport(page, scale)
        }

        fn render(
            &mut self,
            page: PageHandle,
            ctx: &mut dyn SurfaceContext,
            viewport: &PageViewport,
        ) -> Result<(), EngineError> {
            if let Some(page_number) = self.resolved.get(&page.raw()) {
                if self.fail_render.lock().unwrap().contains(page_number) {
                    return Err(EngineError::RenderFailed {
                        page: *page_number,
                        reason: "synthetic failure".to_owned(),
                    });
                }
            }
            self.inner.render(page, ctx, viewport)
        }

        fn close(&mut self, doc: DocumentHandle) -> Result<(), EngineError> {
            self.inner.close(doc)
        }
    }

    fn shared_engine(page_count: u32) -> (SharedEngine, DocumentHandle) {
        let mut engine = PlaceholderEngine::new(page_count, PageSize::new(40.0, 60.0));
        let doc = engine.open(OpenSource::from("manager-tests.quire")).expect("open");
        let shared: SharedEngine = Arc::new(Mutex::new(engine));
        (shared, doc)
    }

    struct Harness {
        manager: PageSurfaceManager,
        pixels: Vec<Rc<RefCell<MemorySurface>>>,
        disconnects: Rc<Cell<u32>>,
    }

    impl Harness {
        fn pixels(&self, page_number: u32) -> &Rc<RefCell<MemorySurface>> {
            &self.pixels[(page_number - 1) as usize]
        }
    }

    fn harness(page_count: u32, config: ManagerConfig) -> Harness {
        let (engine, doc) = shared_engine(page_count);
        harness_with_engine(engine, doc, page_count, config)
    }

    fn harness_with_engine(
        engine: SharedEngine,
        doc: DocumentHandle,
        page_count: u32,
        config: ManagerConfig,
    ) -> Harness {
        let disconnects = Rc::new(Cell::new(0));
        let observer = NullObserver { disconnects: Rc::clone(&disconnects) };
        let mut manager = PageSurfaceManager::new(engine, doc, Box::new(observer), config);

        let viewport = PageViewport { width: 40.0, height: 60.0, scale: 1.0 };
        let mut pixels = Vec::new();
        for page_number in 1..=page_count {
            let buffer = Rc::new(RefCell::new(MemorySurface::new(40, 60)));
            let surface = SharedSurface { inner: Rc::clone(&buffer) };
            pixels.push(buffer);
            manager.add_page(page_number, Box::new(surface), None, viewport);
        }

        Harness { manager, pixels, disconnects }
    }

    fn enters(pages: &[u32]) -> Vec<VisibilityEvent> {
        pages.iter().map(|&p| VisibilityEvent::enter(p)).collect()
    }

    #[test]
    fn test_pages_render_only_when_visible() {
        let mut h = harness(50, ManagerConfig::default());

        h.manager.apply_visibility(&enters(&[1, 2, 3]));

        assert_eq!(h.manager.page_count(), 50);
        assert_eq!(h.manager.visible_pages(), vec![1, 2, 3]);
        assert!(h.manager.pending_render().is_empty());

        for page_number in 1..=3 {
            assert!(h.manager.is_rendered(page_number));
            assert!(!h.pixels(page_number).borrow().is_blank());
        }
        assert_eq!(h.manager.page_state(4), Some(PageState::Unloaded));
        assert!(h.pixels(4).borrow().is_blank());

        assert_eq!(h.manager.stats().renders_completed, 3);
        assert_eq!(h.manager.runner_stats().tasks_completed, 3);
    }

    #[test]
    fn test_rendered_page_not_requeued_on_reentry() {
        let mut h = harness(5, ManagerConfig::default());

        h.manager.apply_visibility(&enters(&[1]));
        assert_eq!(h.manager.stats().renders_completed, 1);

        h.manager.apply_visibility(&[VisibilityEvent::exit(1)]);
        h.manager.apply_visibility(&enters(&[1]));

        // Pixels survived the grace window, so nothing was redrawn.
        assert_eq!(h.manager.stats().renders_completed, 1);
        assert!(h.manager.is_rendered(1));
        assert!(h.manager.pending_render().is_empty());
    }

    #[test]
    fn test_exit_in_same_batch_cancels_render() {
        let mut h = harness(5, ManagerConfig::default());

        h.manager.apply_visibility(&[VisibilityEvent::enter(5), VisibilityEvent::exit(5)]);

        assert_eq!(h.manager.page_state(5), Some(PageState::Unloaded));
        assert_eq!(h.manager.stats().renders_cancelled, 1);
        assert_eq!(h.manager.stats().renders_completed, 0);
        assert!(h.pixels(5).borrow().is_blank());
        assert!(h.manager.pending_render().is_empty());
    }

    #[test]
    #[serial]
    fn test_eviction_after_grace_resets_surface() {
        let config = ManagerConfig::default().with_grace_delay(Duration::from_millis(30));
        let mut h = harness(5, config);

        h.manager.apply_visibility(&enters(&[2]));
        assert!(h.manager.is_rendered(2));

        h.manager.apply_visibility(&[VisibilityEvent::exit(2)]);
        assert!(h.manager.is_rendered(2));

        thread::sleep(Duration::from_millis(60));
        h.manager.poll();

        assert_eq!(h.manager.page_state(2), Some(PageState::Unloaded));
        assert_eq!(h.manager.stats().evictions, 1);
        assert!(h.pixels(2).borrow().is_blank());

        // Scrolling back redraws onto the same surface.
        h.manager.apply_visibility(&enters(&[2]));
        assert!(h.manager.is_rendered(2));
        assert_eq!(h.manager.stats().renders_completed, 2);
        assert!(!h.pixels(2).borrow().is_blank());
    }

    #[test]
    #[serial]
    fn test_reentry_within_grace_cancels_eviction() {
        let config = ManagerConfig::default().with_grace_delay(Duration::from_millis(40));
        let mut h = harness(5, config);

        h.manager.apply_visibility(&enters(&[3]));
        h.manager.apply_visibility(&[VisibilityEvent::exit(3)]);

        thread::sleep(Duration::from_millis(10));
        h.manager.apply_visibility(&enters(&[3]));

        thread::sleep(Duration::from_millis(60));
        h.manager.poll();

        assert!(h.manager.is_rendered(3));
        assert_eq!(h.manager.stats().evictions, 0);
        assert_eq!(h.manager.stats().renders_completed, 1);
        assert!(!h.pixels(3).borrow().is_blank());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut h = harness(5, ManagerConfig::default());
        h.manager.apply_visibility(&enters(&[1]));

        h.manager.destroy();
        h.manager.destroy();

        assert_eq!(h.disconnects.get(), 1);
        assert_eq!(h.manager.page_count(), 0);
        assert!(h.manager.visible_pages().is_empty());
        assert_eq!(h.manager.stats().renders_completed, 1);

        // Polling a destroyed manager is harmless.
        h.manager.poll();
    }

    #[test]
    fn test_failed_render_is_isolated_and_retryable() {
        let fail_render = Arc::new(Mutex::new(HashSet::from([2])));
        let mut engine = FlakyEngine {
            inner: PlaceholderEngine::new(5, PageSize::new(40.0, 60.0)),
            fail_render: Arc::clone(&fail_render),
            resolved: HashMap::new(),
        };
        let doc = engine.open(OpenSource::from("flaky.quire")).expect("open");
        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        let mut h = harness_with_engine(engine, doc, 5, ManagerConfig::default());

        h.manager.apply_visibility(&enters(&[1, 2, 3]));

        assert!(h.manager.is_rendered(1));
        assert!(h.manager.is_rendered(3));
        assert_eq!(h.manager.page_state(2), Some(PageState::Unloaded));
        assert_eq!(h.manager.stats().renders_failed, 1);
        assert_eq!(h.manager.stats().renders_completed, 2);
        assert!(h.manager.pending_render().is_empty());

        // The page renders on the next enter once the engine recovers.
        fail_render.lock().unwrap().clear();
        h.manager.apply_visibility(&enters(&[2]));

        assert!(h.manager.is_rendered(2));
        assert_eq!(h.manager.stats().renders_completed, 3);
    }

    #[test]
    fn test_visibility_churn_keeps_collections_consistent() {
        let config = ManagerConfig::default().with_grace_delay(Duration::ZERO);
        let mut h = harness(20, config);
        let mut rng = StdRng::seed_from_u64(7);
        let mut model: HashSet<u32> = HashSet::new();

        for _ in 0..200 {
            let mut events = Vec::new();
            for _ in 0..rng.gen_range(1..=3) {
                let page_number = rng.gen_range(1..=20u32);
                if model.remove(&page_number) {
                    events.push(VisibilityEvent::exit(page_number));
                } else {
                    model.insert(page_number);
                    events.push(VisibilityEvent::enter(page_number));
                }
            }

            h.manager.apply_visibility(&events);
            h.manager.poll();

            assert!(h.manager.pending_render().is_empty());

            let mut expected: Vec<u32> = model.iter().copied().collect();
            expected.sort_unstable();
            assert_eq!(h.manager.visible_pages(), expected);

            for page_number in 1..=20 {
                if h.manager.is_rendered(page_number) {
                    assert!(model.contains(&page_number));
                }
            }
        }

        let stats = h.manager.stats();
        assert!(stats.renders_completed > 0);
        assert!(stats.evictions > 0);
        assert_eq!(stats.renders_failed, 0);
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let config = ManagerConfig::default().with_grace_delay(Duration::ZERO);
        let mut h = harness(5, config);

        h.manager.apply_visibility(&enters(&[1, 2]));
        h.manager.apply_visibility(&[VisibilityEvent::exit(1)]);
        h.manager.poll();
        h.manager.apply_visibility(&[VisibilityEvent::enter(4), VisibilityEvent::exit(4)]);
        h.manager.poll();

        let stats = h.manager.stats();
        assert_eq!(stats.renders_completed, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.renders_cancelled, 1);
        assert_eq!(stats.renders_failed, 0);
    }

    #[test]
    fn test_events_for_unknown_pages_are_ignored() {
        let mut h = harness(3, ManagerConfig::default());

        h.manager.apply_visibility(&[VisibilityEvent::enter(99), VisibilityEvent::exit(98)]);

        assert!(h.manager.visible_pages().is_empty());
        assert_eq!(h.manager.stats(), ManagerStats::default());
    }
}
