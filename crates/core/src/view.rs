//! Document view orchestration
//!
//! [`DocumentView`] ties the pieces together for one open document: it
//! builds the page set into a host-provided [`ViewRoot`], keeps zoom and
//! scroll session state, and pumps the page surface manager once per
//! frame. Scroll repositioning after a zoom and the rebuild after a
//! resize both run deferred, so the host finishes its layout pass before
//! the view touches scroll offsets again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use quire_engine::{
    DocumentHandle, DrawingSurface, EngineError, OpenSource, PageSize, PageViewport, RgbaImage,
    SharedEngine,
};
use quire_scheduler::{HostScheduler, PostPriority, RunnerConfig, Task, TaskRunner};
use quire_viewer_core::{
    current_page_at, effective_scale, preserved_scroll_top, reposition_scroll, PageLayout,
    ScrollPosition, ViewSession, ZoomSelection,
};

use crate::manager::{ManagerConfig, ManagerStats, PageSurfaceManager};
use crate::render::ThumbnailTask;
use crate::visibility::{VisibilityConfig, VisibilityObserver};

/// Quiet period required before a resize triggers a rebuild.
pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(150);

/// Scale used for thumbnail rendering.
pub const DEFAULT_THUMBNAIL_SCALE: f32 = 0.15;

/// Surface tree and scroll container the view builds pages into.
///
/// The root owns the actual widgets or DOM-like nodes; the view only
/// asks for surfaces, scroll offsets, and an intersection observer
/// rooted at the scroll container.
pub trait ViewRoot {
    /// Viewport dimensions in pixels.
    fn viewport_size(&self) -> (f32, f32);

    fn scroll_position(&self) -> ScrollPosition;

    fn set_scroll_position(&mut self, scroll: ScrollPosition);

    /// Vertical spacing between consecutive pages, in pixels.
    fn page_gap(&self) -> f32;

    /// Create the surface for one page at the given pixel dimensions.
    fn create_surface(
        &mut self,
        page_number: u32,
        width: u32,
        height: u32,
    ) -> Box<dyn DrawingSurface>;

    /// Remove every page surface from the tree.
    fn clear_surfaces(&mut self);

    /// Receive a finished thumbnail image.
    fn present_thumbnail(&mut self, page_number: u32, image: RgbaImage);

    /// Create an intersection observer over the page surfaces.
    fn create_observer(&mut self, config: &VisibilityConfig) -> Box<dyn VisibilityObserver>;
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("no document is open")]
    NoDocument,
}

/// Configuration for a [`DocumentView`].
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Viewport resizes are coalesced until quiet for this long.
    pub resize_debounce: Duration,

    /// Scale applied when rendering thumbnails.
    pub thumbnail_scale: f32,

    /// Observation parameters for the page tracker.
    pub visibility: VisibilityConfig,

    /// Page surface manager settings.
    pub manager: ManagerConfig,

    /// Runner settings for thumbnail batches.
    pub thumbnail_runner: RunnerConfig,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            resize_debounce: DEFAULT_RESIZE_DEBOUNCE,
            thumbnail_scale: DEFAULT_THUMBNAIL_SCALE,
            visibility: VisibilityConfig::default(),
            manager: ManagerConfig::default(),
            thumbnail_runner: RunnerConfig::default()
                .with_batch_size(2)
                .with_frame_budget(Duration::from_millis(12)),
        }
    }
}

impl ViewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resize_debounce(mut self, resize_debounce: Duration) -> Self {
        self.resize_debounce = resize_debounce;
        self
    }

    pub fn with_thumbnail_scale(mut self, thumbnail_scale: f32) -> Self {
        self.thumbnail_scale = thumbnail_scale;
        self
    }

    pub fn with_visibility(mut self, visibility: VisibilityConfig) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_thumbnail_runner(mut self, thumbnail_runner: RunnerConfig) -> Self {
        self.thumbnail_runner = thumbnail_runner;
        self
    }
}

/// A windowed view over one paginated document.
///
/// Call [`on_frame`](DocumentView::on_frame) once per host frame; it
/// applies deferred scroll updates, runs any rebuild requested by a
/// resize, and polls the page surface manager.
pub struct DocumentView<R: ViewRoot> {
    root: R,
    engine: SharedEngine,
    host: Option<Arc<dyn HostScheduler>>,
    config: ViewConfig,
    session: ViewSession,
    doc: Option<DocumentHandle>,
    page_count: u32,
    base_size: PageSize,
    layout: PageLayout,
    manager: Option<PageSurfaceManager>,
    deferred_scroll: Arc<Mutex<Option<ScrollPosition>>>,
    rebuild_requested: Arc<AtomicBool>,
    resize_deadline: Option<Instant>,
}

impl<R: ViewRoot> DocumentView<R> {
    pub fn new(root: R, engine: SharedEngine, config: ViewConfig) -> Self {
        Self::assemble(root, engine, config, None)
    }

    /// Like [`new`](DocumentView::new), but defers scroll and rebuild
    /// work through the host scheduler when it supports task posting.
    pub fn with_host(
        root: R,
        engine: SharedEngine,
        config: ViewConfig,
        host: Arc<dyn HostScheduler>,
    ) -> Self {
        Self::assemble(root, engine, config, Some(host))
    }

    fn assemble(
        root: R,
        engine: SharedEngine,
        config: ViewConfig,
        host: Option<Arc<dyn HostScheduler>>,
    ) -> Self {
        Self {
            root,
            engine,
            host,
            config,
            session: ViewSession::default(),
            doc: None,
            page_count: 0,
            base_size: PageSize::LETTER,
            layout: PageLayout::new(0.0, 0.0, 0),
            manager: None,
            deferred_scroll: Arc::new(Mutex::new(None)),
            rebuild_requested: Arc::new(AtomicBool::new(false)),
            resize_deadline: None,
        }
    }

    /// Open a document and build its page set at the default session.
    pub fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, ViewError> {
        let (doc, page_count, base_size) = {
            let mut engine = self.engine.lock().unwrap();
            let doc = engine.open(source)?;
            let page_count = engine.page_count(doc)?;
            let base_size = if page_count > 0 {
                engine.page_size(doc, 1)?
            } else {
                PageSize::new(0.0, 0.0)
            };
            (doc, page_count, base_size)
        };

        self.doc = Some(doc);
        self.page_count = page_count;
        self.base_size = base_size;
        self.session = ViewSession::default();
        self.rebuild_pages(false)?;

        tracing::info!(pages = page_count, "document opened");
        Ok(doc)
    }

    /// Tear down and rebuild the page set at the session's zoom.
    ///
    /// The manager and its observer are recreated from the root, so
    /// surfaces from the previous build are never observed again. The
    /// proportional scroll position is restored unless
    /// `skip_scroll_restore` is set; zoom changes set it because they
    /// reposition on the page anchor afterwards.
    pub fn rebuild_pages(&mut self, skip_scroll_restore: bool) -> Result<(), ViewError> {
        let doc = self.doc.ok_or(ViewError::NoDocument)?;

        let previous_scroll = self.root.scroll_position();
        let previous_total = self.layout.total_height();
        let previous_page = self.session.page_number;

        if let Some(mut manager) = self.manager.take() {
            manager.destroy();
        }
        self.root.clear_surfaces();

        let (viewport_width, viewport_height) = self.root.viewport_size();
        let scale = effective_scale(
            self.session.zoom_mode,
            self.session.scale,
            viewport_width,
            viewport_height,
            self.base_size.width,
            self.base_size.height,
        );
        self.session.scale = scale;

        let observer = self.root.create_observer(&self.config.visibility);
        let mut manager = match &self.host {
            Some(host) => PageSurfaceManager::with_host(
                Arc::clone(&self.engine),
                doc,
                observer,
                self.config.manager.clone(),
                Arc::clone(host),
            ),
            None => PageSurfaceManager::new(
                Arc::clone(&self.engine),
                doc,
                observer,
                self.config.manager.clone(),
            ),
        };

        let viewport = PageViewport {
            width: self.base_size.width * scale,
            height: self.base_size.height * scale,
            scale,
        };
        let pixel_width = viewport.pixel_width();
        let pixel_height = viewport.pixel_height();

        for page_number in 1..=self.page_count {
            let surface = self.root.create_surface(page_number, pixel_width, pixel_height);
            manager.add_page(page_number, surface, None, viewport);
        }
        self.manager = Some(manager);

        self.layout = PageLayout::new(pixel_height as f32, self.root.page_gap(), self.page_count);

        if !skip_scroll_restore {
            let restored = ScrollPosition::new(
                previous_scroll.left,
                preserved_scroll_top(
                    previous_scroll.top,
                    previous_total,
                    self.layout.total_height(),
                ),
            );
            self.root.set_scroll_position(restored);
            self.session.scroll = restored;
            self.session.page_number = previous_page;
        }

        tracing::debug!(pages = self.page_count, scale, "page set rebuilt");
        Ok(())
    }

    pub fn zoom_in(&mut self) -> Result<(), ViewError> {
        self.apply_zoom(|session| session.zoom_in())
    }

    pub fn zoom_out(&mut self) -> Result<(), ViewError> {
        self.apply_zoom(|session| session.zoom_out())
    }

    pub fn select_zoom(&mut self, selection: ZoomSelection) -> Result<(), ViewError> {
        self.apply_zoom(move |session| session.select_zoom(selection))
    }

    /// Change the zoom, rebuild, and queue a scroll update that keeps
    /// the previously topmost page anchored.
    fn apply_zoom(&mut self, change: impl FnOnce(&mut ViewSession)) -> Result<(), ViewError> {
        let old_scale = self.session.scale;
        let old_scroll = self.root.scroll_position();
        let old_layout = self.layout;

        change(&mut self.session);
        self.rebuild_pages(true)?;

        let scroll = reposition_scroll(
            old_scroll,
            old_scale,
            self.session.scale,
            &old_layout,
            &self.layout,
        );
        self.defer_scroll(scroll);
        Ok(())
    }

    fn defer_scroll(&mut self, scroll: ScrollPosition) {
        match &self.host {
            Some(host) if host.has_post_task() => {
                let slot = Arc::clone(&self.deferred_scroll);
                host.post_task(
                    PostPriority::UserVisible,
                    Box::new(move || {
                        *slot.lock().unwrap() = Some(scroll);
                    }),
                );
            }
            _ => {
                *self.deferred_scroll.lock().unwrap() = Some(scroll);
            }
        }
    }

    fn request_rebuild(&mut self) {
        match &self.host {
            Some(host) if host.has_post_task() => {
                let flag = Arc::clone(&self.rebuild_requested);
                host.post_task(
                    PostPriority::UserVisible,
                    Box::new(move || {
                        flag.store(true, Ordering::SeqCst);
                    }),
                );
            }
            _ => self.rebuild_requested.store(true, Ordering::SeqCst),
        }
    }

    /// Per-frame pump.
    ///
    /// Applies a deferred scroll update, runs a requested rebuild, polls
    /// the manager for visibility work, and fires the resize deadline
    /// once the debounce window has passed.
    pub fn on_frame(&mut self) {
        let deferred = self.deferred_scroll.lock().unwrap().take();
        if let Some(scroll) = deferred {
            self.root.set_scroll_position(scroll);
            self.session.scroll = scroll;
        }

        if self.rebuild_requested.swap(false, Ordering::SeqCst) {
            if let Err(err) = self.rebuild_pages(false) {
                tracing::warn!(error = %err, "rebuild after resize failed");
            }
        }

        if let Some(manager) = &mut self.manager {
            manager.poll();
        }

        if let Some(deadline) = self.resize_deadline {
            if Instant::now() >= deadline {
                self.resize_deadline = None;
                self.request_rebuild();
            }
        }
    }

    /// Note a viewport resize. The rebuild runs after the size has been
    /// stable for the debounce window; repeated calls push the deadline
    /// out.
    pub fn handle_resize(&mut self) {
        self.resize_deadline = Some(Instant::now() + self.config.resize_debounce);
    }

    /// Record the host's scroll position and update the current page.
    pub fn handle_scroll(&mut self) {
        let scroll = self.root.scroll_position();
        self.session.scroll = scroll;

        let (_, viewport_height) = self.root.viewport_size();
        self.session.page_number = current_page_at(
            &self.layout,
            scroll.top,
            viewport_height,
            self.session.page_number,
        );
    }

    /// Jump so the page's top edge aligns with the viewport top.
    ///
    /// Out-of-range page numbers are ignored. The horizontal offset is
    /// left untouched.
    pub fn scroll_to_page(&mut self, page_number: u32) {
        if page_number == 0 || page_number > self.page_count {
            return;
        }

        let mut scroll = self.root.scroll_position();
        scroll.top = self.layout.page_start_offset(page_number);
        self.root.set_scroll_position(scroll);
        self.session.scroll = scroll;
        self.session.page_number = page_number;
    }

    pub fn next_page(&mut self) {
        if self.session.page_number >= self.page_count {
            return;
        }
        self.scroll_to_page(self.session.page_number + 1);
    }

    pub fn previous_page(&mut self) {
        if self.session.page_number <= 1 {
            return;
        }
        self.scroll_to_page(self.session.page_number - 1);
    }

    /// Render every page at thumbnail scale and hand the images to the
    /// root as they finish.
    ///
    /// Runs on its own small-batch runner so a long document cannot hold
    /// a frame; pages that fail are skipped.
    pub fn render_thumbnails(&mut self) -> Result<(), ViewError> {
        let doc = self.doc.ok_or(ViewError::NoDocument)?;

        let mut runner = match &self.host {
            Some(host) => {
                TaskRunner::with_host(self.config.thumbnail_runner.clone(), Arc::clone(host))
            }
            None => TaskRunner::new(self.config.thumbnail_runner.clone()),
        };

        let outbox: Arc<Mutex<Vec<(u32, RgbaImage)>>> = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<Box<dyn Task>> = (1..=self.page_count)
            .map(|page_number| {
                Box::new(ThumbnailTask::new(
                    Arc::clone(&self.engine),
                    doc,
                    page_number,
                    self.config.thumbnail_scale,
                    Arc::clone(&outbox),
                )) as Box<dyn Task>
            })
            .collect();

        runner.run_batched(tasks);

        let images = std::mem::take(&mut *outbox.lock().unwrap());
        for (page_number, image) in images {
            self.root.present_thumbnail(page_number, image);
        }
        Ok(())
    }

    /// Snapshot of the session with the scroll position read live from
    /// the root.
    pub fn session(&self) -> ViewSession {
        ViewSession {
            scroll: self.root.scroll_position(),
            ..self.session
        }
    }

    /// Restore a saved session: zoom mode, scale, scroll, and current
    /// page.
    pub fn restore_session(&mut self, session: ViewSession) -> Result<(), ViewError> {
        self.session = session;
        self.rebuild_pages(true)?;

        self.root.set_scroll_position(session.scroll);
        self.session.scroll = session.scroll;
        Ok(())
    }

    /// Tear down the page set and drop deferred work.
    ///
    /// Idempotent. The engine document stays open; reopening the view
    /// means rebuilding, not re-parsing.
    pub fn destroy(&mut self) {
        if let Some(mut manager) = self.manager.take() {
            manager.destroy();
        }
        self.resize_deadline = None;
        *self.deferred_scroll.lock().unwrap() = None;
        self.rebuild_requested.store(false, Ordering::SeqCst);
    }

    pub fn root(&self) -> &R {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut R {
        &mut self.root
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn current_page(&self) -> u32 {
        self.session.page_number
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn manager(&self) -> Option<&PageSurfaceManager> {
        self.manager.as_ref()
    }

    pub fn manager_stats(&self) -> ManagerStats {
        self.manager.as_ref().map(|m| m.stats()).unwrap_or_default()
    }
}
