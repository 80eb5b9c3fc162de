//! Render work items
//!
//! A page render runs as two steps with a suspension point between them:
//! resolve the engine's page handle, then draw onto the page surface.
//! The gap between the steps is where cancellation is observed. A page
//! that scrolled back out of range before its draw step runs is dropped
//! from the pending set, and the task notices by re-checking membership
//! when it resumes.

use std::sync::{Arc, Mutex};

use quire_engine::{
    DocumentHandle, DrawingSurface, EngineError, MemorySurface, PageHandle, RgbaImage,
    SharedEngine,
};
use quire_scheduler::{StepResult, Task};

use crate::manager::ManagerInner;
use crate::page::PageState;

enum RenderPhase {
    Resolve,
    Paint(PageHandle),
}

/// Renders one page onto its registered surface.
pub(crate) struct RenderTask {
    inner: Arc<Mutex<ManagerInner>>,
    engine: SharedEngine,
    doc: DocumentHandle,
    page_number: u32,
    phase: RenderPhase,
}

impl RenderTask {
    pub(crate) fn new(
        inner: Arc<Mutex<ManagerInner>>,
        engine: SharedEngine,
        doc: DocumentHandle,
        page_number: u32,
    ) -> Self {
        Self {
            inner,
            engine,
            doc,
            page_number,
            phase: RenderPhase::Resolve,
        }
    }

    fn resolve_step(&mut self) -> StepResult {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        let Some(entry) = inner.pages.get_mut(&self.page_number) else {
            return StepResult::Complete;
        };
        if entry.is_rendered() {
            return StepResult::Complete;
        }

        // A handle resolved on an earlier pass survives eviction and is
        // reused without another engine lookup.
        let resolved = match entry.document_page {
            Some(page) => Ok(page),
            None => self.engine.lock().unwrap().page(self.doc, self.page_number),
        };

        match resolved {
            Ok(page) => {
                entry.document_page = Some(page);
                entry.state = PageState::Rendering;
                self.phase = RenderPhase::Paint(page);
                StepResult::Pending
            }
            Err(err) => {
                tracing::warn!(page = self.page_number, error = %err, "page resolution failed");
                entry.state = PageState::Unloaded;
                inner.pending.remove(&self.page_number);
                inner.stats.renders_failed += 1;
                StepResult::Failed
            }
        }
    }

    fn paint_step(&mut self, page: PageHandle) -> StepResult {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if !inner.pending.contains(&self.page_number) {
            // The page left the tracked region between the steps.
            if let Some(entry) = inner.pages.get_mut(&self.page_number) {
                if entry.state == PageState::Rendering {
                    entry.state = PageState::Unloaded;
                }
            }
            inner.stats.renders_cancelled += 1;
            tracing::debug!(page = self.page_number, "render cancelled before draw");
            return StepResult::Complete;
        }

        let Some(entry) = inner.pages.get_mut(&self.page_number) else {
            inner.pending.remove(&self.page_number);
            return StepResult::Complete;
        };

        let viewport = entry.viewport;
        let drawn = entry
            .surface
            .acquire_context()
            .and_then(|ctx| self.engine.lock().unwrap().render(page, ctx, &viewport));

        match drawn {
            Ok(()) => {
                entry.state = PageState::Rendered;
                inner.pending.remove(&self.page_number);
                inner.stats.renders_completed += 1;
                tracing::debug!(page = self.page_number, "page rendered");
                StepResult::Complete
            }
            Err(err) => {
                tracing::warn!(page = self.page_number, error = %err, "page render failed");
                entry.state = PageState::Unloaded;
                inner.pending.remove(&self.page_number);
                inner.stats.renders_failed += 1;
                StepResult::Failed
            }
        }
    }
}

impl Task for RenderTask {
    fn run_step(&mut self) -> StepResult {
        match self.phase {
            RenderPhase::Resolve => self.resolve_step(),
            RenderPhase::Paint(page) => self.paint_step(page),
        }
    }
}

enum ThumbnailPhase {
    Resolve,
    Paint(PageHandle),
}

/// Renders one page at thumbnail scale into an off-screen buffer.
///
/// Finished images land in a shared outbox; a failed page is skipped
/// without disturbing the rest of the batch.
pub(crate) struct ThumbnailTask {
    engine: SharedEngine,
    doc: DocumentHandle,
    page_number: u32,
    scale: f32,
    outbox: Arc<Mutex<Vec<(u32, RgbaImage)>>>,
    phase: ThumbnailPhase,
}

impl ThumbnailTask {
    pub(crate) fn new(
        engine: SharedEngine,
        doc: DocumentHandle,
        page_number: u32,
        scale: f32,
        outbox: Arc<Mutex<Vec<(u32, RgbaImage)>>>,
    ) -> Self {
        Self {
            engine,
            doc,
            page_number,
            scale,
            outbox,
            phase: ThumbnailPhase::Resolve,
        }
    }

    fn resolve_step(&mut self) -> StepResult {
        match self.engine.lock().unwrap().page(self.doc, self.page_number) {
            Ok(page) => {
                self.phase = ThumbnailPhase::Paint(page);
                StepResult::Pending
            }
            Err(err) => {
                tracing::warn!(page = self.page_number, error = %err, "thumbnail resolution failed");
                StepResult::Failed
            }
        }
    }

    fn paint_step(&mut self, page: PageHandle) -> StepResult {
        match self.render_thumbnail(page) {
            Ok(image) => {
                self.outbox.lock().unwrap().push((self.page_number, image));
                StepResult::Complete
            }
            Err(err) => {
                tracing::warn!(page = self.page_number, error = %err, "thumbnail render failed");
                StepResult::Failed
            }
        }
    }

    fn render_thumbnail(&self, page: PageHandle) -> Result<RgbaImage, EngineError> {
        let mut engine = self.engine.lock().unwrap();
        let viewport = engine.page_viewport(page, self.scale)?;
        let mut surface = MemorySurface::new(viewport.pixel_width(), viewport.pixel_height());
        let ctx = surface.acquire_context()?;
        engine.render(page, ctx, &viewport)?;
        Ok(surface.into_image())
    }
}

impl Task for ThumbnailTask {
    fn run_step(&mut self) -> StepResult {
        match self.phase {
            ThumbnailPhase::Resolve => self.resolve_step(),
            ThumbnailPhase::Paint(page) => self.paint_step(page),
        }
    }
}
