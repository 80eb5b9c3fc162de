//! Per-page surface state
//!
//! Each page of the open document owns one drawing surface for the
//! lifetime of the page set. Eviction wipes the surface's pixels but
//! never releases it, so a page scrolling back into range redraws onto
//! the same surface at the same dimensions.

use quire_engine::{DrawingSurface, PageHandle, PageViewport};

/// Lifecycle of a single page surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// The surface holds no pixels and no work is queued for it.
    Unloaded,
    /// A render was requested but its task has not started yet.
    Queued,
    /// The render task is past page resolution and has not finished drawing.
    Rendering,
    /// The surface holds the drawn page.
    Rendered,
}

pub(crate) struct PageEntry {
    pub(crate) page_number: u32,
    pub(crate) surface: Box<dyn DrawingSurface>,
    /// Engine page handle, kept once resolved so later re-renders skip
    /// the lookup.
    pub(crate) document_page: Option<PageHandle>,
    pub(crate) viewport: PageViewport,
    pub(crate) state: PageState,
}

impl PageEntry {
    pub(crate) fn new(
        page_number: u32,
        surface: Box<dyn DrawingSurface>,
        document_page: Option<PageHandle>,
        viewport: PageViewport,
    ) -> Self {
        Self {
            page_number,
            surface,
            document_page,
            viewport,
            state: PageState::Unloaded,
        }
    }

    pub(crate) fn is_rendered(&self) -> bool {
        self.state == PageState::Rendered
    }
}
