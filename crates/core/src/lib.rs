//! Windowed page-surface viewing for very large paginated documents
//!
//! Keeps a document of thousands of pages responsive by materializing
//! only the pages near the viewport. Surfaces render as they approach,
//! are cleared again a grace period after they leave, and the scroll
//! anchor survives zoom-driven rebuilds of the whole page set.
//!
//! [`view::DocumentView`] is the top-level entry point; it drives a
//! [`manager::PageSurfaceManager`] from the visibility transitions a
//! host-provided observer reports, and renders through whatever
//! `quire_engine::DocumentEngine` the host supplies.

pub mod manager;
pub mod page;
mod render;
pub mod view;
pub mod visibility;

pub use manager::{ManagerConfig, ManagerStats, PageSurfaceManager, DEFAULT_GRACE_DELAY};
pub use page::PageState;
pub use view::{
    DocumentView, ViewConfig, ViewError, ViewRoot, DEFAULT_RESIZE_DEBOUNCE,
    DEFAULT_THUMBNAIL_SCALE,
};
pub use visibility::{
    VisibilityConfig, VisibilityEvent, VisibilityObserver, VisibilityTracker,
    DEFAULT_VISIBILITY_MARGIN, DEFAULT_VISIBILITY_THRESHOLD,
};
