//! Document engine abstraction
//!
//! Defines the seam between the viewer and whatever actually rasterizes
//! document pages. The viewer talks only to [`DocumentEngine`] and draws
//! through [`SurfaceContext`], so engines and output targets are
//! interchangeable. [`PlaceholderEngine`] and [`MemorySurface`] are the
//! in-process reference implementations used throughout the tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use image::Rgba;
use thiserror::Error;

pub use image::RgbaImage;

/// Opaque identifier for an open document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque identifier for a resolved page within an open document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle(u64);

impl PageHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Intrinsic page dimensions in logical units (scale 1.0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    /// US Letter at 96 dpi
    pub const LETTER: PageSize = PageSize { width: 816.0, height: 1056.0 };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Page dimensions after applying a scale factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl PageViewport {
    /// Width in whole pixels, floored, at least one
    pub fn pixel_width(&self) -> u32 {
        self.width.floor().max(1.0) as u32
    }

    /// Height in whole pixels, floored, at least one
    pub fn pixel_height(&self) -> u32 {
        self.height.floor().max(1.0) as u32
    }
}

/// Axis-aligned rectangle in surface pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Where a document is loaded from
#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(path: PathBuf) -> Self {
        OpenSource::Path(path)
    }
}

impl From<&str> for OpenSource {
    fn from(path: &str) -> Self {
        OpenSource::Path(PathBuf::from(path))
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(bytes: Vec<u8>) -> Self {
        OpenSource::Bytes(bytes)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    #[error("page {page} out of range, document has {page_count} pages")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("drawing context unavailable")]
    ContextUnavailable,

    #[error("render failed for page {page}: {reason}")]
    RenderFailed { page: u32, reason: String },

    #[error("engine backend error: {0}")]
    Backend(String),
}

/// Drawing operations a render target must support
///
/// Mirrors the minimal raster surface the viewer needs: wipe a region
/// and blit a finished page image.
pub trait SurfaceContext {
    /// Reset the rectangle to fully transparent pixels
    fn clear_rect(&mut self, rect: ClipRect);

    /// Copy the image onto the surface at the origin
    fn draw_image(&mut self, image: &RgbaImage);
}

/// A per-page render target with adjustable pixel dimensions
///
/// `acquire_context` fails when the host cannot hand out a drawing
/// context, which callers treat as a failed render for that page.
pub trait DrawingSurface {
    fn pixel_size(&self) -> (u32, u32);

    fn set_pixel_size(&mut self, width: u32, height: u32);

    fn acquire_context(&mut self) -> Result<&mut dyn SurfaceContext, EngineError>;
}

/// Rasterization backend for paginated documents
///
/// Page numbers are 1-based throughout. `page` resolves a page to a
/// handle and may be slow; `page_size` answers from document metadata
/// without resolving.
pub trait DocumentEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError>;

    fn page_count(&self, doc: DocumentHandle) -> Result<u32, EngineError>;

    fn page_size(&self, doc: DocumentHandle, page_number: u32) -> Result<PageSize, EngineError>;

    fn page(&mut self, doc: DocumentHandle, page_number: u32) -> Result<PageHandle, EngineError>;

    fn page_viewport(&self, page: PageHandle, scale: f32) -> Result<PageViewport, EngineError>;

    fn render(
        &mut self,
        page: PageHandle,
        ctx: &mut dyn SurfaceContext,
        viewport: &PageViewport,
    ) -> Result<(), EngineError>;

    fn close(&mut self, doc: DocumentHandle) -> Result<(), EngineError>;
}

/// Engine shared between the view and in-flight render tasks
pub type SharedEngine = Arc<Mutex<dyn DocumentEngine + Send>>;

struct PlaceholderDoc {
    page_count: u32,
    page_size: PageSize,
}

struct ResolvedPage {
    doc: u64,
    page_number: u32,
}

/// Engine that fabricates blank pages of a fixed size
///
/// Every opened document reports the configured page count and uniform
/// page size. Rendering paints a white sheet with a light gray border,
/// enough to tell a drawn page from an empty surface.
pub struct PlaceholderEngine {
    page_count: u32,
    page_size: PageSize,
    next_doc: u64,
    next_page: u64,
    docs: HashMap<u64, PlaceholderDoc>,
    pages: HashMap<u64, ResolvedPage>,
}

impl PlaceholderEngine {
    pub fn new(page_count: u32, page_size: PageSize) -> Self {
        Self {
            page_count,
            page_size,
            next_doc: 1,
            next_page: 1,
            docs: HashMap::new(),
            pages: HashMap::new(),
        }
    }

    fn doc(&self, handle: DocumentHandle) -> Result<&PlaceholderDoc, EngineError> {
        self.docs
            .get(&handle.raw())
            .ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn check_page_number(doc: &PlaceholderDoc, page_number: u32) -> Result<(), EngineError> {
        if page_number == 0 || page_number > doc.page_count {
            return Err(EngineError::PageOutOfRange {
                page: page_number,
                page_count: doc.page_count,
            });
        }
        Ok(())
    }
}

impl DocumentEngine for PlaceholderEngine {
    fn open(&mut self, _source: OpenSource) -> Result<DocumentHandle, EngineError> {
        let handle = self.next_doc;
        self.next_doc += 1;
        self.docs.insert(
            handle,
            PlaceholderDoc { page_count: self.page_count, page_size: self.page_size },
        );
        Ok(DocumentHandle::from_raw(handle))
    }

    fn page_count(&self, doc: DocumentHandle) -> Result<u32, EngineError> {
        Ok(self.doc(doc)?.page_count)
    }

    fn page_size(&self, doc: DocumentHandle, page_number: u32) -> Result<PageSize, EngineError> {
        let record = self.doc(doc)?;
        Self::check_page_number(record, page_number)?;
        Ok(record.page_size)
    }

    fn page(&mut self, doc: DocumentHandle, page_number: u32) -> Result<PageHandle, EngineError> {
        let record = self.doc(doc)?;
        Self::check_page_number(record, page_number)?;

        let handle = self.next_page;
        self.next_page += 1;
        self.pages.insert(handle, ResolvedPage { doc: doc.raw(), page_number });
        Ok(PageHandle::from_raw(handle))
    }

    fn page_viewport(&self, page: PageHandle, scale: f32) -> Result<PageViewport, EngineError> {
        let resolved = self
            .pages
            .get(&page.raw())
            .ok_or(EngineError::InvalidHandle(page.raw()))?;
        let record = self.doc(DocumentHandle::from_raw(resolved.doc))?;
        Ok(PageViewport {
            width: record.page_size.width * scale,
            height: record.page_size.height * scale,
            scale,
        })
    }

    fn render(
        &mut self,
        page: PageHandle,
        ctx: &mut dyn SurfaceContext,
        viewport: &PageViewport,
    ) -> Result<(), EngineError> {
        if !self.pages.contains_key(&page.raw()) {
            return Err(EngineError::InvalidHandle(page.raw()));
        }

        let width = viewport.pixel_width();
        let height = viewport.pixel_height();

        let mut sheet = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        let border = Rgba([200, 200, 200, 255]);
        for x in 0..width {
            sheet.put_pixel(x, 0, border);
            sheet.put_pixel(x, height - 1, border);
        }
        for y in 0..height {
            sheet.put_pixel(0, y, border);
            sheet.put_pixel(width - 1, y, border);
        }

        ctx.clear_rect(ClipRect::new(0, 0, width, height));
        ctx.draw_image(&sheet);
        Ok(())
    }

    fn close(&mut self, doc: DocumentHandle) -> Result<(), EngineError> {
        self.docs
            .remove(&doc.raw())
            .ok_or(EngineError::InvalidHandle(doc.raw()))?;
        self.pages.retain(|_, page| page.doc != doc.raw());
        Ok(())
    }
}

/// In-memory render target backed by an RGBA pixel buffer
pub struct MemorySurface {
    image: RgbaImage,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { image: RgbaImage::new(width.max(1), height.max(1)) }
    }

    /// True while no pixel has been drawn
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p.0 == [0, 0, 0, 0])
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

impl SurfaceContext for MemorySurface {
    fn clear_rect(&mut self, rect: ClipRect) {
        let (width, height) = self.image.dimensions();
        let x_end = rect.x.saturating_add(rect.width).min(width);
        let y_end = rect.y.saturating_add(rect.height).min(height);
        for y in rect.y.min(height)..y_end {
            for x in rect.x.min(width)..x_end {
                self.image.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
    }

    fn draw_image(&mut self, image: &RgbaImage) {
        image::imageops::replace(&mut self.image, image, 0, 0);
    }
}

impl DrawingSurface for MemorySurface {
    fn pixel_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn set_pixel_size(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::new(width.max(1), height.max(1));
    }

    fn acquire_context(&mut self) -> Result<&mut dyn SurfaceContext, EngineError> {
        Ok(self)
    }
}
