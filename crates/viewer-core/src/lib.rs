use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 3.0;
pub const SCALE_STEP: f32 = 0.25;
pub const AUTO_SCALE: f32 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomMode {
    Auto,
    FitPage,
    FitWidth,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomSelection {
    Auto,
    FitPage,
    FitWidth,
    Scale(f32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized zoom selection: {0}")]
pub struct ParseZoomError(String);

impl FromStr for ZoomSelection {
    type Err = ParseZoomError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Self::Auto),
            "fit" => Ok(Self::FitPage),
            "width" => Ok(Self::FitWidth),
            other => other
                .parse::<f32>()
                .ok()
                .filter(|scale| scale.is_finite() && *scale > 0.0)
                .map(Self::Scale)
                .ok_or_else(|| ParseZoomError(other.to_owned())),
        }
    }
}

impl fmt::Display for ZoomSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::FitPage => write!(f, "fit"),
            Self::FitWidth => write!(f, "width"),
            Self::Scale(scale) => write!(f, "{scale}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub left: f32,
    pub top: f32,
}

impl ScrollPosition {
    pub fn new(left: f32, top: f32) -> Self {
        Self { left, top }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewSession {
    pub page_number: u32,
    pub zoom_mode: ZoomMode,
    pub scale: f32,
    pub scroll: ScrollPosition,
}

impl Default for ViewSession {
    fn default() -> Self {
        Self {
            page_number: 1,
            zoom_mode: ZoomMode::Custom,
            scale: 1.0,
            scroll: ScrollPosition::default(),
        }
    }
}

impl ViewSession {
    pub fn zoom_in(&mut self) {
        if self.zoom_mode != ZoomMode::Custom {
            self.scale = (self.scale / SCALE_STEP).floor() * SCALE_STEP;
            self.zoom_mode = ZoomMode::Custom;
        }
        self.scale = (self.scale + SCALE_STEP).min(MAX_SCALE);
    }

    pub fn zoom_out(&mut self) {
        if self.zoom_mode != ZoomMode::Custom {
            self.scale = (self.scale / SCALE_STEP).ceil() * SCALE_STEP;
            self.zoom_mode = ZoomMode::Custom;
        }
        self.scale = (self.scale - SCALE_STEP).max(MIN_SCALE);
    }

    pub fn select_zoom(&mut self, selection: ZoomSelection) {
        match selection {
            ZoomSelection::Auto => self.zoom_mode = ZoomMode::Auto,
            ZoomSelection::FitPage => self.zoom_mode = ZoomMode::FitPage,
            ZoomSelection::FitWidth => self.zoom_mode = ZoomMode::FitWidth,
            ZoomSelection::Scale(scale) => {
                self.zoom_mode = ZoomMode::Custom;
                self.scale = scale;
            }
        }
    }
}

pub fn effective_scale(
    mode: ZoomMode,
    scale: f32,
    viewport_width: f32,
    viewport_height: f32,
    base_width: f32,
    base_height: f32,
) -> f32 {
    let computed = match mode {
        ZoomMode::Auto => AUTO_SCALE,
        ZoomMode::FitPage => viewport_height / base_height,
        ZoomMode::FitWidth => viewport_width / base_width,
        ZoomMode::Custom => scale,
    };

    if computed.is_finite() && computed > 0.0 {
        computed
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub page_height: f32,
    pub page_gap: f32,
    pub page_count: u32,
}

impl PageLayout {
    pub fn new(page_height: f32, page_gap: f32, page_count: u32) -> Self {
        Self { page_height, page_gap, page_count }
    }

    pub fn total_height(&self) -> f32 {
        if self.page_count == 0 {
            return 0.0;
        }

        self.page_count as f32 * self.page_height
            + (self.page_count - 1) as f32 * self.page_gap
    }

    pub fn page_start_offset(&self, page_number: u32) -> f32 {
        (self.page_height + self.page_gap) * page_number.saturating_sub(1) as f32
    }

    pub fn offset_for_index(&self, index: u32) -> f32 {
        if index >= self.page_count {
            return self.total_height();
        }

        index as f32 * (self.page_height + self.page_gap)
    }

    pub fn page_at_offset(&self, offset: f32) -> (u32, f32) {
        let mut accumulated = 0.0;

        for index in 0..self.page_count {
            if offset < accumulated + self.page_height {
                return (index, offset - accumulated);
            }

            accumulated += self.page_height;
            if index + 1 < self.page_count {
                accumulated += self.page_gap;
            }
        }

        (self.page_count, offset - accumulated)
    }
}

pub fn reposition_scroll(
    old_scroll: ScrollPosition,
    old_scale: f32,
    new_scale: f32,
    old_layout: &PageLayout,
    new_layout: &PageLayout,
) -> ScrollPosition {
    let ratio = new_scale / old_scale;
    let left = old_scroll.left * ratio;

    if old_layout.page_count == 0 {
        return ScrollPosition::new(left, old_scroll.top);
    }

    let (index, within) = old_layout.page_at_offset(old_scroll.top);
    let top = new_layout.offset_for_index(index) + within * ratio;

    ScrollPosition::new(left, top)
}

pub fn current_page_at(
    layout: &PageLayout,
    scroll_top: f32,
    viewport_height: f32,
    fallback: u32,
) -> u32 {
    for page_number in 1..=layout.page_count {
        let top = layout.page_start_offset(page_number);

        if top + layout.page_height / 2.0 > scroll_top && top < scroll_top + viewport_height {
            return page_number;
        }
    }

    fallback
}

pub fn preserved_scroll_top(previous_top: f32, previous_total: f32, new_total: f32) -> f32 {
    let ratio = if previous_total > 0.0 { previous_top / previous_total } else { 0.0 };

    (new_total * ratio).floor()
}
