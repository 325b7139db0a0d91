use serde::{Deserialize, Serialize};

use crate::highlight::{Highlighter, Segment};

/// Multiplier applied to every overlay rect to absorb the padding the page
/// renderer adds around its raster.
pub const DEFAULT_CALIBRATION: f32 = 1.1;

/// Overlay font size at `scale == 1.0`.
pub const BASE_FONT_SIZE: f32 = 12.0;

/// Axis-aligned box in the extraction service's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    /// Builds a box with ordered corners regardless of argument order.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScreenRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayCalibration {
    pub factor: f32,
    pub base_font_size: f32,
}

impl Default for OverlayCalibration {
    fn default() -> Self {
        Self {
            factor: DEFAULT_CALIBRATION,
            base_font_size: BASE_FONT_SIZE,
        }
    }
}

impl OverlayCalibration {
    pub fn map(&self, bbox: &BBox, scale: f32) -> ScreenRect {
        let k = scale * self.factor;
        ScreenRect {
            left: bbox.x0 * k,
            top: bbox.y0 * k,
            width: bbox.width() * k,
            height: bbox.height() * k,
        }
    }

    pub fn font_size(&self, scale: f32) -> f32 {
        self.base_font_size * scale
    }
}

/// Maps a source-space box onto the overlay with the default calibration.
pub fn map_fragment(bbox: &BBox, scale: f32) -> ScreenRect {
    OverlayCalibration::default().map(bbox, scale)
}

/// A positioned, highlighted label ready for the overlay layer.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayFragment<'a> {
    pub rect: ScreenRect,
    pub font_size: f32,
    pub segments: Vec<Segment<'a>>,
}

impl OverlayFragment<'_> {
    pub fn has_match(&self) -> bool {
        self.segments.iter().any(|segment| segment.is_match)
    }
}

/// Maps every fragment of a page in order. Zero-size boxes are kept so the
/// overlay stays index-aligned with the extracted text.
pub fn map_page<'a>(
    fragments: &'a [crate::TextFragment],
    scale: f32,
    calibration: &OverlayCalibration,
    highlighter: &Highlighter,
) -> Vec<OverlayFragment<'a>> {
    let font_size = calibration.font_size(scale);
    fragments
        .iter()
        .map(|fragment| OverlayFragment {
            rect: calibration.map(&fragment.bbox, scale),
            font_size,
            segments: highlighter.segments(&fragment.text),
        })
        .collect()
}
