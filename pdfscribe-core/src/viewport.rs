pub const MAX_RENDER_WIDTH: f32 = 800.0;
pub const DEFAULT_ZOOM: f32 = 0.9;
pub const ZOOM_STEP: f32 = 1.1;

const MIN_SCALE: f32 = 0.25;
const MAX_SCALE: f32 = 4.0;

/// Render width and the two independent scale knobs.
///
/// `zoom` drives the page raster, `text_scale` drives overlay geometry. They are
/// tuned separately so the overlay can be re-aligned without re-rasterizing.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    zoom: f32,
    text_scale: f32,
    container_width: Option<f32>,
    max_width: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(MAX_RENDER_WIDTH, DEFAULT_ZOOM)
    }
}

impl Viewport {
    pub fn new(max_width: f32, initial_zoom: f32) -> Self {
        let max_width = if max_width.is_finite() && max_width > 0.0 {
            max_width
        } else {
            MAX_RENDER_WIDTH
        };
        Self {
            zoom: clamp_scale(initial_zoom, DEFAULT_ZOOM),
            text_scale: 1.0,
            container_width: None,
            max_width,
        }
    }

    /// Records a new container width. Returns `true` when the effective render
    /// width changed.
    pub fn on_container_resize(&mut self, width: f32) -> bool {
        if !width.is_finite() || width <= 0.0 {
            return false;
        }
        let before = self.render_width();
        self.container_width = Some(width);
        (self.render_width() - before).abs() > f32::EPSILON
    }

    pub fn render_width(&self) -> f32 {
        match self.container_width {
            Some(width) => width.min(self.max_width),
            None => self.max_width,
        }
    }

    pub fn container_width(&self) -> Option<f32> {
        self.container_width
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn text_scale(&self) -> f32 {
        self.text_scale
    }

    pub fn zoom_in(&mut self) -> bool {
        Self::step(&mut self.zoom, ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> bool {
        Self::step(&mut self.zoom, 1.0 / ZOOM_STEP)
    }

    pub fn text_scale_up(&mut self) -> bool {
        Self::step(&mut self.text_scale, ZOOM_STEP)
    }

    pub fn text_scale_down(&mut self) -> bool {
        Self::step(&mut self.text_scale, 1.0 / ZOOM_STEP)
    }

    pub fn reset_scales(&mut self, initial_zoom: f32) {
        self.zoom = clamp_scale(initial_zoom, DEFAULT_ZOOM);
        self.text_scale = 1.0;
    }

    fn step(value: &mut f32, factor: f32) -> bool {
        let next = (*value * factor).clamp(MIN_SCALE, MAX_SCALE);
        if (next - *value).abs() > f32::EPSILON {
            *value = next;
            true
        } else {
            false
        }
    }
}

fn clamp_scale(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value.clamp(MIN_SCALE, MAX_SCALE)
    } else {
        fallback
    }
}
