use pdfscribe_core::{OverlayFragment, RenderImage, ScreenRect};

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumSurface;

pub const MATCH_COLOR: [u8; 3] = [255, 200, 0];
pub const CURRENT_MATCH_COLOR: [u8; 3] = [255, 120, 0];
const MATCH_ALPHA: f32 = 0.3;
const CURRENT_MATCH_ALPHA: f32 = 0.45;

/// Half-open pixel rectangle clipped to an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    /// Rounds outward and clips to `width` x `height`. Returns `None` when
    /// nothing is left after clipping.
    pub fn from_edges(left: f32, top: f32, right: f32, bottom: f32, width: u32, height: u32) -> Option<Self> {
        if !(left.is_finite() && top.is_finite() && right.is_finite() && bottom.is_finite()) {
            return None;
        }
        let clip = |value: f32, max: u32| value.clamp(0.0, max as f32) as u32;
        let x0 = clip(left.floor(), width);
        let x1 = clip(right.ceil(), width);
        let y0 = clip(top.floor(), height);
        let y1 = clip(bottom.ceil(), height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self { x0, y0, x1, y1 })
    }

    pub fn from_screen(rect: &ScreenRect, width: u32, height: u32) -> Option<Self> {
        Self::from_edges(rect.left, rect.top, rect.right(), rect.bottom(), width, height)
    }
}

pub fn fill_rect(image: &mut RenderImage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    let width = image.width as usize;
    let x1 = rect.x1.min(image.width);
    let y1 = rect.y1.min(image.height);
    for y in rect.y0.min(y1)..y1 {
        let row_start = (y as usize) * width * 4;
        for x in rect.x0.min(x1)..x1 {
            let idx = row_start + (x as usize) * 4;
            if let Some(pixel) = image.pixels.get_mut(idx..idx + 4) {
                blend_pixel(pixel, color, alpha);
            }
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, tint) in pixel.iter_mut().zip(color) {
        *channel = (*channel as f32 * inv + tint as f32 * alpha)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

/// Tints every pixel rect that holds a glyph-run match.
pub fn paint_matches(image: &mut RenderImage, rects: &[PixelRect]) {
    for rect in rects {
        fill_rect(image, *rect, MATCH_COLOR, MATCH_ALPHA);
    }
}

/// Paints overlay fragments that contain a match. The fragment holding the
/// `current`-th match on the page gets the stronger tint. Returns the number
/// of fragments painted.
pub fn paint_overlay(
    image: &mut RenderImage,
    overlay: &[OverlayFragment<'_>],
    current: Option<usize>,
) -> usize {
    let mut seen = 0;
    let mut painted = 0;
    for fragment in overlay {
        let matches = fragment.segments.iter().filter(|s| s.is_match).count();
        if matches == 0 {
            continue;
        }
        let is_current = current.is_some_and(|index| index >= seen && index < seen + matches);
        seen += matches;

        let Some(rect) = PixelRect::from_screen(&fragment.rect, image.width, image.height) else {
            continue;
        };
        if is_current {
            fill_rect(image, rect, CURRENT_MATCH_COLOR, CURRENT_MATCH_ALPHA);
        } else {
            fill_rect(image, rect, MATCH_COLOR, MATCH_ALPHA);
        }
        painted += 1;
    }
    painted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdfscribe_core::{map_page, BBox, Highlighter, OverlayCalibration, TextFragment};

    fn white(width: u32, height: u32) -> RenderImage {
        RenderImage {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        }
    }

    fn pixel(image: &RenderImage, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * image.width + x) * 4) as usize;
        [
            image.pixels[idx],
            image.pixels[idx + 1],
            image.pixels[idx + 2],
            image.pixels[idx + 3],
        ]
    }

    #[test]
    fn pixel_rect_rounds_outward_and_clips() {
        assert_eq!(
            PixelRect::from_edges(1.4, 2.6, 3.2, 4.1, 10, 10),
            Some(PixelRect {
                x0: 1,
                y0: 2,
                x1: 4,
                y1: 5
            })
        );
        assert_eq!(
            PixelRect::from_edges(-5.0, -5.0, 50.0, 50.0, 8, 6),
            Some(PixelRect {
                x0: 0,
                y0: 0,
                x1: 8,
                y1: 6
            })
        );
        assert_eq!(PixelRect::from_edges(20.0, 0.0, 30.0, 5.0, 10, 10), None);
        assert_eq!(PixelRect::from_edges(f32::NAN, 0.0, 3.0, 5.0, 10, 10), None);
    }

    #[test]
    fn fill_rect_blends_only_inside() {
        let mut image = white(4, 4);
        fill_rect(
            &mut image,
            PixelRect {
                x0: 1,
                y0: 1,
                x1: 3,
                y1: 3,
            },
            [0, 0, 0],
            0.5,
        );
        assert_eq!(pixel(&image, 0, 0), [255, 255, 255, 255]);
        assert_eq!(pixel(&image, 1, 1), [128, 128, 128, 255]);
        assert_eq!(pixel(&image, 3, 3), [255, 255, 255, 255]);
    }

    #[test]
    fn overlay_paints_matching_fragments_only() {
        let fragments = vec![
            TextFragment {
                text: "Invoice total".into(),
                bbox: BBox::new(0.0, 0.0, 10.0, 5.0),
            },
            TextFragment {
                text: "shipping".into(),
                bbox: BBox::new(0.0, 10.0, 10.0, 15.0),
            },
            TextFragment {
                text: "TOTAL due".into(),
                bbox: BBox::new(0.0, 20.0, 10.0, 25.0),
            },
        ];
        let calibration = OverlayCalibration {
            factor: 1.0,
            base_font_size: 12.0,
        };
        let overlay = map_page(&fragments, 1.0, &calibration, &Highlighter::new("total"));

        let mut image = white(20, 30);
        assert_eq!(paint_overlay(&mut image, &overlay, Some(1)), 2);
        assert_eq!(pixel(&image, 2, 12), [255, 255, 255, 255]);
        assert_ne!(pixel(&image, 2, 2), [255, 255, 255, 255]);
        assert_ne!(pixel(&image, 2, 22), pixel(&image, 2, 2));
    }
}
