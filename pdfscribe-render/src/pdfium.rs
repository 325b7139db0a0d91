use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfscribe_core::{Highlighter, PageRenderer, RenderImage, SurfaceRequest};
use tracing::{debug, instrument, warn};

use crate::{paint_matches, PixelRect};

const LIBRARY_ENV: &str = "PDFSCRIBE_PDFIUM_LIBRARY";

/// Page render surface backed by pdfium.
pub struct PdfiumSurface {
    cache: Mutex<Option<RenderCacheEntry>>,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    file_url: String,
    page_number: u32,
    pixel_width: u32,
    term: String,
    image: RenderImage,
}

impl RenderCacheEntry {
    fn matches(&self, request: &SurfaceRequest<'_>) -> bool {
        self.file_url == request.file_url
            && self.page_number == request.page_number
            && self.pixel_width == request.pixel_width()
            && self.term == request.highlighter.term()
    }
}

impl PdfiumSurface {
    /// Binds pdfium from `library` when given, then from the
    /// `PDFSCRIBE_PDFIUM_LIBRARY` environment variable, the working directory
    /// and finally the system library path.
    pub fn new(library: Option<&Path>) -> Result<Self> {
        let pdfium = bind_pdfium(library)?;
        Ok(Self {
            cache: Mutex::new(None),
            pdfium: Arc::new(pdfium),
        })
    }

    fn render_internal(&self, request: &SurfaceRequest<'_>, file: &[u8]) -> Result<RenderImage> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(file, None)
            .with_context(|| format!("failed to open {}", request.file_url))?;
        let page_index: PdfPageIndex = request
            .page_number
            .checked_sub(1)
            .and_then(|index| index.try_into().ok())
            .ok_or_else(|| anyhow!("page {} is out of supported range", request.page_number))?;
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_number))?;

        let target_width = i32::try_from(request.pixel_width()).unwrap_or(i32::MAX);
        let config = PdfRenderConfig::new().set_target_width(target_width);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_number))?;
        let rgba = bitmap.as_image().to_rgba8();
        let (width, height) = (rgba.width(), rgba.height());
        let mut image = RenderImage {
            width,
            height,
            pixels: rgba.into_raw(),
        };

        if request.highlighter.is_active() {
            match glyph_run_matches(&page, request.highlighter, width, height) {
                Ok(rects) => {
                    debug!(runs = rects.len(), "highlighting matched glyph runs");
                    paint_matches(&mut image, &rects);
                }
                Err(err) => warn!(?err, "failed to read page text for highlighting"),
            }
        }

        Ok(image)
    }
}

impl PageRenderer for PdfiumSurface {
    #[instrument(skip(self, request, file), fields(url = request.file_url, page = request.page_number))]
    fn render(&self, request: &SurfaceRequest<'_>, file: &[u8]) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.matches(request) {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.render_internal(request, file)?;

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            file_url: request.file_url.to_owned(),
            page_number: request.page_number,
            pixel_width: request.pixel_width(),
            term: request.highlighter.term().to_owned(),
            image: image.clone(),
        });

        Ok(image)
    }
}

/// Runs the highlighter over every text segment pdfium reports and returns
/// the pixel bounds of segments that contain a match.
fn glyph_run_matches(
    page: &PdfPage<'_>,
    highlighter: &Highlighter,
    width: u32,
    height: u32,
) -> Result<Vec<PixelRect>> {
    let page_width = page.width().value;
    let page_height = page.height().value;
    if page_width <= 0.0 || page_height <= 0.0 {
        return Ok(Vec::new());
    }
    let scale_x = width as f32 / page_width;
    let scale_y = height as f32 / page_height;

    let text = page.text().context("failed to extract page text")?;
    let mut rects = Vec::new();
    for segment in text.segments().iter() {
        if !highlighter.has_match(&segment.text()) {
            continue;
        }
        let bounds = segment.bounds();
        let rect = PixelRect::from_edges(
            bounds.left().value * scale_x,
            (page_height - bounds.top().value) * scale_y,
            bounds.right().value * scale_x,
            (page_height - bounds.bottom().value) * scale_y,
            width,
            height,
        );
        rects.extend(rect);
    }
    Ok(rects)
}

fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium> {
    let mut errors = Vec::new();

    let explicit = library
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(LIBRARY_ENV).map(Into::into));
    if let Some(path) = explicit {
        match Pdfium::bind_to_library(&path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => errors.push(format!("{}: {}", path.display(), err)),
        }
    }

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set pdfium_library in the config ({})",
                errors.join(", ")
            ))
        }
    }
}
