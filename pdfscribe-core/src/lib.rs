use std::borrow::Cow;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub mod config;
pub mod controller;
pub mod geometry;
pub mod highlight;
pub mod search;
pub mod selection;
pub mod service;
pub mod viewport;

pub use config::Config;
pub use controller::{
    CompletionOutcome, Controller, DocumentRef, DocumentStatus, PageRejection, PageStatus,
};
pub use geometry::{map_fragment, map_page, BBox, OverlayCalibration, OverlayFragment, ScreenRect};
pub use highlight::{highlight, Highlighter, Segment};
pub use search::SearchState;
pub use selection::{PanelId, SelectionBridge, SelectionSubscription};
pub use service::{
    DriverEvent, ExtractedDocument, ExtractionRequest, ExtractionService, FetchCompletion,
    FetchDriver, FetchError, FetchScope, FetchTicket, HttpExtractionService, RequestSeq,
};
pub use viewport::Viewport;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c1e8a-52d4-5b7e-9a61-d2c4e7b09f13").expect("valid namespace UUID")
});

/// Stable identifier for a document URL.
pub fn document_id_for_url(url: &str) -> DocumentId {
    Uuid::new_v5(&DOCUMENT_NAMESPACE, url.trim().as_bytes())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub bbox: BBox,
}

/// Extracted text for one page, in whichever shape the service produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Plain(String),
    Geometric(Vec<TextFragment>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub page: u32,
    pub content: PageContent,
    pub file_url: String,
    /// The file at `file_url` holds only this page.
    pub page_scoped: bool,
}

impl PageRecord {
    /// Text shown in the extracted-text panel. Fragment pages show one
    /// fragment per line, in source order.
    pub fn panel_text(&self) -> Cow<'_, str> {
        match &self.content {
            PageContent::Plain(text) => Cow::Borrowed(text),
            PageContent::Geometric(fragments) => Cow::Owned(
                fragments
                    .iter()
                    .map(|fragment| fragment.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }

    pub fn fragments(&self) -> &[TextFragment] {
        match &self.content {
            PageContent::Plain(_) => &[],
            PageContent::Geometric(fragments) => fragments,
        }
    }

    /// Page number to rasterize inside the file at `file_url`.
    pub fn render_page_number(&self) -> u32 {
        if self.page_scoped {
            1
        } else {
            self.page
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Everything the page rasterizer needs for one draw.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceRequest<'a> {
    pub file_url: &'a str,
    pub page_number: u32,
    pub render_width: f32,
    pub zoom: f32,
    /// Applied to each text run the rasterizer finds on the page.
    pub highlighter: &'a Highlighter,
}

impl SurfaceRequest<'_> {
    pub fn pixel_width(&self) -> u32 {
        (self.render_width * self.zoom).round().max(1.0) as u32
    }
}

pub trait PageRenderer: Send + Sync {
    fn render(&self, request: &SurfaceRequest<'_>, file: &[u8]) -> Result<RenderImage>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OpenDocument { url: String },
    GotoPage { page: i64 },
    GotoPageInput { input: String },
    NextPage { count: u32 },
    PrevPage { count: u32 },
    FirstPage,
    LastPage,
    ZoomIn,
    ZoomOut,
    TextScaleUp,
    TextScaleDown,
    ResetScale,
    Resize { width: f32 },
    Search { query: String },
    SearchNext,
    SearchPrev,
    Retry,
}

/// What the event loop must do after a command.
#[derive(Debug, Default, PartialEq)]
pub struct Effect {
    pub redraw: bool,
    pub fetch: Option<FetchTicket>,
}

impl Effect {
    fn redraw() -> Self {
        Self {
            redraw: true,
            fetch: None,
        }
    }

    fn when(redraw: bool) -> Self {
        Self {
            redraw,
            fetch: None,
        }
    }
}

/// One viewing session: page state, view state, search state and the
/// selection bridge, driven by [`Command`]s and fetch completions.
pub struct Viewer {
    controller: Controller,
    viewport: Viewport,
    search: SearchState,
    selection: SelectionBridge,
    calibration: OverlayCalibration,
    initial_zoom: f32,
}

impl Viewer {
    pub fn new(config: &Config) -> Self {
        Self {
            controller: Controller::new(),
            viewport: Viewport::new(config.max_width, config.initial_zoom),
            search: SearchState::new(),
            selection: SelectionBridge::new(),
            calibration: config.overlay_calibration(),
            initial_zoom: config.initial_zoom,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn apply(&mut self, command: Command) -> Effect {
        match command {
            Command::OpenDocument { url } => {
                self.search.reset_match();
                Effect {
                    redraw: true,
                    fetch: self.controller.set_document(&url),
                }
            }
            Command::GotoPage { page } => {
                let result = self.controller.set_current_page(page);
                self.page_changed(result)
            }
            Command::GotoPageInput { input } => {
                let result = self.controller.set_current_page_input(&input);
                self.page_changed(result)
            }
            Command::NextPage { count } => {
                let result = self.controller.next_page(count);
                self.page_changed(result)
            }
            Command::PrevPage { count } => {
                let result = self.controller.prev_page(count);
                self.page_changed(result)
            }
            Command::FirstPage => {
                let result = self.controller.set_current_page(1);
                self.page_changed(result)
            }
            Command::LastPage => {
                let last = self.controller.total_pages().map(i64::from).unwrap_or(0);
                let result = self.controller.set_current_page(last);
                self.page_changed(result)
            }
            Command::ZoomIn => Effect::when(self.viewport.zoom_in()),
            Command::ZoomOut => Effect::when(self.viewport.zoom_out()),
            Command::TextScaleUp => Effect::when(self.viewport.text_scale_up()),
            Command::TextScaleDown => Effect::when(self.viewport.text_scale_down()),
            Command::ResetScale => {
                self.viewport.reset_scales(self.initial_zoom);
                Effect::redraw()
            }
            Command::Resize { width } => Effect::when(self.viewport.on_container_resize(width)),
            Command::Search { query } => Effect::when(self.search.set_term(&query)),
            Command::SearchNext => {
                let total = self.match_total();
                self.search.next_match(total);
                Effect::redraw()
            }
            Command::SearchPrev => {
                let total = self.match_total();
                self.search.prev_match(total);
                Effect::redraw()
            }
            Command::Retry => {
                let fetch = self.controller.retry();
                Effect {
                    redraw: fetch.is_some(),
                    fetch,
                }
            }
        }
    }

    fn page_changed(&mut self, result: Result<Option<FetchTicket>, PageRejection>) -> Effect {
        match result {
            Ok(fetch) => {
                self.search.reset_match();
                Effect {
                    redraw: true,
                    fetch,
                }
            }
            Err(rejection) => {
                debug!(%rejection, "page request rejected");
                Effect::default()
            }
        }
    }

    /// Applies a fetch completion. Returns `true` when the screen changed.
    pub fn complete(&mut self, completion: FetchCompletion) -> bool {
        self.controller.complete(completion) == CompletionOutcome::Applied
    }

    /// Identity of the panel showing the current page record, if any.
    pub fn current_panel(&self) -> Option<PanelId> {
        let document = self.controller.document()?;
        let record = self.controller.current_record()?;
        Some(PanelId {
            document: document.id,
            page: record.page,
        })
    }

    pub fn subscribe_panel(&self) -> Option<SelectionSubscription> {
        self.current_panel()
            .map(|panel| self.selection.subscribe(panel))
    }

    pub fn on_selection_end(&mut self, panel: PanelId, selected: &str) -> bool {
        self.selection
            .on_selection_end(panel, selected, &mut self.search)
    }

    /// Record feeding the panel, the overlay and the render surface. During
    /// a page fetch this is still the previously shown page.
    pub fn current_record(&self) -> Option<&PageRecord> {
        self.controller.displayed_record()
    }

    pub fn match_total(&self) -> usize {
        self.current_record()
            .map(|record| self.search.highlighter().match_count(&record.panel_text()))
            .unwrap_or(0)
    }

    /// Overlay labels for the current page, positioned with the text scale.
    pub fn overlay(&self) -> Vec<OverlayFragment<'_>> {
        match self.current_record() {
            Some(record) => map_page(
                record.fragments(),
                self.viewport.text_scale(),
                &self.calibration,
                self.search.highlighter(),
            ),
            None => Vec::new(),
        }
    }

    pub fn surface_request(&self) -> Option<SurfaceRequest<'_>> {
        let record = self.current_record()?;
        Some(SurfaceRequest {
            file_url: &record.file_url,
            page_number: record.render_page_number(),
            render_width: self.viewport.render_width(),
            zoom: self.viewport.zoom(),
            highlighter: self.search.highlighter(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    fn loaded_viewer(text: &str) -> Viewer {
        let mut viewer = Viewer::new(&Config::default());
        let effect = viewer.apply(Command::OpenDocument {
            url: "http://example.com/report.pdf".into(),
        });
        let ticket = effect.fetch.unwrap();
        assert!(viewer.complete(FetchCompletion {
            ticket,
            result: Ok(ExtractedDocument {
                total_pages: 3,
                file_url: "http://files/1.pdf".into(),
                pages: BTreeMap::from([(1, PageContent::Plain(text.into()))]),
            }),
        }));
        viewer
    }

    #[test]
    fn document_id_is_stable_for_same_url() {
        assert_eq!(
            document_id_for_url("http://example.com/a.pdf"),
            document_id_for_url(" http://example.com/a.pdf ")
        );
        assert_ne!(
            document_id_for_url("http://example.com/a.pdf"),
            document_id_for_url("http://example.com/b.pdf")
        );
    }

    #[test]
    fn geometric_record_feeds_panel_and_overlay_from_same_fragments() {
        let record = PageRecord {
            page: 2,
            content: PageContent::Geometric(vec![
                TextFragment {
                    text: "Alpha".into(),
                    bbox: BBox::new(0.0, 0.0, 10.0, 5.0),
                },
                TextFragment {
                    text: "beta".into(),
                    bbox: BBox::new(0.0, 6.0, 8.0, 11.0),
                },
            ]),
            file_url: "u".into(),
            page_scoped: true,
        };
        assert_eq!(record.panel_text(), "Alpha\nbeta");
        assert_eq!(record.fragments().len(), 2);
        assert_eq!(record.render_page_number(), 1);
    }

    #[test]
    fn rejected_pages_produce_no_effect() {
        let mut viewer = loaded_viewer("text");
        assert_eq!(viewer.apply(Command::GotoPage { page: 0 }), Effect::default());
        assert_eq!(viewer.apply(Command::GotoPage { page: 4 }), Effect::default());
        assert_eq!(
            viewer.apply(Command::GotoPageInput { input: "abc".into() }),
            Effect::default()
        );
        assert_eq!(viewer.controller().current_page(), 1);
    }

    #[test]
    fn selection_drives_search_for_subscribed_panel() {
        let mut viewer = loaded_viewer("Total revenue grew. Revenue is up.");
        let guard = viewer.subscribe_panel().unwrap();
        let panel = guard.panel();

        assert!(viewer.on_selection_end(panel, " revenue "));
        assert_eq!(viewer.search().term(), "revenue");
        assert_eq!(viewer.match_total(), 2);

        viewer.apply(Command::SearchNext);
        assert_eq!(viewer.search().match_index(), Some(0));

        drop(guard);
        assert!(!viewer.on_selection_end(panel, "grew"));
        assert_eq!(viewer.search().term(), "revenue");
    }

    #[test]
    fn selection_across_fragments_counts_like_the_overlay() {
        let mut viewer = Viewer::new(&Config::default());
        let ticket = viewer
            .apply(Command::OpenDocument {
                url: "http://example.com/report.pdf".into(),
            })
            .fetch
            .unwrap();
        viewer.complete(FetchCompletion {
            ticket,
            result: Ok(ExtractedDocument {
                total_pages: 1,
                file_url: "http://files/1.pdf".into(),
                pages: BTreeMap::from([(
                    1,
                    PageContent::Geometric(vec![
                        TextFragment {
                            text: "Total revenue".into(),
                            bbox: BBox::new(0.0, 0.0, 60.0, 10.0),
                        },
                        TextFragment {
                            text: "grew fast".into(),
                            bbox: BBox::new(0.0, 12.0, 40.0, 22.0),
                        },
                    ]),
                )]),
            }),
        });
        let guard = viewer.subscribe_panel().unwrap();
        let overlay_matches = |viewer: &Viewer| {
            viewer
                .overlay()
                .iter()
                .flat_map(|fragment| fragment.segments.iter())
                .filter(|segment| segment.is_match)
                .count()
        };

        assert!(viewer.on_selection_end(guard.panel(), "revenue\ngrew"));
        assert_eq!(viewer.search().term(), "revenue grew");
        assert_eq!(viewer.match_total(), overlay_matches(&viewer));

        assert!(viewer.on_selection_end(guard.panel(), "revenue\n"));
        assert_eq!(viewer.match_total(), 1);
        assert_eq!(overlay_matches(&viewer), 1);
    }

    #[test]
    fn page_change_resets_match_selection_and_requests_page() {
        let mut viewer = loaded_viewer("a a a");
        viewer.apply(Command::Search { query: "a".into() });
        viewer.apply(Command::SearchNext);
        assert_eq!(viewer.search().match_index(), Some(0));

        let effect = viewer.apply(Command::NextPage { count: 1 });
        assert!(effect.redraw);
        assert_eq!(effect.fetch.unwrap().request.page, Some(2));
        assert_eq!(viewer.search().match_index(), None);
        assert_eq!(viewer.current_record().unwrap().page, 1);
    }

    #[test]
    fn page_turn_keeps_loaded_content_on_every_surface() {
        let mut viewer = loaded_viewer("first page text");
        viewer.apply(Command::Search { query: "page".into() });
        let ticket = viewer.apply(Command::GotoPage { page: 2 }).fetch.unwrap();

        assert_eq!(viewer.current_record().unwrap().panel_text(), "first page text");
        assert_eq!(
            viewer.surface_request().unwrap().file_url,
            "http://files/1.pdf"
        );
        assert_eq!(viewer.match_total(), 1);

        viewer.complete(FetchCompletion {
            ticket,
            result: Err(FetchError::Network("connection reset".into())),
        });
        assert_eq!(viewer.controller().current_page(), 2);
        assert!(matches!(
            viewer.controller().page_status(),
            PageStatus::Error { page: 2, .. }
        ));
        assert_eq!(viewer.current_record().unwrap().page, 1);
        assert_eq!(viewer.surface_request().unwrap().page_number, 1);
        assert_eq!(viewer.current_panel().unwrap().page, 1);
    }

    #[test]
    fn surface_request_uses_viewport_and_record() {
        let mut viewer = loaded_viewer("text");
        viewer.apply(Command::Resize { width: 500.0 });
        viewer.apply(Command::Search { query: "tex".into() });
        let request = viewer.surface_request().unwrap();
        assert_eq!(request.file_url, "http://files/1.pdf");
        assert_eq!(request.page_number, 1);
        assert_eq!(request.render_width, 500.0);
        assert_eq!(request.pixel_width(), 450);
        assert!(request.highlighter.has_match("TEXT"));
    }

    struct StaticService;

    #[async_trait]
    impl ExtractionService for StaticService {
        async fn extract(
            &self,
            request: &ExtractionRequest,
        ) -> Result<ExtractedDocument, FetchError> {
            let page = request.page.unwrap_or(1);
            if page == 2 {
                return Err(FetchError::BadResponse { status: 502 });
            }
            Ok(ExtractedDocument {
                total_pages: 3,
                file_url: format!("http://files/{page}.pdf"),
                pages: BTreeMap::from([(page, PageContent::Plain(format!("page {page}")))]),
            })
        }

        async fn fetch_file(&self, _url: &str) -> Result<Bytes, FetchError> {
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn driver_round_trip_through_viewer() {
        let (driver, mut events) = FetchDriver::new(Arc::new(StaticService));
        let mut viewer = Viewer::new(&Config::default());

        let effect = viewer.apply(Command::OpenDocument {
            url: "http://example.com/a.pdf".into(),
        });
        driver.dispatch(effect.fetch.unwrap());
        let Some(DriverEvent::Extraction(completion)) = events.recv().await else {
            panic!("expected extraction");
        };
        assert!(viewer.complete(completion));

        let effect = viewer.apply(Command::GotoPage { page: 2 });
        driver.dispatch(effect.fetch.unwrap());
        let Some(DriverEvent::Extraction(completion)) = events.recv().await else {
            panic!("expected extraction");
        };
        viewer.complete(completion);

        assert!(matches!(
            viewer.controller().page_status(),
            PageStatus::Error { page: 2, .. }
        ));
        assert_eq!(
            viewer.controller().status(),
            &DocumentStatus::Loaded { total_pages: 3 }
        );
        assert_eq!(
            viewer.controller().record(1).unwrap().panel_text(),
            "page 1"
        );
    }
}
