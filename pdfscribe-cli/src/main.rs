use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pdfscribe_core::config::project_dirs;
use pdfscribe_core::{
    Command, Config, DocumentStatus, DriverEvent, FetchDriver, HttpExtractionService, PageRenderer,
    PageStatus, SelectionSubscription, Viewer,
};
use pdfscribe_render::{paint_overlay, PdfiumSurface};
use pdfscribe_tty::{
    write_status_line, DrawParams, EventMapper, KittyRenderer, PanelRegion, TextPanel, UiEvent,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdfscribe",
    version,
    about = "Terminal PDF viewer with extracted-text overlay and search"
)]
struct Args {
    /// URL of the PDF to open
    url: String,

    /// Base URL of the text extraction service
    #[arg(long = "service")]
    service: Option<String>,

    /// Page to show once the document has loaded (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<u32>,

    /// Config file to read instead of the default location
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

/// Terminal geometry split into the page column and the text panel.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    columns: u16,
    rows: u16,
    cell_width: f32,
    cell_height: f32,
    page_columns: u16,
}

impl Layout {
    const FALLBACK_CELL_WIDTH: f32 = 8.0;
    const FALLBACK_CELL_HEIGHT: f32 = 16.0;

    fn from_dimensions(columns: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        let columns = columns.max(2);
        let rows = rows.max(2);
        let cell_width = if pixel_width > 0 {
            f32::from(pixel_width) / f32::from(columns)
        } else {
            Self::FALLBACK_CELL_WIDTH
        };
        let cell_height = if pixel_height > 0 {
            f32::from(pixel_height) / f32::from(rows)
        } else {
            Self::FALLBACK_CELL_HEIGHT
        };
        Self {
            columns,
            rows,
            cell_width,
            cell_height,
            page_columns: (columns / 2).max(1),
        }
    }

    fn current() -> Result<Self> {
        let window = terminal::window_size()?;
        Ok(Self::from_dimensions(
            window.columns,
            window.rows,
            window.width,
            window.height,
        ))
    }

    /// Rows above the status line.
    fn body_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    fn status_row(&self) -> u16 {
        self.rows.saturating_sub(1)
    }

    /// Pixel width of the page column, reported to the viewport.
    fn container_width(&self) -> f32 {
        self.cell_width * f32::from(self.page_columns)
    }

    fn panel_region(&self) -> PanelRegion {
        PanelRegion {
            column: self.page_columns + 1,
            row: 0,
            columns: self.columns.saturating_sub(self.page_columns + 1),
            rows: self.body_rows(),
        }
    }

    /// Cell box for an image, shrunk to fit the page column while keeping
    /// its aspect ratio.
    fn fit_image(&self, width: u32, height: u32) -> (u32, u32) {
        if width == 0 || height == 0 {
            return (1, 1);
        }
        let max_width = self.container_width();
        let max_height = self.cell_height * f32::from(self.body_rows());
        let scale = (max_width / width as f32)
            .min(max_height / height as f32)
            .min(1.0);
        let columns = (width as f32 * scale / self.cell_width).round().max(1.0) as u32;
        let rows = (height as f32 * scale / self.cell_height).round().max(1.0) as u32;
        (
            columns.min(u32::from(self.page_columns)),
            rows.min(u32::from(self.body_rows())),
        )
    }
}

struct App {
    viewer: Viewer,
    driver: FetchDriver,
    surface: Box<dyn PageRenderer>,
    files: HashMap<String, Bytes>,
    requested_files: HashSet<String>,
    file_errors: HashMap<String, String>,
    panel: TextPanel,
    subscription: Option<SelectionSubscription>,
    initial_page: Option<u32>,
    render_error: Option<String>,
}

impl App {
    fn run_command(&mut self, command: Command) -> bool {
        let revealing = matches!(command, Command::SearchNext | Command::SearchPrev);
        // A failed file download is retried on the next redraw.
        let retrying = matches!(command, Command::Retry);
        if retrying {
            self.requested_files.clear();
            self.file_errors.clear();
        }
        let effect = self.viewer.apply(command);
        if let Some(ticket) = effect.fetch {
            self.driver.dispatch(ticket);
        }
        if revealing {
            self.reveal_current_match();
        }
        self.sync_subscription();
        effect.redraw || retrying
    }

    fn reveal_current_match(&mut self) {
        let Some(index) = self.viewer.search().match_index() else {
            return;
        };
        let ranges = self.panel.match_ranges(self.viewer.search().highlighter());
        if let Some(range) = ranges.get(index) {
            self.panel.reveal(range.start);
        }
    }

    /// Keeps exactly one selection subscription, bound to the panel that is
    /// showing the current page.
    fn sync_subscription(&mut self) {
        let current = self.viewer.current_panel();
        if self.subscription.as_ref().map(SelectionSubscription::panel) != current {
            self.subscription = self.viewer.subscribe_panel();
        }
    }

    fn handle_driver_event(&mut self, event: DriverEvent) -> bool {
        match event {
            DriverEvent::Extraction(completion) => {
                let changed = self.viewer.complete(completion);
                if changed {
                    self.apply_initial_page();
                    self.sync_subscription();
                }
                changed
            }
            DriverEvent::File { url, result } => match result {
                Ok(bytes) => {
                    debug!(%url, size = bytes.len(), "page file downloaded");
                    self.files.insert(url, bytes);
                    true
                }
                Err(err) => {
                    warn!(%url, %err, "page file download failed");
                    self.file_errors.insert(url, err.to_string());
                    true
                }
            },
        }
    }

    fn apply_initial_page(&mut self) {
        if !matches!(
            self.viewer.controller().status(),
            DocumentStatus::Loaded { .. }
        ) {
            return;
        }
        if let Some(page) = self.initial_page.take() {
            if page != self.viewer.controller().current_page() {
                self.run_command(Command::GotoPage {
                    page: i64::from(page),
                });
            }
        }
    }

    fn handle_event(&mut self, event: UiEvent) -> LoopAction {
        match event {
            UiEvent::Command(command) => {
                if self.run_command(command) {
                    LoopAction::ContinueRedraw
                } else {
                    LoopAction::Continue
                }
            }
            UiEvent::PromptChanged => LoopAction::Continue,
            UiEvent::SelectionStart { column, row } => {
                redraw_if(self.panel.begin_selection(column, row))
            }
            UiEvent::SelectionDrag { column, row } => {
                redraw_if(self.panel.extend_selection(column, row))
            }
            UiEvent::SelectionEnd { column, row } => {
                let Some(selected) = self.panel.end_selection(column, row) else {
                    return LoopAction::ContinueRedraw;
                };
                if let Some(panel) = self.subscription.as_ref().map(SelectionSubscription::panel) {
                    self.viewer.on_selection_end(panel, &selected);
                }
                LoopAction::ContinueRedraw
            }
            UiEvent::ScrollText { lines } => {
                self.panel.scroll_by(lines);
                LoopAction::ContinueRedraw
            }
            UiEvent::ClearSelection => {
                self.panel.clear_selection();
                LoopAction::ContinueRedraw
            }
            UiEvent::Resized { .. } => LoopAction::ContinueRedraw,
            UiEvent::Quit => LoopAction::Quit,
            UiEvent::None => LoopAction::Continue,
        }
    }

    fn resize(&mut self, layout: &Layout) {
        self.panel.set_region(layout.panel_region());
        self.run_command(Command::Resize {
            width: layout.container_width(),
        });
    }

    fn status(&self) -> String {
        let controller = self.viewer.controller();
        let mut status = match controller.status() {
            DocumentStatus::Idle => "no document".to_owned(),
            DocumentStatus::Loading => "loading document...".to_owned(),
            DocumentStatus::Error { message } => format!("{message} (r to retry)"),
            DocumentStatus::Loaded { total_pages } => {
                let viewport = self.viewer.viewport();
                format!(
                    "page {}/{} | zoom {:.0}% | text {:.0}%",
                    controller.current_page(),
                    total_pages,
                    viewport.zoom() * 100.0,
                    viewport.text_scale() * 100.0
                )
            }
        };

        match controller.page_status() {
            PageStatus::Loading { page } => status.push_str(&format!(" | loading page {page}...")),
            PageStatus::Error { page, error } => {
                status.push_str(&format!(" | page {page}: {error} (r to retry)"))
            }
            PageStatus::Idle | PageStatus::Loaded => {}
        }

        if let Some(record) = self.viewer.current_record() {
            if let Some(err) = self.file_errors.get(&record.file_url) {
                status.push_str(&format!(" | file: {err}"));
            } else if let Some(err) = &self.render_error {
                status.push_str(&format!(" | render: {err}"));
            }
        }

        let search = self.viewer.search();
        if !search.term().is_empty() {
            let total = self.viewer.match_total();
            let current = search
                .match_index()
                .map(|index| (index + 1).to_string())
                .unwrap_or_else(|| "-".to_owned());
            status.push_str(&format!(" | \"{}\" {current}/{total}", search.term()));
        }
        status
    }

    fn redraw(
        &mut self,
        renderer: &mut KittyRenderer<Stdout>,
        layout: &Layout,
        pending_input: Option<&str>,
    ) -> Result<()> {
        renderer.begin_sync_update()?;
        self.draw_page(renderer, layout)?;

        let text = self
            .viewer
            .current_record()
            .map(|record| record.panel_text().into_owned())
            .unwrap_or_default();
        self.panel.set_text(&text);
        {
            let writer = renderer.writer();
            for row in 0..layout.body_rows() {
                crossterm::queue!(writer, cursor::MoveTo(layout.page_columns, row), Print('│'))?;
            }
            self.panel.draw(
                writer,
                self.viewer.search().highlighter(),
                self.viewer.search().match_index(),
            )?;
        }

        if let Some(status) = combine_status(Some(self.status()), pending_input) {
            draw_status_line(renderer, layout, &status)?;
        }
        renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_page(&mut self, renderer: &mut KittyRenderer<Stdout>, layout: &Layout) -> Result<()> {
        let Some(request) = self.viewer.surface_request() else {
            renderer.clear_image()?;
            return Ok(());
        };
        let Some(file) = self.files.get(request.file_url) else {
            if self.requested_files.insert(request.file_url.to_owned()) {
                self.driver.fetch_file(request.file_url.to_owned());
            }
            renderer.clear_image()?;
            return Ok(());
        };

        match self.surface.render(&request, file) {
            Ok(mut image) => {
                self.render_error = None;
                let overlay = self.viewer.overlay();
                let painted =
                    paint_overlay(&mut image, &overlay, self.viewer.search().match_index());
                debug!(painted, fragments = overlay.len(), "overlay painted");
                let (columns, rows) = layout.fit_image(image.width, image.height);
                renderer.draw(&image, DrawParams::clamped(0, 0, columns, rows))?;
            }
            Err(err) => {
                warn!(?err, page = request.page_number, "page render failed");
                self.render_error = Some(err.to_string());
                renderer.clear_image()?;
            }
        }
        Ok(())
    }
}

fn redraw_if(changed: bool) -> LoopAction {
    if changed {
        LoopAction::ContinueRedraw
    } else {
        LoopAction::Continue
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs =
        project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .or_else(Config::default_path)
        .ok_or_else(|| anyhow!("unable to resolve config path"))?;
    let mut config = Config::load(&config_path)?;
    if let Some(service) = &args.service {
        config.service_url = service.clone();
    }
    info!(service = %config.service_url, config = ?config_path, "starting");

    let service = HttpExtractionService::new(&config.service_url, config.request_timeout)
        .context("failed to build extraction client")?;
    let (driver, mut events) = FetchDriver::new(Arc::new(service));
    let surface = PdfiumSurface::new(config.pdfium_library.as_deref())?;

    let mut app = App {
        viewer: Viewer::new(&config),
        driver,
        surface: Box::new(surface),
        files: HashMap::new(),
        requested_files: HashSet::new(),
        file_errors: HashMap::new(),
        panel: TextPanel::new(),
        subscription: None,
        initial_page: args.page,
        render_error: None,
    };
    app.run_command(Command::OpenDocument { url: args.url });

    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    renderer.clear_all()?;
    let mut layout = Layout::current()?;
    app.resize(&layout);

    let result = event_loop(&mut app, &mut renderer, &mut layout, &mut events);

    renderer.clear_image()?;
    renderer.clear_all()?;
    result
}

fn event_loop(
    app: &mut App,
    renderer: &mut KittyRenderer<Stdout>,
    layout: &mut Layout,
    events: &mut UnboundedReceiver<DriverEvent>,
) -> Result<()> {
    let mut event_mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        while let Ok(event) = events.try_recv() {
            dirty |= app.handle_driver_event(event);
        }

        if dirty {
            let pending = event_mapper.pending_input();
            app.redraw(renderer, layout, pending.as_deref())?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ui_event = event_mapper.map_event(event::read()?);
            if let UiEvent::Resized { .. } = ui_event {
                *layout = Layout::current()?;
                renderer.clear_all()?;
                app.resize(layout);
            }
            match app.handle_event(ui_event) {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {
                    let pending = event_mapper.pending_input();
                    if let Some(status) = combine_status(Some(app.status()), pending.as_deref()) {
                        draw_status_line(renderer, layout, &status)?;
                    }
                }
                LoopAction::Quit => break,
            }
        }
    }
    Ok(())
}

fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

fn draw_status_line(
    renderer: &mut KittyRenderer<Stdout>,
    layout: &Layout,
    status: &str,
) -> Result<()> {
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, layout.status_row()),
        Clear(ClearType::CurrentLine)
    )?;
    let visible: String = status.chars().take(usize::from(layout.columns)).collect();
    write_status_line(writer, &visible)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfscribe.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal is in raw mode while the viewer runs, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_splits_columns_and_measures_cells() {
        let layout = Layout::from_dimensions(100, 41, 1000, 820);
        assert_eq!(layout.page_columns, 50);
        assert_eq!(layout.cell_width, 10.0);
        assert_eq!(layout.cell_height, 20.0);
        assert_eq!(layout.container_width(), 500.0);
        assert_eq!(layout.body_rows(), 40);
        assert_eq!(
            layout.panel_region(),
            PanelRegion {
                column: 51,
                row: 0,
                columns: 49,
                rows: 40
            }
        );
    }

    #[test]
    fn layout_falls_back_when_terminal_hides_pixels() {
        let layout = Layout::from_dimensions(80, 24, 0, 0);
        assert_eq!(layout.cell_width, Layout::FALLBACK_CELL_WIDTH);
        assert_eq!(layout.container_width(), 40.0 * Layout::FALLBACK_CELL_WIDTH);
    }

    #[test]
    fn fit_image_keeps_aspect_inside_page_column() {
        let layout = Layout::from_dimensions(100, 41, 1000, 820);
        assert_eq!(layout.fit_image(400, 200), (40, 10));
        // Too tall: height limits the box and width shrinks with it.
        assert_eq!(layout.fit_image(500, 1600), (25, 40));
        assert_eq!(layout.fit_image(0, 10), (1, 1));
    }

    #[test]
    fn combine_status_appends_pending_input() {
        assert_eq!(
            combine_status(Some("page 1/3".into()), Some("/tax")),
            Some("page 1/3 | /tax".into())
        );
        assert_eq!(combine_status(Some("page 1/3".into()), Some("")), Some("page 1/3".into()));
        assert_eq!(combine_status(None, None), None);
    }
}
