use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use pdfscribe_core::{Command, RenderImage};

mod panel;

pub use panel::{PanelRegion, TextPanel};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub column: u16,
    pub row: u16,
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(column: u16, row: u16, columns: u32, rows: u32) -> Self {
        Self {
            column,
            row,
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it in the given cell box,
    /// replacing the previous placement.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        crossterm::queue!(self.writer, cursor::MoveTo(params.column, params.row))?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every placement of the page image.
    pub fn clear_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=i,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    /// Prompt text changed; only the status line needs redrawing.
    PromptChanged,
    SelectionStart { column: u16, row: u16 },
    SelectionDrag { column: u16, row: u16 },
    SelectionEnd { column: u16, row: u16 },
    ScrollText { lines: isize },
    ClearSelection,
    Resized { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
    GotoPage,
}

pub struct EventMapper {
    mode: InputMode,
    pending_count: Option<usize>,
    pending_digits: String,
    prompt: String,
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMapper {
    const PAGE_SCROLL: isize = 10;

    pub fn new() -> Self {
        Self {
            mode: InputMode::Normal,
            pending_count: None,
            pending_digits: String::new(),
            prompt: String::new(),
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    fn set_mode(&mut self, mode: InputMode) {
        self.reset_count();
        self.prompt.clear();
        self.mode = mode;
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                kind: KeyEventKind::Release,
                ..
            }) => UiEvent::None,
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Search => self.map_key_search(key),
                InputMode::GotoPage => self.map_key_goto(key),
            },
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => UiEvent::Resized { columns, rows },
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::PromptChanged
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage {
                    count: count as u32,
                })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage {
                    count: count as u32,
                })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) => match self.pending_count.take() {
                Some(page) => {
                    self.reset_count();
                    UiEvent::Command(Command::GotoPage { page: page as i64 })
                }
                None => UiEvent::Command(Command::FirstPage),
            },
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::Command(Command::LastPage)
            }
            (KeyCode::Char(':'), _) => {
                self.set_mode(InputMode::GotoPage);
                UiEvent::PromptChanged
            }
            (KeyCode::Char('/'), _) => {
                self.set_mode(InputMode::Search);
                UiEvent::PromptChanged
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SearchNext)
            }
            (KeyCode::Char('N'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                self.reset_count();
                UiEvent::Command(Command::SearchPrev)
            }
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomIn)
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomOut)
            }
            (KeyCode::Char(']'), _) => {
                self.reset_count();
                UiEvent::Command(Command::TextScaleUp)
            }
            (KeyCode::Char('['), _) => {
                self.reset_count();
                UiEvent::Command(Command::TextScaleDown)
            }
            (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::Command(Command::ResetScale)
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::Retry)
            }
            (KeyCode::Char('J'), _) => UiEvent::ScrollText {
                lines: self.take_count() as isize,
            },
            (KeyCode::Char('K'), _) => UiEvent::ScrollText {
                lines: -(self.take_count() as isize),
            },
            (KeyCode::PageDown, _) => UiEvent::ScrollText {
                lines: Self::PAGE_SCROLL,
            },
            (KeyCode::PageUp, _) => UiEvent::ScrollText {
                lines: -Self::PAGE_SCROLL,
            },
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::ClearSelection
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_search(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::Command(Command::Search {
                    query: String::new(),
                })
            }
            (KeyCode::Enter, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptChanged
            }
            (KeyCode::Backspace, _) => {
                self.prompt.pop();
                UiEvent::Command(Command::Search {
                    query: self.prompt.clone(),
                })
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.prompt.push(c);
                UiEvent::Command(Command::Search {
                    query: self.prompt.clone(),
                })
            }
            _ => UiEvent::None,
        }
    }

    fn map_key_goto(&mut self, key: KeyEvent) -> UiEvent {
        match key.code {
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptChanged
            }
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.prompt);
                self.set_mode(InputMode::Normal);
                UiEvent::Command(Command::GotoPageInput { input })
            }
            KeyCode::Backspace => {
                self.prompt.pop();
                UiEvent::PromptChanged
            }
            KeyCode::Char(c) => {
                self.prompt.push(c);
                UiEvent::PromptChanged
            }
            _ => UiEvent::None,
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let (column, row) = (mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => UiEvent::SelectionStart { column, row },
            MouseEventKind::Drag(MouseButton::Left) => UiEvent::SelectionDrag { column, row },
            MouseEventKind::Up(MouseButton::Left) => UiEvent::SelectionEnd { column, row },
            MouseEventKind::ScrollDown => UiEvent::ScrollText { lines: 3 },
            MouseEventKind::ScrollUp => UiEvent::ScrollText { lines: -3 },
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Text to show after the status line: an open prompt or a count prefix.
    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Search => Some(format!("/{}", self.prompt)),
            InputMode::GotoPage => Some(format!(":{}", self.prompt)),
            InputMode::Normal if !self.pending_digits.is_empty() => {
                Some(self.pending_digits.clone())
            }
            InputMode::Normal => None,
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RenderImage {
            width: 1,
            height: 1,
            pixels: vec![255, 0, 0, 255],
        };

        renderer
            .draw(&image, DrawParams::clamped(0, 0, 10, 5))
            .unwrap();
        let output = String::from_utf8(renderer.writer).unwrap();
        assert!(output.contains("\u{1b}_Ga=T,f=100"));
        assert!(output.contains("c=10,r=5,s=1,v=1"));
        assert!(output.ends_with("\u{1b}\\"));
    }

    fn key(code: KeyCode) -> Event {
        key_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn numeric_prefix_applies_to_next_page() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char('1')));
        mapper.map_event(key(KeyCode::Char('2')));
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key(KeyCode::Char('j'))),
            UiEvent::Command(Command::NextPage { count: 12 })
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('k'))),
            UiEvent::Command(Command::PrevPage { count: 1 })
        );
    }

    #[test]
    fn count_before_g_jumps_to_page() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char('7')));
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('g'))),
            UiEvent::Command(Command::GotoPage { page: 7 })
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('g'))),
            UiEvent::Command(Command::FirstPage)
        );
    }

    #[test]
    fn search_prompt_emits_live_queries() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char('/')));
        assert_eq!(mapper.mode(), InputMode::Search);
        mapper.map_event(key(KeyCode::Char('a')));
        assert_eq!(
            mapper.map_event(key_with_modifiers(KeyCode::Char('B'), KeyModifiers::SHIFT)),
            UiEvent::Command(Command::Search {
                query: "aB".into()
            })
        );
        assert_eq!(mapper.pending_input().as_deref(), Some("/aB"));
        assert_eq!(
            mapper.map_event(key(KeyCode::Backspace)),
            UiEvent::Command(Command::Search { query: "a".into() })
        );
        assert_eq!(mapper.map_event(key(KeyCode::Enter)), UiEvent::PromptChanged);
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn escape_clears_search() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char('/')));
        mapper.map_event(key(KeyCode::Char('x')));
        assert_eq!(
            mapper.map_event(key(KeyCode::Esc)),
            UiEvent::Command(Command::Search {
                query: String::new()
            })
        );
    }

    #[test]
    fn goto_prompt_passes_raw_input() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char(':')));
        for c in "4x".chars() {
            mapper.map_event(key(KeyCode::Char(c)));
        }
        assert_eq!(mapper.pending_input().as_deref(), Some(":4x"));
        assert_eq!(
            mapper.map_event(key(KeyCode::Enter)),
            UiEvent::Command(Command::GotoPageInput { input: "4x".into() })
        );
        assert_eq!(mapper.pending_input(), None);
    }

    #[test]
    fn scale_keys_map_to_separate_knobs() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('+'))),
            UiEvent::Command(Command::ZoomIn)
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char(']'))),
            UiEvent::Command(Command::TextScaleUp)
        );
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('['))),
            UiEvent::Command(Command::TextScaleDown)
        );
    }

    #[test]
    fn left_button_gestures_become_selection_events() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(mouse(MouseEventKind::Down(MouseButton::Left), 3, 4)),
            UiEvent::SelectionStart { column: 3, row: 4 }
        );
        assert_eq!(
            mapper.map_event(mouse(MouseEventKind::Up(MouseButton::Left), 9, 4)),
            UiEvent::SelectionEnd { column: 9, row: 4 }
        );
        assert_eq!(
            mapper.map_event(mouse(MouseEventKind::Down(MouseButton::Right), 3, 4)),
            UiEvent::None
        );
        assert_eq!(
            mapper.map_event(Event::Resize(120, 40)),
            UiEvent::Resized {
                columns: 120,
                rows: 40
            }
        );
    }

    #[test]
    fn escape_in_normal_mode_clears_selection_and_prefix() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char('3')));
        assert_eq!(mapper.map_event(key(KeyCode::Esc)), UiEvent::ClearSelection);
        assert_eq!(mapper.pending_input(), None);
    }

    #[test]
    fn quit_drops_pending_prefix() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key(KeyCode::Char('4')));
        assert_eq!(mapper.map_event(key(KeyCode::Char('q'))), UiEvent::Quit);
        assert_eq!(
            mapper.map_event(key(KeyCode::Char('j'))),
            UiEvent::Command(Command::NextPage { count: 1 })
        );
    }
}
