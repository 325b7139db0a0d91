use std::io::Write;
use std::ops::Range;

use anyhow::Result;
use crossterm::{
    cursor,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
};
use pdfscribe_core::Highlighter;
use tracing::trace;
use unicode_width::UnicodeWidthChar;

/// Terminal cells the panel owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelRegion {
    pub column: u16,
    pub row: u16,
    pub columns: u16,
    pub rows: u16,
}

impl PanelRegion {
    fn contains(&self, column: u16, row: u16) -> bool {
        column >= self.column
            && row >= self.row
            && column < self.column.saturating_add(self.columns)
            && row < self.row.saturating_add(self.rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellStyle {
    Plain,
    Match,
    CurrentMatch,
    Selected,
}

/// Selectable, wrapped view of a page's extracted text.
#[derive(Debug, Default)]
pub struct TextPanel {
    region: PanelRegion,
    text: String,
    lines: Vec<Range<usize>>,
    scroll: usize,
    selection: Option<(usize, usize)>,
}

impl TextPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the text. Scroll and selection reset only when it changed.
    pub fn set_text(&mut self, text: &str) {
        if self.text == text {
            return;
        }
        self.text = text.to_owned();
        self.scroll = 0;
        self.selection = None;
        self.layout();
    }

    pub fn set_region(&mut self, region: PanelRegion) {
        if self.region == region {
            return;
        }
        self.region = region;
        self.layout();
    }

    fn layout(&mut self) {
        self.lines.clear();
        let width = usize::from(self.region.columns.max(1));
        let mut offset = 0;
        for raw in self.text.split('\n') {
            let mut start = offset;
            let mut cells = 0;
            for (index, c) in raw.char_indices() {
                let cell_width = char_cells(c);
                if cells > 0 && cells + cell_width > width {
                    self.lines.push(start..offset + index);
                    start = offset + index;
                    cells = 0;
                }
                cells += cell_width;
            }
            self.lines.push(start..offset + raw.len());
            offset += raw.len() + 1;
        }
        self.scroll = self.scroll.min(self.max_scroll());
        trace!(lines = self.lines.len(), width, "text panel laid out");
    }

    fn max_scroll(&self) -> usize {
        self.lines
            .len()
            .saturating_sub(usize::from(self.region.rows.max(1)))
    }

    pub fn scroll_by(&mut self, lines: isize) {
        let next = self.scroll as isize + lines;
        self.scroll = next.clamp(0, self.max_scroll() as isize) as usize;
    }

    /// Scrolls so the line holding byte `offset` is visible.
    pub fn reveal(&mut self, offset: usize) {
        let Some(line) = self.lines.iter().position(|line| offset <= line.end) else {
            return;
        };
        let rows = usize::from(self.region.rows.max(1));
        if line < self.scroll {
            self.scroll = line;
        } else if line >= self.scroll + rows {
            self.scroll = (line + 1 - rows).min(self.max_scroll());
        }
    }

    /// Byte offset of the character under a terminal cell. Cells past the end
    /// of a line resolve to the line end.
    pub fn offset_at(&self, column: u16, row: u16) -> Option<usize> {
        if !self.region.contains(column, row) {
            return None;
        }
        let line_index = self.scroll + usize::from(row - self.region.row);
        let Some(line) = self.lines.get(line_index) else {
            return Some(self.text.len());
        };
        let cell = usize::from(column - self.region.column);
        let mut used = 0;
        for (index, c) in self.text[line.clone()].char_indices() {
            used += char_cells(c);
            if cell < used {
                return Some(line.start + index);
            }
        }
        Some(line.end)
    }

    pub fn begin_selection(&mut self, column: u16, row: u16) -> bool {
        self.selection = self.offset_at(column, row).map(|offset| (offset, offset));
        self.selection.is_some()
    }

    pub fn extend_selection(&mut self, column: u16, row: u16) -> bool {
        let Some((anchor, _)) = self.selection else {
            return false;
        };
        match self.clamped_offset(column, row) {
            Some(head) => {
                self.selection = Some((anchor, head));
                true
            }
            None => false,
        }
    }

    /// Finishes the gesture and returns the selected text. A click without a
    /// drag selects nothing.
    pub fn end_selection(&mut self, column: u16, row: u16) -> Option<String> {
        self.extend_selection(column, row);
        let range = self.selected_range()?;
        Some(self.text[range].to_owned())
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    fn clamped_offset(&self, column: u16, row: u16) -> Option<usize> {
        if self.lines.is_empty() || self.region.columns == 0 || self.region.rows == 0 {
            return None;
        }
        let last_column = self.region.column + self.region.columns - 1;
        let last_row = self.region.row + self.region.rows - 1;
        self.offset_at(
            column.clamp(self.region.column, last_column),
            row.clamp(self.region.row, last_row),
        )
    }

    /// Selected byte range, inclusive of the character under the head.
    fn selected_range(&self) -> Option<Range<usize>> {
        let (anchor, head) = self.selection?;
        if anchor == head {
            return None;
        }
        let (start, last) = (anchor.min(head), anchor.max(head));
        let end = self.text[last..]
            .chars()
            .next()
            .map(|c| last + c.len_utf8())
            .unwrap_or(last);
        Some(start..end)
    }

    /// Byte ranges of every match of `highlighter` in the panel text.
    pub fn match_ranges(&self, highlighter: &Highlighter) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut offset = 0;
        for segment in highlighter.segments(&self.text) {
            let end = offset + segment.value.len();
            if segment.is_match {
                ranges.push(offset..end);
            }
            offset = end;
        }
        ranges
    }

    fn style_at(
        &self,
        offset: usize,
        selected: &Option<Range<usize>>,
        matches: &[Range<usize>],
        current: Option<usize>,
    ) -> CellStyle {
        if selected.as_ref().is_some_and(|range| range.contains(&offset)) {
            return CellStyle::Selected;
        }
        match matches.iter().position(|range| range.contains(&offset)) {
            Some(index) if Some(index) == current => CellStyle::CurrentMatch,
            Some(_) => CellStyle::Match,
            None => CellStyle::Plain,
        }
    }

    pub fn draw<W: Write>(
        &self,
        writer: &mut W,
        highlighter: &Highlighter,
        current: Option<usize>,
    ) -> Result<()> {
        let matches = self.match_ranges(highlighter);
        let selected = self.selected_range();
        let width = usize::from(self.region.columns);

        for screen_row in 0..self.region.rows {
            crossterm::queue!(
                writer,
                cursor::MoveTo(self.region.column, self.region.row + screen_row)
            )?;
            let mut used = 0;
            if let Some(line) = self.lines.get(self.scroll + usize::from(screen_row)) {
                let mut run = String::new();
                let mut run_style = CellStyle::Plain;
                for (index, c) in self.text[line.clone()].char_indices() {
                    let style = self.style_at(line.start + index, &selected, &matches, current);
                    if style != run_style && !run.is_empty() {
                        print_run(writer, &run, run_style)?;
                        run.clear();
                    }
                    run_style = style;
                    run.push(if c.is_control() { ' ' } else { c });
                    used += char_cells(c);
                }
                if !run.is_empty() {
                    print_run(writer, &run, run_style)?;
                }
            }
            if used < width {
                crossterm::queue!(writer, Print(" ".repeat(width - used)))?;
            }
        }
        Ok(())
    }
}

/// Terminal cells a character occupies. Control characters are drawn as a
/// single blank.
fn char_cells(c: char) -> usize {
    if c.is_control() {
        1
    } else {
        c.width().unwrap_or(1)
    }
}

fn print_run<W: Write>(writer: &mut W, run: &str, style: CellStyle) -> Result<()> {
    match style {
        CellStyle::Plain => crossterm::queue!(writer, Print(run))?,
        CellStyle::Match => crossterm::queue!(
            writer,
            SetBackgroundColor(Color::Yellow),
            SetForegroundColor(Color::Black),
            Print(run),
            ResetColor
        )?,
        CellStyle::CurrentMatch => crossterm::queue!(
            writer,
            SetBackgroundColor(Color::Rgb {
                r: 255,
                g: 140,
                b: 0
            }),
            SetForegroundColor(Color::Black),
            Print(run),
            ResetColor
        )?,
        CellStyle::Selected => crossterm::queue!(
            writer,
            SetAttribute(Attribute::Reverse),
            Print(run),
            SetAttribute(Attribute::Reset)
        )?,
    }
    Ok(())
}
