//! VT-style terminal screen with bounded scrollback.
//!
//! The screen consumes raw child output (text, control characters, and
//! escape sequences) and maintains a grid of styled cells, a cursor, a
//! scrollback ring, and a dirty-row set for incremental rendering. One
//! screen belongs to one tab; the owner serialises `feed` and `display`,
//! so no locking happens here.

use std::collections::{BTreeSet, VecDeque};

use crate::cell::Cell;
use crate::color::{Color, NamedColor};
use crate::parser::{Parser, TermAction};
use crate::style::Style;

/// Default scrollback capacity in lines.
pub const DEFAULT_SCROLLBACK: usize = 10_000;

/// Tab stops every eight columns.
const TAB_WIDTH: usize = 8;

/// A styled terminal screen fed from a byte stream.
#[derive(Debug)]
pub struct TerminalScreen {
    cols: usize,
    rows: usize,
    grid: Vec<Vec<Cell>>,
    cursor_x: usize,
    cursor_y: usize,
    cursor_visible: bool,
    pen: Style,
    scrollback: VecDeque<Vec<Cell>>,
    scrollback_limit: usize,
    scroll_offset: usize,
    dirty: BTreeSet<usize>,
    parser: Parser,
}

impl TerminalScreen {
    /// Create a screen with the default scrollback capacity.
    pub fn new(cols: usize, rows: usize) -> Self {
        Self::with_scrollback(cols, rows, DEFAULT_SCROLLBACK)
    }

    /// Create a screen with an explicit scrollback capacity.
    pub fn with_scrollback(cols: usize, rows: usize, scrollback_limit: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            grid: blank_grid(cols, rows),
            cursor_x: 0,
            cursor_y: 0,
            cursor_visible: true,
            pen: Style::default(),
            scrollback: VecDeque::new(),
            scrollback_limit,
            scroll_offset: 0,
            dirty: (0..rows).collect(),
            parser: Parser::new(),
        }
    }

    /// Terminal width in columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Terminal height in rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Cursor column, always within `0..cols`.
    pub fn cursor_x(&self) -> usize {
        self.cursor_x.min(self.cols - 1)
    }

    /// Cursor row, always within `0..rows`.
    pub fn cursor_y(&self) -> usize {
        self.cursor_y
    }

    /// Whether the cursor should be drawn.
    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    /// Number of lines currently in scrollback.
    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Current scroll offset; 0 means the live tail.
    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Parse and apply a chunk of child output.
    pub fn feed(&mut self, bytes: &[u8]) {
        let actions = self.parser.advance(bytes);
        for action in actions {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: TermAction) {
        match action {
            TermAction::Print(ch) => self.print(ch),
            TermAction::CarriageReturn => self.cursor_x = 0,
            TermAction::LineFeed => self.line_feed(),
            TermAction::Backspace => self.cursor_x = self.cursor_x().saturating_sub(1),
            TermAction::Tab => {
                let next = (self.cursor_x() / TAB_WIDTH + 1) * TAB_WIDTH;
                self.cursor_x = next.min(self.cols - 1);
            }
            TermAction::CursorPosition { row, col } => {
                self.cursor_y = (row.max(1) as usize - 1).min(self.rows - 1);
                self.cursor_x = (col.max(1) as usize - 1).min(self.cols - 1);
            }
            TermAction::CursorUp(n) => {
                self.cursor_y = self.cursor_y.saturating_sub(n as usize);
            }
            TermAction::CursorDown(n) => {
                self.cursor_y = (self.cursor_y + n as usize).min(self.rows - 1);
            }
            TermAction::CursorForward(n) => {
                self.cursor_x = (self.cursor_x() + n as usize).min(self.cols - 1);
            }
            TermAction::CursorBack(n) => {
                self.cursor_x = self.cursor_x().saturating_sub(n as usize);
            }
            TermAction::EraseInLine(mode) => self.erase_in_line(mode),
            TermAction::EraseInDisplay(mode) => self.erase_in_display(mode),
            TermAction::Sgr(params) => self.apply_sgr(&params),
            TermAction::SetCursorVisible(visible) => self.cursor_visible = visible,
        }
    }

    fn print(&mut self, ch: char) {
        let cell = Cell::new(ch.to_string(), self.pen);
        if cell.width == 0 {
            // Combining mark: attach to the previous cell.
            let x = self.cursor_x().saturating_sub(1);
            let y = self.cursor_y;
            if let Some(prev) = self.grid[y].get_mut(x) {
                prev.grapheme.push(ch);
                self.dirty.insert(y);
            }
            return;
        }

        let width = cell.width as usize;
        if self.cursor_x + width > self.cols {
            self.cursor_x = 0;
            self.line_feed();
        }

        let y = self.cursor_y;
        let x = self.cursor_x;
        self.grid[y][x] = cell;
        if width == 2 && x + 1 < self.cols {
            self.grid[y][x + 1] = Cell::continuation(self.pen);
        }
        self.cursor_x = x + width;
        self.dirty.insert(y);
    }

    fn line_feed(&mut self) {
        if self.cursor_y + 1 < self.rows {
            self.cursor_y += 1;
            return;
        }
        // Bottom row: the top row moves into scrollback and the grid
        // shifts up.
        let top = self.grid.remove(0);
        if self.scrollback_limit > 0 {
            if self.scrollback.len() == self.scrollback_limit {
                self.scrollback.pop_front();
            }
            self.scrollback.push_back(top);
        }
        self.grid.push(blank_row(self.cols));
        self.mark_all_dirty();
    }

    fn erase_in_line(&mut self, mode: u16) {
        let y = self.cursor_y;
        let x = self.cursor_x();
        let range = match mode {
            0 => x..self.cols,
            1 => 0..x + 1,
            2 => 0..self.cols,
            _ => return,
        };
        for cell in &mut self.grid[y][range] {
            *cell = Cell::blank();
        }
        self.dirty.insert(y);
    }

    fn erase_in_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_in_line(0);
                for y in self.cursor_y + 1..self.rows {
                    self.grid[y] = blank_row(self.cols);
                    self.dirty.insert(y);
                }
            }
            1 => {
                for y in 0..self.cursor_y {
                    self.grid[y] = blank_row(self.cols);
                    self.dirty.insert(y);
                }
                self.erase_in_line(1);
            }
            2 => {
                self.grid = blank_grid(self.cols, self.rows);
                self.mark_all_dirty();
            }
            _ => {}
        }
    }

    fn apply_sgr(&mut self, params: &[u16]) {
        let mut iter = params.iter().copied();
        while let Some(param) = iter.next() {
            match param {
                0 => self.pen = Style::default(),
                1 => self.pen.bold = true,
                3 => self.pen.italic = true,
                4 => self.pen.underline = true,
                5 => self.pen.blink = true,
                7 => self.pen.reverse = true,
                9 => self.pen.strikethrough = true,
                22 => self.pen.bold = false,
                23 => self.pen.italic = false,
                24 => self.pen.underline = false,
                25 => self.pen.blink = false,
                27 => self.pen.reverse = false,
                29 => self.pen.strikethrough = false,
                30..=37 => {
                    if let Some(named) = NamedColor::basic(param - 30) {
                        self.pen.fg = Color::Named(named);
                    }
                }
                39 => self.pen.fg = Color::Default,
                40..=47 => {
                    if let Some(named) = NamedColor::basic(param - 40) {
                        self.pen.bg = Color::Named(named);
                    }
                }
                49 => self.pen.bg = Color::Default,
                90..=97 => {
                    if let Some(named) = NamedColor::bright(param - 90) {
                        self.pen.fg = Color::Named(named);
                    }
                }
                100..=107 => {
                    if let Some(named) = NamedColor::bright(param - 100) {
                        self.pen.bg = Color::Named(named);
                    }
                }
                38 | 48 => {
                    let Some(color) = extended_color(&mut iter) else {
                        // Malformed extended color: drop the rest of the
                        // sequence.
                        return;
                    };
                    if param == 38 {
                        self.pen.fg = color;
                    } else {
                        self.pen.bg = color;
                    }
                }
                _ => {}
            }
        }
    }

    /// The visible lines as plain strings. Always exactly `rows` lines;
    /// when scrolled, the window straddles scrollback and the live grid.
    pub fn display(&self) -> Vec<String> {
        self.visible_rows()
            .into_iter()
            .map(|row| row_to_string(row))
            .collect()
    }

    /// The styled cells of one visible line, under the same windowing as
    /// [`display`].
    ///
    /// [`display`]: TerminalScreen::display
    pub fn styled_line(&self, row: usize) -> Vec<Cell> {
        self.visible_rows()
            .get(row)
            .map(|cells| (*cells).clone())
            .unwrap_or_else(|| blank_row(self.cols))
    }

    fn visible_rows(&self) -> Vec<&Vec<Cell>> {
        if self.scroll_offset == 0 {
            return self.grid.iter().collect();
        }
        let total = self.scrollback.len() + self.rows;
        let end = total - self.scroll_offset.min(self.scrollback.len());
        let start = end - self.rows;
        (start..end)
            .map(|i| {
                if i < self.scrollback.len() {
                    &self.scrollback[i]
                } else {
                    &self.grid[i - self.scrollback.len()]
                }
            })
            .collect()
    }

    /// Scroll the view up into history.
    pub fn scroll_up(&mut self, n: usize) {
        let new = (self.scroll_offset + n).min(self.scrollback.len());
        if new != self.scroll_offset {
            self.scroll_offset = new;
            self.mark_all_dirty();
        }
    }

    /// Scroll the view back down toward the live tail.
    pub fn scroll_down(&mut self, n: usize) {
        let new = self.scroll_offset.saturating_sub(n);
        if new != self.scroll_offset {
            self.scroll_offset = new;
            self.mark_all_dirty();
        }
    }

    /// Jump to the oldest scrollback line.
    pub fn scroll_to_top(&mut self) {
        self.scroll_up(self.scrollback.len());
    }

    /// Jump back to the live tail.
    pub fn scroll_to_bottom(&mut self) {
        if self.scroll_offset != 0 {
            self.scroll_offset = 0;
            self.mark_all_dirty();
        }
    }

    /// Resize the grid, preserving content. Shrinking clips the right
    /// and bottom edges.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        for row in &mut self.grid {
            row.resize(cols, Cell::blank());
        }
        self.grid.resize(rows, blank_row(cols));
        for line in &mut self.scrollback {
            line.resize(cols, Cell::blank());
        }
        self.cols = cols;
        self.rows = rows;
        self.cursor_x = self.cursor_x.min(cols - 1);
        self.cursor_y = self.cursor_y.min(rows - 1);
        self.scroll_offset = self.scroll_offset.min(self.scrollback.len());
        self.mark_all_dirty();
    }

    /// Clear the grid and scrollback and home the cursor.
    pub fn reset(&mut self) {
        self.grid = blank_grid(self.cols, self.rows);
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.cursor_visible = true;
        self.pen = Style::default();
        self.scrollback.clear();
        self.scroll_offset = 0;
        self.parser = Parser::new();
        self.mark_all_dirty();
    }

    /// One scrollback line as a string, index 0 being the oldest.
    pub fn history_line(&self, index: usize) -> Option<String> {
        self.scrollback.get(index).map(|row| row_to_string(row))
    }

    /// Rows changed since the last [`clear_dirty`].
    ///
    /// [`clear_dirty`]: TerminalScreen::clear_dirty
    pub fn get_dirty(&self) -> BTreeSet<usize> {
        self.dirty.clone()
    }

    /// Forget dirty-row tracking.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    fn mark_all_dirty(&mut self) {
        self.dirty = (0..self.rows).collect();
    }
}

fn blank_row(cols: usize) -> Vec<Cell> {
    vec![Cell::blank(); cols]
}

fn blank_grid(cols: usize, rows: usize) -> Vec<Vec<Cell>> {
    (0..rows).map(|_| blank_row(cols)).collect()
}

fn row_to_string(row: &[Cell]) -> String {
    row.iter()
        .filter(|c| !c.is_continuation())
        .map(|c| c.grapheme.as_str())
        .collect()
}

fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => {
            let index = iter.next()?;
            Some(Color::Indexed(index.min(255) as u8))
        }
        2 => {
            let r = iter.next()?.min(255) as u8;
            let g = iter.next()?.min(255) as u8;
            let b = iter.next()?.min(255) as u8;
            Some(Color::Rgb { r, g, b })
        }
        _ => None,
    }
}
