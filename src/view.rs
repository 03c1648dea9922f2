use std::fs::File;
use std::io::{self, Seek};
use std::ops::{ControlFlow, Range};
use std::path::PathBuf;

use tracing::{debug, warn};
use unicode_width::UnicodeWidthChar;

use crate::action::Action;
use crate::canvas::{Attr, Canvas};
use crate::charset::Encoding;
use crate::config::{EncodingName, ViewConfig};
use crate::coord_cache::{ColumnRules, CoordCache, CoordEntry, Lookup};
use crate::datasource::{DataSource, RandomAccess};
use crate::dimensions::Dimensions;
use crate::error::{Result, ViewError};
use crate::formatter::{Formatter, FormatterState, Layout};
use crate::growbuf::Producer;
use crate::search::{Matcher, SearchDriver, SearchOptions, SearchOutcome, SearchProgress, SearchStep};

/// What a view can be loaded from.
pub enum Input {
    /// A file on disk. Files reporting a size of zero, or that cannot seek
    /// (think `/proc`), are read like a pipe.
    Path(PathBuf),
    /// The output of a command, or anything else that can only be read forward.
    Pipe(Box<dyn Producer>),
    /// An already open seekable handle.
    Handle(Box<dyn RandomAccess>),
    Bytes(Vec<u8>),
    Empty,
}

/// Where the top of the screen is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: u64,
    pub line: u64,
    pub column: u64,
    /// How far through the data the bottom of the screen is. Unknown while
    /// the data may still grow.
    pub percent: Option<u8>,
}

/// One open document and everything needed to draw and scroll it.
///
/// The top of the screen is described by `top_offset`, the start of the
/// paragraph holding the top row, plus `skip_lines`, the number of rows of
/// that paragraph scrolled off the top (always 0 when not wrapping).
/// `top_state` and `bottom_state` are the formatter states at the top row
/// and just below the bottom row as of the last render.
pub struct View {
    pub(crate) source: DataSource,
    pub(crate) config: ViewConfig,
    encoding: Encoding,
    coord_cache: CoordCache,
    pub(crate) dimensions: Dimensions,

    pub(crate) top_offset: u64,
    pub(crate) skip_lines: u64,
    pub(crate) top_state: FormatterState,
    pub(crate) bottom_state: FormatterState,
    end_offset: u64,
    // `top_state` must be rebuilt from `top_offset` and `skip_lines`.
    pub(crate) wrap_dirty: bool,
    // `bottom_state` no longer matches the top of the screen.
    pub(crate) bottom_stale: bool,
    pub(crate) text_column: u64,

    pub(crate) search_span: Range<u64>,
    pub(crate) interrupted: Box<dyn FnMut() -> bool>,
}

impl View {
    pub fn new(config: &ViewConfig, dimensions: Dimensions) -> View {
        View {
            source: DataSource::None,
            config: config.clone(),
            encoding: config.encoding.encoding(),
            coord_cache: CoordCache::new(),
            dimensions,
            top_offset: 0,
            skip_lines: 0,
            top_state: FormatterState::new(0),
            bottom_state: FormatterState::new(0),
            end_offset: 0,
            wrap_dirty: false,
            bottom_stale: true,
            text_column: 0,
            search_span: 0..0,
            interrupted: Box::new(|| false),
        }
    }

    /// Replace whatever is shown with `input`, starting at the 1-based
    /// `start_line` (0 for the top) and optionally highlighting `search_span`.
    ///
    /// On failure the view is left empty and the error is returned for the
    /// caller to show.
    pub fn load(
        &mut self,
        input: Input,
        start_line: u64,
        search_span: Option<Range<u64>>,
    ) -> Result<()> {
        self.close();

        match Self::open(input) {
            Ok(source) => self.source = source,
            Err(err) => {
                warn!(target: "view", error = %err, "failed to load view");
                return Err(err);
            }
        }
        debug!(target: "view", filesize = self.source.filesize(), start_line, "loaded view");

        if start_line > 0 {
            self.move_to(start_line - 1, 0);
        }
        if let Some(span) = search_span.filter(|span| span.start < span.end) {
            self.search_span = span;
            if start_line == 0 {
                self.move_to_match();
            }
        }
        Ok(())
    }

    fn open(input: Input) -> Result<DataSource> {
        match input {
            Input::Empty => Ok(DataSource::None),
            Input::Bytes(bytes) => Ok(DataSource::string(bytes)),
            Input::Handle(handle) => Ok(DataSource::file(handle)?),
            Input::Pipe(reader) => {
                let mut source = DataSource::pipe(reader);
                if source.get_byte(0).is_none() && !source.may_still_grow() {
                    return Err(match source.take_error() {
                        Some(err) => ViewError::Read(err),
                        None => ViewError::NoOutput,
                    });
                }
                Ok(source)
            }
            Input::Path(path) => {
                let mut file = File::open(&path).map_err(|source| ViewError::Open {
                    path: path.clone(),
                    source,
                })?;
                let metadata = file.metadata().map_err(|source| ViewError::Stat {
                    path: path.clone(),
                    source,
                })?;
                if !metadata.is_file() {
                    return Err(ViewError::NotRegularFile { path });
                }

                if metadata.len() == 0 || file.rewind().is_err() {
                    debug!(target: "view", path = %path.display(), "reading file as a stream");
                    return Ok(DataSource::pipe(Box::new(file)));
                }
                DataSource::file(Box::new(file)).map_err(|source| ViewError::Stat { path, source })
            }
        }
    }

    /// Drop the source and forget every position derived from it.
    pub fn close(&mut self) {
        self.source.close();
        self.coord_cache.reset();
        self.top_offset = 0;
        self.skip_lines = 0;
        self.top_state = FormatterState::new(0);
        self.bottom_state = FormatterState::new(0);
        self.end_offset = 0;
        self.wrap_dirty = false;
        self.bottom_stale = true;
        self.text_column = 0;
        self.search_span = 0..0;
    }

    /// The mode flags this view is in now, for starting the next view with.
    pub fn mode_config(&self) -> ViewConfig {
        let mut config = self.config.clone();
        match &self.encoding {
            Encoding::Utf8 => config.encoding = EncodingName::Utf8,
            Encoding::SingleByte(codepage) if codepage.name() == "latin1" => {
                config.encoding = EncodingName::Latin1
            }
            Encoding::SingleByte(_) => {}
        }
        config
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn filesize(&self) -> u64 {
        self.source.filesize()
    }

    pub fn may_still_grow(&self) -> bool {
        self.source.may_still_grow()
    }

    pub fn has_source(&self) -> bool {
        !self.source.is_none()
    }

    pub fn search_span(&self) -> Range<u64> {
        self.search_span.clone()
    }

    /// A read error hit while pulling data. Reported once.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.source.take_error()
    }

    /// Install a check polled between steps of long walks (coordinate
    /// lookups); returning true cuts the walk short.
    pub fn set_interrupt_check(&mut self, interrupted: impl FnMut() -> bool + 'static) {
        self.interrupted = Box::new(interrupted);
    }

    pub(crate) fn layout(&self) -> Layout {
        Layout {
            wrap: self.config.wrap,
            nroff: self.config.nroff,
            tab_spacing: self.config.tab_spacing,
            encoding: self.encoding.clone(),
            width: self.dimensions.width as u64,
            height: self.dimensions.height,
            text_column: self.text_column,
            force_max: None,
            highlight: self.search_span.clone(),
        }
    }

    fn column_rules(&self) -> ColumnRules {
        ColumnRules {
            nroff: self.config.nroff,
            tab_spacing: self.config.tab_spacing,
        }
    }

    pub(crate) fn top(&self) -> u64 {
        if self.config.wrap {
            self.top_state.offset
        } else {
            self.top_offset
        }
    }

    pub fn toggle_wrap(&mut self) {
        self.config.wrap = !self.config.wrap;
        if self.config.wrap {
            self.text_column = 0;
        } else {
            self.skip_lines = 0;
        }
        debug!(target: "view", wrap = self.config.wrap, "toggled wrap");
        self.invalidate_layout();
    }

    pub fn toggle_nroff(&mut self) {
        self.config.nroff = !self.config.nroff;
        debug!(target: "view", nroff = self.config.nroff, "toggled nroff");
        self.invalidate_layout();
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        debug!(target: "view", encoding = encoding.name(), "changed encoding");
        self.encoding = encoding;
        // The old top may sit in the middle of a character now.
        self.top_offset = self.source.bol(self.top_offset, 0);
        self.invalidate_layout();
    }

    pub fn resize(&mut self, dimensions: Dimensions) {
        self.dimensions = dimensions;
        self.wrap_dirty = true;
        self.bottom_stale = true;
    }

    // Positions cached under the old parameters are meaningless now;
    // recompute everything from the top paragraph.
    fn invalidate_layout(&mut self) {
        self.coord_cache.reset();
        self.top_state = FormatterState::new(self.top_offset);
        self.wrap_dirty = true;
        self.bottom_stale = true;
    }

    /// Rebuild `top_state` after anything that changed how the top paragraph
    /// wraps, keeping as many of its rows scrolled off as it still has.
    pub(crate) fn wrap_fixup(&mut self) {
        if !self.wrap_dirty {
            return;
        }
        self.wrap_dirty = false;

        let lines = self.skip_lines;
        self.skip_lines = 0;
        self.top_state = FormatterState::new(self.top_offset);

        let layout = self.layout();
        let mut formatter = Formatter::new(&mut self.source, &layout, None);
        for _ in 0..lines {
            let before = self.top_state;
            let line = formatter.format_line(&mut self.top_state, None, false);
            if line.rows == 0 {
                break;
            }
            if line.paragraph_ended {
                self.top_state = before;
                break;
            }
            self.skip_lines += 1;
        }
    }

    pub fn render(&mut self, canvas: &mut dyn Canvas) {
        self.render_pass(Some(canvas));
    }

    /// Bring `bottom_state` up to date without drawing anything.
    pub(crate) fn refresh(&mut self) {
        if self.bottom_stale {
            self.render_pass(None);
        }
    }

    fn render_pass(&mut self, mut canvas: Option<&mut dyn Canvas>) {
        let height = self.dimensions.height;
        let mut row;
        let mut state;

        loop {
            if let Some(canvas) = canvas.as_deref_mut() {
                canvas.clear();
            }

            state = if self.config.wrap {
                self.wrap_fixup();
                self.top_state
            } else {
                FormatterState::new(self.top_offset)
            };

            let layout = self.layout();
            let target = canvas.as_mut().map(|canvas| &mut **canvas as &mut dyn Canvas);
            let mut formatter = Formatter::new(&mut self.source, &layout, target);
            let mut ran_out = false;
            row = 0;
            while row < height {
                let rows = formatter.format_paragraph(&mut state, Some(row));
                if rows == 0 {
                    ran_out = true;
                    break;
                }
                row += rows;
            }

            // The data ends above the bottom row even though we are not at
            // the top of the file: the window grew, or the text got shorter.
            // Scroll back so the screen is full, and draw again.
            if ran_out && self.top() > 0 {
                self.move_up_rows((height - row) as u64);
                continue;
            }
            break;
        }

        self.end_offset = state.offset;
        self.bottom_state = state;
        self.bottom_stale = false;

        if let (Some(canvas), Some(filler)) = (canvas, self.config.show_eof.as_deref()) {
            for row in row..height {
                let mut col = 0;
                for ch in filler.chars() {
                    let width = ch.width().unwrap_or(0);
                    if width == 0 {
                        continue;
                    }
                    if col + width > self.dimensions.width {
                        break;
                    }
                    canvas.put(row, col, ch.encode_utf8(&mut [0; 4]), width, Attr::Normal);
                    col += width;
                }
            }
        }
    }

    /// (line, column) of `offset`. The column counts overprint sequences
    /// as one in nroff mode.
    pub fn offset_to_coord(&mut self, offset: u64) -> (u64, u64) {
        let rules = self.column_rules();
        let mut coord = CoordEntry {
            offset,
            ..CoordEntry::default()
        };
        self.coord_cache.lookup(
            &mut self.source,
            rules,
            &mut coord,
            Lookup::LineColumn,
            &mut *self.interrupted,
        );
        if rules.nroff {
            (coord.line, coord.nroff_column)
        } else {
            (coord.line, coord.column)
        }
    }

    pub fn coord_to_offset(&mut self, line: u64, column: u64) -> u64 {
        let rules = self.column_rules();
        let mut coord = CoordEntry {
            offset: 0,
            line,
            column,
            nroff_column: column,
        };
        self.coord_cache.lookup(
            &mut self.source,
            rules,
            &mut coord,
            Lookup::Offset,
            &mut *self.interrupted,
        );
        coord.offset
    }

    /// How far through the data `offset` is, or `None` while the data may
    /// still grow.
    pub fn calc_percent(&self, offset: u64) -> Option<u8> {
        if self.source.may_still_grow() {
            return None;
        }
        let filesize = self.source.filesize();
        if filesize == 0 || offset >= filesize {
            return Some(100);
        }
        Some((offset as u128 * 100 / filesize as u128) as u8)
    }

    pub fn current_position(&mut self) -> Position {
        self.refresh();
        let offset = self.top();
        let (line, column) = self.offset_to_coord(offset);
        let column = if self.config.wrap {
            column
        } else {
            self.text_column
        };
        Position {
            offset,
            line,
            column,
            percent: self.calc_percent(self.end_offset),
        }
    }

    /// Offset just past the bottom row as of the last render.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Search from the current match (or the top of the screen when there
    /// is none) and move the match into view. `progress` is called between
    /// chunks of work and may cancel the search.
    pub fn search(
        &mut self,
        matcher: &mut dyn Matcher,
        options: SearchOptions,
        progress: &mut dyn FnMut(SearchProgress) -> ControlFlow<()>,
    ) -> SearchOutcome {
        let anchor = self.search_span.start;
        let has_match = self.search_span.start < self.search_span.end;

        let outcome = if !options.backwards {
            let start = if has_match { anchor + 1 } else { anchor };
            match self.run_search(matcher, start, None, false, progress) {
                SearchOutcome::NotFound if options.wrap_around && start > 0 => {
                    self.run_search(matcher, 0, Some(start), false, progress)
                }
                outcome => outcome,
            }
        } else {
            match self.run_search(matcher, 0, Some(anchor), true, progress) {
                SearchOutcome::NotFound if options.wrap_around => {
                    self.run_search(matcher, anchor, None, true, progress)
                }
                outcome => outcome,
            }
        };

        debug!(target: "search", ?outcome, backwards = options.backwards, "search finished");
        if let SearchOutcome::Found(span) = &outcome {
            self.search_span = span.clone();
            self.move_to_match();
        }
        outcome
    }

    // The first (or, with `last`, the final) match starting in `from..until`.
    fn run_search(
        &mut self,
        matcher: &mut dyn Matcher,
        from: u64,
        until: Option<u64>,
        last: bool,
        progress: &mut dyn FnMut(SearchProgress) -> ControlFlow<()>,
    ) -> SearchOutcome {
        let encoding = self.encoding.clone();
        let mut driver = SearchDriver::new(matcher, self.config.nroff, from, until);
        if last {
            driver = driver.find_last();
        }
        loop {
            match driver.step(&mut self.source, &encoding) {
                SearchStep::Found(span) => return SearchOutcome::Found(span),
                SearchStep::NotFound => return SearchOutcome::NotFound,
                SearchStep::Pending => {
                    let offset = driver.offset();
                    let report = SearchProgress {
                        offset,
                        percent: self.calc_percent(offset),
                    };
                    if progress(report).is_break() {
                        return SearchOutcome::Aborted;
                    }
                }
            }
        }
    }

    pub fn do_action(&mut self, action: Action) {
        match action {
            Action::NoOp => {}
            Action::MoveDown(lines) => self.move_down(lines),
            Action::MoveUp(lines) => self.move_up(lines),
            Action::PageDown => self.page_down(),
            Action::PageUp => self.page_up(),
            Action::HalfPageDown => self.move_down((self.dimensions.height as u64 / 2).max(1)),
            Action::HalfPageUp => self.move_up((self.dimensions.height as u64 / 2).max(1)),
            Action::MoveLeft(columns) => self.move_left(columns),
            Action::MoveRight(columns) => self.move_right(columns),
            Action::MoveToTop => self.move_to_top(),
            Action::MoveToBottom => self.move_to_bottom(),
            Action::MoveToBol => self.move_to_bol(),
            Action::MoveToEol => self.move_to_eol(),
            Action::MoveToLine(line) => self.move_to(line, 0),
            Action::MoveToOffset(offset) => self.move_to_offset(offset),
            Action::ToggleWrap => self.toggle_wrap(),
            Action::ToggleNroff => self.toggle_nroff(),
            Action::SetEncoding(encoding) => self.set_encoding(encoding),
        }
    }
}
