//! Turns bytes into screen rows, one row or one paragraph at a time.
//!
//! Formatting never carries anything across a paragraph boundary: after a
//! `\n` the state is exactly `FormatterState::new(offset)`. That is what lets
//! navigation restart formatting at any paragraph start it finds by scanning
//! backwards for a newline.

use std::ops::Range;

use crate::canvas::{Attr, Canvas};
use crate::charset::{Encoding, Unit};
use crate::datasource::DataSource;
use crate::nroff::NroffDecoder;

/// Marks that may follow one base character in a single display cell.
pub const MAX_COMBINING_CHARS: usize = 4;

/// Base drawn under a combining mark that has nothing to combine with.
pub const BASE_CHARACTER_FOR_LONELY_COMBINING: char = '\u{25CC}';

// Drawn in place of a wide character cut by the edge of the viewport.
const PARTIAL_WIDE_AT_LEFT_MARGIN: &str = " ";
const PARTIAL_WIDE_AT_RIGHT_MARGIN: &str = " ";

/// Everything needed to resume formatting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatterState {
    pub offset: u64,
    /// Column within the paragraph as if it were never wrapped; drives tab stops.
    pub unwrapped_column: u64,
    /// How to read an ambiguous `_\b_` overprint.
    pub nroff_underscore_is_underlined: bool,
    /// Whether a combining mark without a base is drawn over a placeholder.
    /// Turned off after anything but a tab, so that a run of marks piling
    /// onto a wide character doesn't each get a placeholder.
    pub print_lonely_combining: bool,
}

impl FormatterState {
    pub fn new(offset: u64) -> FormatterState {
        FormatterState {
            offset,
            unwrapped_column: 0,
            nroff_underscore_is_underlined: false,
            print_lonely_combining: true,
        }
    }
}

impl Default for FormatterState {
    fn default() -> Self {
        FormatterState::new(0)
    }
}

/// The parameters a formatting pass runs with.
#[derive(Debug, Clone)]
pub struct Layout {
    pub wrap: bool,
    pub nroff: bool,
    pub tab_spacing: u64,
    pub encoding: Encoding,
    /// Columns and rows of the text area.
    pub width: u64,
    pub height: usize,
    /// First visible column when not wrapping.
    pub text_column: u64,
    /// Pretend the data ends here. Used while measuring a paragraph that
    /// precedes the current top of the screen.
    pub force_max: Option<u64>,
    /// Bytes drawn as the current search match.
    pub highlight: Range<u64>,
}

/// Reads characters in the current encoding, honoring `force_max`.
pub struct CharReader<'a> {
    source: &'a mut DataSource,
    encoding: &'a Encoding,
    force_max: Option<u64>,
}

impl<'a> CharReader<'a> {
    pub fn new(
        source: &'a mut DataSource,
        encoding: &'a Encoding,
        force_max: Option<u64>,
    ) -> CharReader<'a> {
        CharReader {
            source,
            encoding,
            force_max,
        }
    }

    pub fn encoding(&self) -> &Encoding {
        self.encoding
    }

    pub fn source(&mut self) -> &mut DataSource {
        self.source
    }

    pub fn next_char(&mut self, state: &mut FormatterState) -> Option<Unit> {
        if self.force_max.is_some_and(|max| state.offset >= max) {
            return None;
        }

        let (unit, len) = match self.encoding {
            Encoding::Utf8 => self.source.get_utf8(state.offset)?,
            Encoding::SingleByte(codepage) => {
                let byte = self.source.get_byte(state.offset)?;
                (Unit::Char(codepage.decode(byte)), 1)
            }
        };

        let next = state.offset + len as u64;
        if self.force_max.is_some_and(|max| next > max) {
            return None;
        }
        state.offset = next;
        Some(unit)
    }
}

/// What formatting a single row produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineResult {
    /// 1 if the row holds anything (or ended a paragraph), 0 at end of data.
    pub rows: usize,
    /// False when the row was cut by wrapping and the paragraph continues.
    pub paragraph_ended: bool,
    /// Columns used by the row.
    pub width: u64,
}

// A base character and the marks drawn on it.
struct Sequence {
    units: [Unit; 1 + MAX_COMBINING_CHARS],
    len: usize,
    attr: Attr,
}

impl Sequence {
    fn new(first: Unit, attr: Attr) -> Sequence {
        Sequence {
            units: [first; 1 + MAX_COMBINING_CHARS],
            len: 1,
            attr,
        }
    }

    fn push(&mut self, unit: Unit) {
        self.units[self.len] = unit;
        self.len += 1;
    }

    fn units(&self) -> &[Unit] {
        &self.units[..self.len]
    }

    fn first(&self) -> Unit {
        self.units[0]
    }
}

pub struct Formatter<'a> {
    reader: CharReader<'a>,
    nroff: NroffDecoder,
    layout: &'a Layout,
    canvas: Option<&'a mut dyn Canvas>,
}

impl<'a> Formatter<'a> {
    pub fn new(
        source: &'a mut DataSource,
        layout: &'a Layout,
        canvas: Option<&'a mut dyn Canvas>,
    ) -> Formatter<'a> {
        Formatter {
            reader: CharReader::new(source, &layout.encoding, layout.force_max),
            nroff: NroffDecoder::new(layout.nroff),
            layout,
            canvas,
        }
    }

    pub fn source(&mut self) -> &mut DataSource {
        self.reader.source()
    }

    fn text_column(&self) -> u64 {
        if self.layout.wrap {
            0
        } else {
            self.layout.text_column
        }
    }

    /// Collect the next base character and up to `MAX_COMBINING_CHARS` marks
    /// following it. `\r` and `\r\n` both come back as a single `\n`.
    fn next_sequence(&mut self, state: &mut FormatterState) -> Option<Sequence> {
        let encoding = &self.layout.encoding;
        let first = self.nroff.next(&mut self.reader, state)?;
        let mut seq = Sequence::new(first.unit, first.attr);

        if first.unit.is('\r') {
            let mut after = *state;
            if let Some(next) = self.nroff.next(&mut self.reader, &mut after) {
                if next.unit.is('\n') {
                    *state = after;
                }
            }
            seq.units[0] = Unit::Char('\n');
            return Some(seq);
        }

        // No combining over non-printables, which includes `\n` and `\t`.
        if !encoding.is_print(first.unit) {
            return Some(seq);
        }

        if encoding.is_mark(first.unit) {
            if !state.print_lonely_combining {
                return Some(seq);
            }
            seq.units[0] = Unit::Char(BASE_CHARACTER_FOR_LONELY_COMBINING);
            seq.push(first.unit);
        }

        // Marks are never combined with a wide character. A zero-width one is
        // then dropped on its own, a spacing one shows as a replacement.
        if encoding.width(seq.first()) == 2 {
            return Some(seq);
        }

        while seq.len < 1 + MAX_COMBINING_CHARS {
            let mut after = *state;
            let Some(next) = self.nroff.next(&mut self.reader, &mut after) else {
                break;
            };
            if !encoding.is_mark(next.unit) || !encoding.is_print(next.unit) {
                break;
            }
            if encoding.is_spacing_mark(next.unit) {
                // Only directly after the base, and it ends the sequence.
                if seq.len == 1 {
                    *state = after;
                    seq.push(next.unit);
                }
                break;
            }
            *state = after;
            seq.push(next.unit);
        }

        Some(seq)
    }

    /// Format one row starting at `state`, drawing it when `row` is a visible
    /// row and there is a canvas. With no visible row the row is only
    /// measured. `want_width` asks for the full width of the row even when
    /// not wrapping, which disables skipping ahead to the end of the line.
    pub fn format_line(
        &mut self,
        state: &mut FormatterState,
        row: Option<usize>,
        want_width: bool,
    ) -> LineResult {
        let layout = self.layout;
        let encoding = &layout.encoding;
        let wrap = layout.wrap;
        let text_column = self.text_column();
        let right_edge = text_column + layout.width;
        let visible_row = row.filter(|row| *row < layout.height && self.canvas.is_some());

        if !wrap && visible_row.is_none() && !want_width {
            let eol = self.source().eol(state.offset);
            let rows = usize::from(eol > state.offset);
            *state = FormatterState::new(eol);
            return LineResult {
                rows,
                paragraph_ended: true,
                width: 0,
            };
        }

        let mut col = 0;
        loop {
            let saved = *state;
            let Some(mut seq) = self.next_sequence(state) else {
                return LineResult {
                    rows: usize::from(col > 0),
                    paragraph_ended: true,
                    width: col,
                };
            };

            let highlight = &layout.highlight;
            let attr = if saved.offset < highlight.end && state.offset > highlight.start {
                Attr::Selected
            } else {
                seq.attr
            };

            if seq.first().is('\n') {
                *state = FormatterState::new(state.offset);
                return LineResult {
                    rows: 1,
                    paragraph_ended: true,
                    width: col,
                };
            }

            if encoding.is_non_spacing_mark(seq.first()) {
                continue;
            }

            let is_tab = seq.first().is('\t');
            if !is_tab && (!encoding.is_print(seq.first()) || encoding.is_mark(seq.first())) {
                seq.units[0] = Unit::Char('.');
            }

            let width = if is_tab {
                let tab_spacing = layout.tab_spacing.max(1);
                state.print_lonely_combining = true;
                tab_spacing - state.unwrapped_column % tab_spacing
            } else {
                state.print_lonely_combining = false;
                seq.units().iter().map(|unit| encoding.width(*unit)).sum()
            };

            if wrap && col + width > right_edge && col > 0 {
                *state = saved;
                return LineResult {
                    rows: 1,
                    paragraph_ended: false,
                    width: col,
                };
            }

            if let Some(row) = visible_row {
                self.draw(row, col, width, &seq, is_tab, attr);
            }

            col += width;
            state.unwrapped_column += width;

            if !wrap && col >= right_edge && !want_width {
                let eol = self.source().eol(state.offset);
                *state = FormatterState::new(eol);
                return LineResult {
                    rows: 1,
                    paragraph_ended: true,
                    width: col,
                };
            }
        }
    }

    /// Format rows until the paragraph ends, or, when drawing, until the
    /// bottom of the viewport. Returns the rows used.
    pub fn format_paragraph(&mut self, state: &mut FormatterState, row: Option<usize>) -> usize {
        let mut row = row.filter(|row| *row < self.layout.height);
        let mut lines = 0;
        loop {
            let line = self.format_line(state, row, false);
            lines += line.rows;
            if line.paragraph_ended {
                return lines;
            }
            if let Some(current) = row {
                if current + 1 >= self.layout.height {
                    return lines;
                }
                row = Some(current + 1);
            }
        }
    }

    fn draw(&mut self, row: usize, col: u64, width: u64, seq: &Sequence, is_tab: bool, attr: Attr) {
        let text_column = self.text_column();
        let right_edge = text_column + self.layout.width;
        let encoding = &self.layout.encoding;
        let Some(canvas) = self.canvas.as_deref_mut() else {
            return;
        };

        if col >= text_column && col + width <= right_edge {
            let x = (col - text_column) as usize;
            if is_tab {
                for i in 0..width as usize {
                    canvas.put(row, x + i, " ", 1, attr);
                }
            } else {
                let text: String = seq
                    .units()
                    .iter()
                    .map(|unit| encoding.display_char(*unit))
                    .collect();
                canvas.put(row, x, &text, width as usize, attr);
            }
        } else if col < text_column && col + width > text_column {
            let filler = if is_tab { " " } else { PARTIAL_WIDE_AT_LEFT_MARGIN };
            for i in text_column..(col + width).min(right_edge) {
                canvas.put(row, (i - text_column) as usize, filler, 1, attr);
            }
        } else if col < right_edge && col + width > right_edge {
            let filler = if is_tab { " " } else { PARTIAL_WIDE_AT_RIGHT_MARGIN };
            for i in col..right_edge {
                canvas.put(row, (i - text_column) as usize, filler, 1, attr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    use crate::canvas::Grid;
    use crate::dimensions::Dimensions;

    fn layout(wrap: bool, width: u64, height: usize) -> Layout {
        Layout {
            wrap,
            nroff: false,
            tab_spacing: 8,
            encoding: Encoding::Utf8,
            width,
            height,
            text_column: 0,
            force_max: None,
            highlight: 0..0,
        }
    }

    // Format paragraphs from the start of `bytes` until the screen is full or
    // the data ends.
    fn render(bytes: &[u8], layout: &Layout) -> Grid {
        let mut source = DataSource::string(bytes.to_vec());
        let mut grid = Grid::new(Dimensions {
            width: layout.width as usize,
            height: layout.height,
        });
        let mut formatter = Formatter::new(&mut source, layout, Some(&mut grid));
        let mut state = FormatterState::new(0);
        let mut row = 0;
        while row < layout.height {
            let rows = formatter.format_paragraph(&mut state, Some(row));
            if rows == 0 {
                break;
            }
            row += rows;
        }
        grid
    }

    #[test]
    fn test_wrapping() {
        let grid = render(b"hello world\nbye\n", &layout(true, 5, 5));
        assert_snapshot!(grid.render(), @r"
        |hello|
        | worl|
        |d    |
        |bye  |
        |     |
        ");
    }

    #[test]
    fn test_unwrapped_lines_are_cut() {
        let grid = render(b"hello world\nbye\n", &layout(false, 5, 3));
        assert_snapshot!(grid.render(), @r"
        |hello|
        |bye  |
        |     |
        ");
    }

    #[test]
    fn test_horizontal_scroll() {
        let mut layout = layout(false, 4, 2);
        layout.text_column = 3;
        let grid = render(b"hello world\nbye\n", &layout);
        assert_snapshot!(grid.render(), @r"
        |lo w|
        |    |
        ");
    }

    #[test]
    fn test_tabs() {
        let grid = render(b"a\tb\n\tc\nabcdefgh\ti\n", &layout(false, 12, 3));
        assert_snapshot!(grid.render(), @r"
        |a       b   |
        |        c   |
        |abcdefgh    |
        ");
    }

    #[test]
    fn test_carriage_returns() {
        let grid = render(b"ab\r\ncd\ref\n", &layout(true, 4, 4));
        assert_snapshot!(grid.render(), @r"
        |ab  |
        |cd  |
        |ef  |
        |    |
        ");
    }

    #[test]
    fn test_unprintable_and_invalid_bytes() {
        let grid = render(b"a\x01b\xffc\n", &layout(true, 6, 1));
        assert_snapshot!(grid.render(), @"|a.b.c |");
    }

    #[test]
    fn test_lonely_combining_mark() {
        let grid = render("\u{301}".as_bytes(), &layout(true, 3, 1));
        assert_eq!("\u{25CC}\u{301}", grid.text_at(0, 0));
        assert_eq!("", grid.text_at(0, 1));
    }

    #[test]
    fn test_combining_marks_join_their_base() {
        let grid = render("e\u{301}\u{302}x".as_bytes(), &layout(true, 3, 1));
        assert_eq!("e\u{301}\u{302}", grid.text_at(0, 0));
        assert_eq!("x", grid.text_at(0, 1));
    }

    #[test]
    fn test_mark_after_wide_character_is_dropped() {
        let grid = render("日\u{301}x".as_bytes(), &layout(true, 4, 1));
        assert_eq!("日", grid.text_at(0, 0));
        assert_eq!("x", grid.text_at(0, 2));
    }

    #[test]
    fn test_wide_characters() {
        // Wrapping never splits a wide character.
        let grid = render("ab日c".as_bytes(), &layout(true, 3, 2));
        assert_snapshot!(grid.render(), @r"
        |ab |
        |日c|
        ");

        // A wide character cut by the right edge becomes a blank.
        let grid = render("a日".as_bytes(), &layout(false, 2, 1));
        assert_snapshot!(grid.render(), @"|a |");

        // Same at the left edge.
        let mut scrolled = layout(false, 3, 1);
        scrolled.text_column = 1;
        let grid = render("日xy".as_bytes(), &scrolled);
        assert_snapshot!(grid.render(), @"| xy|");
    }

    #[test]
    fn test_nroff_attributes() {
        let mut layout = layout(true, 4, 1);
        layout.nroff = true;
        let grid = render(b"B\x08Bu_\x08x\n", &layout);
        assert_snapshot!(grid.render(), @"|Bux |");
        assert_snapshot!(grid.render_attrs(), @"B.U.");
    }

    #[test]
    fn test_search_highlight() {
        let mut layout = layout(true, 6, 1);
        layout.highlight = 2..4;
        let grid = render(b"abcdef", &layout);
        assert_snapshot!(grid.render_attrs(), @"..SS..");
    }

    #[test]
    fn test_force_max_acts_as_eof() {
        let mut source = DataSource::string(b"abcdef\n".to_vec());
        let mut layout = layout(true, 10, 1);
        layout.force_max = Some(3);
        let mut formatter = Formatter::new(&mut source, &layout, None);

        let mut state = FormatterState::new(0);
        let line = formatter.format_line(&mut state, None, false);
        assert_eq!(
            LineResult {
                rows: 1,
                paragraph_ended: true,
                width: 3
            },
            line
        );
        assert_eq!(3, state.offset);
    }

    #[test]
    fn test_state_resets_after_newline() {
        let mut source = DataSource::string(b"a\t\nb".to_vec());
        let layout = layout(true, 20, 1);
        let mut formatter = Formatter::new(&mut source, &layout, None);

        let mut state = FormatterState::new(0);
        state.nroff_underscore_is_underlined = true;
        let line = formatter.format_line(&mut state, None, false);
        assert!(line.paragraph_ended);
        assert_eq!(FormatterState::new(3), state);
    }

    #[test]
    fn test_paragraph_row_counts() {
        let mut source = DataSource::string(b"0123456789\n\nab".to_vec());
        let layout = layout(true, 4, 10);
        let mut formatter = Formatter::new(&mut source, &layout, None);

        let mut state = FormatterState::new(0);
        assert_eq!(3, formatter.format_paragraph(&mut state, None));
        assert_eq!(11, state.offset);
        // An empty paragraph still takes a row.
        assert_eq!(1, formatter.format_paragraph(&mut state, None));
        assert_eq!(1, formatter.format_paragraph(&mut state, None));
        assert_eq!(0, formatter.format_paragraph(&mut state, None));
    }

    #[test]
    fn test_unwrapped_measurement() {
        let mut source = DataSource::string(b"abcdefghij\nxy\n".to_vec());
        let layout = layout(false, 4, 10);
        let mut formatter = Formatter::new(&mut source, &layout, None);

        let mut state = FormatterState::new(0);
        let line = formatter.format_line(&mut state, None, true);
        assert_eq!(10, line.width);
        assert_eq!(11, state.offset);

        // Without a width request the rest of the line is skipped.
        let mut state = FormatterState::new(0);
        let line = formatter.format_line(&mut state, None, false);
        assert_eq!(1, line.rows);
        assert_eq!(11, state.offset);
    }

    #[test]
    fn test_wrapped_rows_reassemble_unwrapped_line() {
        let text = "The quick brown fox jumps over the lazy dog";
        for width in 1..=12 {
            let mut source = DataSource::string(text.as_bytes().to_vec());
            let layout = layout(true, width, 64);
            let mut grid = Grid::new(Dimensions {
                width: width as usize,
                height: 64,
            });
            let mut formatter = Formatter::new(&mut source, &layout, Some(&mut grid));
            let mut state = FormatterState::new(0);
            let rows = formatter.format_paragraph(&mut state, Some(0));

            // Every row but the last is full; the last is padded with blanks.
            let width = width as usize;
            let chars: Vec<char> = text.chars().collect();
            let expected: Vec<String> = chars
                .chunks(width)
                .map(|chunk| format!("{:<width$}", chunk.iter().collect::<String>()))
                .collect();
            let actual: Vec<String> = (0..rows).map(|row| grid.row_text(row)).collect();
            assert_eq!(expected, actual, "width {width}");
        }
    }
}
