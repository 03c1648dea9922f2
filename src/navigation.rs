//! Scrolling. Everything here moves `top_offset` and `skip_lines`; the next
//! render works out the rest.
//!
//! Moving down is easy: the row below the screen is formatted from the
//! bottom anchor. The formatter cannot run backwards, so moving up finds the
//! start of the previous paragraph by scanning for a line terminator and
//! formats forward from there to learn how many rows it takes.

use tracing::{debug, trace};

use crate::formatter::{Formatter, FormatterState};
use crate::growbuf::{Wait, PRODUCER_WAIT};
use crate::view::View;

/// How far back to look for the start of a paragraph when scrolling up in
/// wrap mode. A paragraph longer than this is formatted from this far back
/// instead, so the rows shown above the old top may be broken at slightly
/// different points than they would be from the true paragraph start.
pub const MAX_BACKWARDS_WALK_IN_PARAGRAPH: u64 = 100_000;

impl View {
    pub fn move_down(&mut self, lines: u64) {
        self.move_down_rows(lines);
        self.movement_fixups(true);
    }

    pub fn move_up(&mut self, lines: u64) {
        self.move_up_rows(lines);
        self.movement_fixups(true);
    }

    pub fn page_down(&mut self) {
        self.move_down(self.dimensions.height as u64);
    }

    pub fn page_up(&mut self) {
        self.move_up(self.dimensions.height as u64);
    }

    fn move_down_rows(&mut self, lines: u64) {
        self.refresh();
        let layout = self.layout();
        let mut formatter = Formatter::new(&mut self.source, &layout, None);

        for _ in 0..lines {
            if formatter.format_line(&mut self.bottom_state, None, false).rows == 0 {
                break;
            }
            if !layout.wrap {
                self.top_offset = formatter.source().eol(self.top_offset);
                self.skip_lines = 0;
                self.wrap_dirty = true;
            } else if formatter
                .format_line(&mut self.top_state, None, false)
                .paragraph_ended
            {
                self.top_offset = self.top_state.offset;
                self.skip_lines = 0;
            } else {
                self.skip_lines += 1;
            }
        }
        trace!(target: "view", top = self.top_offset, skip = self.skip_lines, "moved down");
    }

    /// Scroll up without touching the search state. Also used by rendering
    /// to fill a screen that ran out of data.
    pub(crate) fn move_up_rows(&mut self, lines: u64) {
        self.bottom_stale = true;

        if !self.config.wrap {
            for _ in 0..lines {
                if self.top_offset == 0 {
                    break;
                }
                self.top_offset = self.source.bol(self.top_offset - 1, 0);
            }
            self.skip_lines = 0;
            self.wrap_dirty = true;
            return;
        }

        self.wrap_fixup();
        let mut lines = lines;
        while lines > self.skip_lines {
            if self.top_offset == 0 {
                self.skip_lines = 0;
                self.top_state = FormatterState::new(0);
                return;
            }
            lines -= self.skip_lines;

            // Measure the previous paragraph as if the data ended where the
            // current one starts.
            let mut layout = self.layout();
            layout.force_max = Some(self.top_offset);
            let limit = self
                .top_offset
                .saturating_sub(MAX_BACKWARDS_WALK_IN_PARAGRAPH);
            self.top_offset = self.source.bol(self.top_offset - 1, limit);
            if self.top_offset == limit && limit > 0 {
                trace!(target: "view", limit, "no paragraph start within reach, formatting from limit");
            }

            let mut state = FormatterState::new(self.top_offset);
            let mut formatter = Formatter::new(&mut self.source, &layout, None);
            self.skip_lines = formatter.format_paragraph(&mut state, None) as u64;
        }

        self.top_state = FormatterState::new(self.top_offset);
        self.skip_lines -= lines;
        let layout = self.layout();
        let mut formatter = Formatter::new(&mut self.source, &layout, None);
        for _ in 0..self.skip_lines {
            formatter.format_line(&mut self.top_state, None, false);
        }
        self.wrap_dirty = false;
        trace!(target: "view", top = self.top_offset, skip = self.skip_lines, "moved up");
    }

    pub fn move_left(&mut self, columns: u64) {
        if !self.config.wrap {
            self.text_column = self.text_column.saturating_sub(columns);
        }
        self.movement_fixups(false);
    }

    pub fn move_right(&mut self, columns: u64) {
        if !self.config.wrap {
            self.text_column += columns;
        }
        self.movement_fixups(false);
    }

    pub fn move_to_top(&mut self) {
        self.top_offset = 0;
        self.skip_lines = 0;
        self.top_state = FormatterState::new(0);
        self.text_column = 0;
        self.wrap_dirty = false;
        self.bottom_stale = true;
        self.movement_fixups(true);
    }

    /// Show the last screenful, reading a pipe to the end first.
    pub fn move_to_bottom(&mut self) {
        self.source.update_filesize();
        self.read_to_end();
        self.top_offset = self.source.filesize();
        self.skip_lines = 0;
        self.wrap_dirty = true;
        self.move_up(self.dimensions.height as u64);
    }

    // Pull a pipe to EOF. Waiting for a slow producer can be interrupted,
    // leaving whatever has arrived so far.
    fn read_to_end(&mut self) {
        loop {
            self.source.read_all();
            if !self.source.may_still_grow() {
                return;
            }
            if self.source.wait_for_data(PRODUCER_WAIT) == Wait::Unsupported {
                return;
            }
            if (self.interrupted)() {
                debug!(target: "view", filesize = self.source.filesize(), "reading to the end interrupted");
                return;
            }
        }
    }

    pub fn move_to_bol(&mut self) {
        if !self.config.wrap {
            self.text_column = 0;
        }
        self.movement_fixups(false);
    }

    /// Scroll sideways so the end of the top line is at the right edge.
    pub fn move_to_eol(&mut self) {
        if !self.config.wrap {
            let layout = self.layout();
            let mut state = FormatterState::new(self.top_offset);
            let mut formatter = Formatter::new(&mut self.source, &layout, None);
            let width = formatter.format_line(&mut state, None, true).width;
            self.text_column = width.saturating_sub(layout.width);
        }
        self.movement_fixups(false);
    }

    /// Put the paragraph holding `offset` at the top of the screen.
    pub fn move_to_offset(&mut self, offset: u64) {
        self.jump_to(offset);
        self.movement_fixups(true);
    }

    /// Go to a 0-based (line, column).
    pub fn move_to(&mut self, line: u64, column: u64) {
        let offset = self.coord_to_offset(line, column);
        self.move_to_offset(offset);
    }

    /// Bring the current search match into view.
    pub fn move_to_match(&mut self) {
        self.jump_to(self.search_span.start);
        self.movement_fixups(false);
    }

    fn jump_to(&mut self, offset: u64) {
        self.top_offset = self.source.bol(offset, 0);
        self.skip_lines = 0;
        self.wrap_dirty = true;
        self.bottom_stale = true;
    }

    // After a move, the next search starts from the top of the screen.
    fn movement_fixups(&mut self, reset_search: bool) {
        if reset_search {
            self.search_span = self.top_offset..self.top_offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::{allow_duplicates, assert_snapshot};

    use super::*;
    use crate::action::Action;
    use crate::dimensions::Dimensions;
    use crate::view::tests::{screen, view};

    #[test]
    fn test_move_to_line_and_back_up() {
        let mut view = view("abc\ndef\nghi\n", false, 10, 2);
        view.move_to(1, 0);
        assert_eq!(4, view.current_position().offset);
        view.move_up(1);
        assert_eq!(0, view.current_position().offset);
    }

    #[test]
    fn test_unwrapped_move_down_stops_at_last_screen() {
        let mut view = view("a\nb\nc\n", false, 4, 2);
        view.move_down(5);
        assert_snapshot!(screen(&mut view), @r"
        |b   |
        |c   |
        ");
        assert_eq!(2, view.current_position().offset);
    }

    #[test]
    fn test_wrapped_scrolling() {
        let mut view = view("aaaaaaaaaa\nbb\n", true, 4, 2);
        assert_snapshot!(screen(&mut view), @r"
        |aaaa|
        |aaaa|
        ");

        view.move_down(1);
        assert_snapshot!(screen(&mut view), @r"
        |aaaa|
        |aa  |
        ");

        view.move_down(1);
        assert_snapshot!(screen(&mut view), @r"
        |aa  |
        |bb  |
        ");
        assert_eq!(8, view.current_position().offset);

        // Already showing the last row.
        view.move_down(1);
        assert_eq!(8, view.current_position().offset);

        view.move_up(1);
        assert_snapshot!(screen(&mut view), @r"
        |aaaa|
        |aa  |
        ");

        view.move_up(5);
        assert_snapshot!(screen(&mut view), @r"
        |aaaa|
        |aaaa|
        ");
        assert_eq!(0, view.current_position().offset);
    }

    #[test]
    fn test_move_up_into_previous_paragraph() {
        let mut view = view("aaaaaaaaaa\nbb\n", true, 4, 2);
        view.move_to_offset(11);
        view.move_up(2);
        assert_snapshot!(screen(&mut view), @r"
        |aaaa|
        |aa  |
        ");
        let position = view.current_position();
        assert_eq!((4, 0, 4), (position.offset, position.line, position.column));
    }

    #[test]
    fn test_move_to_bottom_wrapped() {
        let mut view = view("aaaaaaaaaa\nbb\n", true, 4, 2);
        view.move_to_bottom();
        assert_snapshot!(screen(&mut view), @r"
        |aa  |
        |bb  |
        ");
        assert_eq!(8, view.current_position().offset);
        assert_eq!(Some(100), view.current_position().percent);

        view.move_to_top();
        assert_eq!(0, view.current_position().offset);
    }

    #[test]
    fn test_horizontal_scrolling() {
        let mut view = view("0123456789abcdef\nxy\n", false, 6, 2);
        view.move_right(4);
        assert_snapshot!(screen(&mut view), @r"
        |456789|
        |      |
        ");
        assert_eq!(4, view.current_position().column);

        view.move_to_eol();
        assert_snapshot!(screen(&mut view), @r"
        |abcdef|
        |      |
        ");

        view.move_left(20);
        assert_eq!(0, view.current_position().column);

        view.move_right(3);
        view.move_to_bol();
        assert_snapshot!(screen(&mut view), @r"
        |012345|
        |xy    |
        ");
    }

    #[test]
    fn test_horizontal_scrolling_ignored_when_wrapping() {
        let mut view = view("0123456789\n", true, 6, 2);
        view.move_right(4);
        view.move_to_eol();
        assert_snapshot!(screen(&mut view), @r"
        |012345|
        |6789  |
        ");
    }

    #[test]
    fn test_short_tail_scrolls_back_to_fill_screen() {
        allow_duplicates! {
            for wrap in [false, true] {
                let mut view = view("a\nb\nc\nd\n", wrap, 4, 3);
                view.move_to_offset(6);
                assert_snapshot!(screen(&mut view), @r"
                |b   |
                |c   |
                |d   |
                ");
                assert_eq!(2, view.current_position().offset);
            }
        }
    }

    #[test]
    fn test_resize_keeps_rows_scrolled_off() {
        let mut view = view("0123456789\n", true, 4, 1);
        view.move_down(2);
        assert_snapshot!(screen(&mut view), @"|89  |");

        // At width 5 the paragraph only has two rows; stay on the last one.
        view.resize(Dimensions {
            width: 5,
            height: 1,
        });
        assert_snapshot!(screen(&mut view), @"|56789|");
    }

    #[test]
    fn test_long_paragraph_backward_walk_is_bounded() {
        let len = MAX_BACKWARDS_WALK_IN_PARAGRAPH + 5;
        let text = "x".repeat(len as usize) + "\nend\n";
        let mut view = view(&text, true, 10, 2);

        // Only "end" fits below the jump target, so the screen is filled from
        // above. The paragraph is formatted from the lookback limit rather
        // than its true start, so its last row is cut from there.
        view.move_to_offset(len + 1);
        assert_snapshot!(screen(&mut view), @r"
        |xxxxxxxxx |
        |end       |
        ");
        assert_eq!(len - 9, view.current_position().offset);

        view.move_up(1);
        assert_snapshot!(screen(&mut view), @r"
        |xxxxxxxxxx|
        |xxxxxxxxx |
        ");
        assert_eq!(len - 19, view.current_position().offset);
    }

    #[test]
    fn test_search_anchor_follows_movement() {
        let mut view = view("a\nb\nc\nd\n", false, 4, 2);
        view.search_span = 2..3;
        view.move_right(1);
        assert_eq!(2..3, view.search_span());
        view.move_down(1);
        assert_eq!(2..2, view.search_span());
    }

    #[test]
    fn test_actions() {
        let mut view = view("1\n2\n3\n4\n5\n6\n", false, 4, 2);
        view.do_action(Action::PageDown);
        assert_snapshot!(screen(&mut view), @r"
        |3   |
        |4   |
        ");
        view.do_action(Action::MoveDown(1));
        view.do_action(Action::PageUp);
        assert_snapshot!(screen(&mut view), @r"
        |2   |
        |3   |
        ");
        view.do_action(Action::MoveToLine(4));
        assert_eq!(8, view.current_position().offset);
        view.do_action(Action::MoveToBottom);
        assert_eq!(8, view.current_position().offset);
        view.do_action(Action::MoveToTop);
        assert_eq!(0, view.current_position().offset);
    }
}
