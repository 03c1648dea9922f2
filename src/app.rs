use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::ops::ControlFlow;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::history::MemHistory;
use rustyline::Editor;
use termion::event::{Event as TermionEvent, Key, MouseButton, MouseEvent};
use tracing::{debug, warn};
use unicode_width::UnicodeWidthChar;

use crate::action::Action;
use crate::charset::Encoding;
use crate::dimensions::Dimensions;
use crate::search::{RegexMatcher, SearchOptions, SearchOutcome, SearchProgress};
use crate::terminal::{AnsiTerminal, TtyInterrupt};
use crate::view::View;

const MAX_BUFFER_SIZE: usize = 9;

// Lines per wheel notch when the wheel doesn't page.
const MOUSE_SCROLL_LINES: u64 = 3;

// Rows at the bottom of the terminal not used by the view.
pub const STATUS_ROWS: usize = 1;

pub struct App {
    view: View,
    name: String,
    // Buffered input for movement commands with counts, e.g. "3j".
    input_buffer: Vec<u8>,
    readline_editor: Editor<(), MemHistory>,
    dimensions: Dimensions,
    stdout: Box<dyn std::io::Write>,
    last_search: Option<LastSearch>,
    // Shown in place of the status line until the next action.
    message: Option<String>,
    interrupt: Option<Rc<RefCell<TtyInterrupt>>>,
}

struct LastSearch {
    pattern: String,
    backwards: bool,
}

pub struct Break;

impl App {
    pub fn new(
        view: View,
        name: String,
        readline_editor: Editor<(), MemHistory>,
        dimensions: Dimensions,
        stdout: Box<dyn std::io::Write>,
    ) -> Self {
        App {
            view,
            name,
            input_buffer: vec![],
            readline_editor,
            dimensions,
            stdout,
            last_search: None,
            message: None,
            interrupt: None,
        }
    }

    /// Let Esc or Ctrl-C cancel searches and waiting for piped input.
    pub fn watch_for_interrupts(&mut self, interrupt: TtyInterrupt) {
        let interrupt = Rc::new(RefCell::new(interrupt));
        let check = Rc::clone(&interrupt);
        self.view.set_interrupt_check(move || check.borrow_mut().check());
        self.interrupt = Some(interrupt);
    }

    pub fn handle_tty_event(&mut self, tty_event: TermionEvent) -> Option<Break> {
        let action = match tty_event {
            TermionEvent::Unsupported(_) => None,
            TermionEvent::Mouse(mouse_event) => self.mouse_action(mouse_event),
            TermionEvent::Key(key_event) => match key_event {
                Key::Char('q') | Key::Ctrl('c') => {
                    // Immediately return; we are quitting the program.
                    return Some(Break);
                }
                Key::Char(ch @ '0'..='9') => {
                    if ch == '0' && self.input_buffer.is_empty() {
                        Some(Action::MoveToBol)
                    } else {
                        self.buffer_input(ch as u8);
                        None
                    }
                }
                Key::Char(ch @ ('/' | '?')) => {
                    self.input_buffer.clear();
                    self.prompt_search(ch == '?');
                    None
                }
                Key::Char(ch @ ('n' | 'N')) => {
                    self.input_buffer.clear();
                    self.repeat_search(ch == 'N');
                    None
                }
                Key::Char('E') => {
                    self.input_buffer.clear();
                    let next = if self.view.encoding().is_utf8() {
                        Encoding::latin1()
                    } else {
                        Encoding::Utf8
                    };
                    Some(Action::SetEncoding(next))
                }
                // These inputs always clear [input_buffer]. (Some of them may use it.)
                _ => {
                    let count = self.try_parse_input_buffer_as_number();
                    key_action(key_event, count)
                }
            },
        };

        if let Some(action) = action {
            debug!(target: "app", ?action, "action");
            self.message = None;
            // Reading a pipe to the end may take a while.
            let slow = matches!(action, Action::MoveToBottom);
            self.arm_interrupts(slow);
            self.view.do_action(action);
            self.arm_interrupts(false);
        }

        self.draw_screen();
        None
    }

    // Only armed while handling a tty event: the tty thread waits for us
    // then, so polling the terminal cannot steal its input.
    fn arm_interrupts(&mut self, armed: bool) {
        if let Some(interrupt) = &self.interrupt {
            interrupt.borrow_mut().set_armed(armed);
        }
    }

    pub fn handle_tty_input_error(&mut self, io_error: io::Error) {
        warn!(target: "app", error = %io_error, "tty input error");
        self.message = Some(format!("TTY input error: {io_error}"));
        self.draw_screen();
    }

    pub fn handle_window_resize(&mut self, new_dimensions: Dimensions) {
        self.dimensions = new_dimensions;
        self.view.resize(new_dimensions.without_rows(STATUS_ROWS));
        self.draw_screen();
    }

    /// More input arrived from a pipe.
    pub fn handle_data_available(&mut self) {
        self.draw_screen();
    }

    fn mouse_action(&self, mouse_event: MouseEvent) -> Option<Action> {
        let pages = self.view.config().mouse_move_pages;
        match mouse_event {
            MouseEvent::Press(MouseButton::WheelUp, _, _) if pages => Some(Action::PageUp),
            MouseEvent::Press(MouseButton::WheelDown, _, _) if pages => Some(Action::PageDown),
            MouseEvent::Press(MouseButton::WheelUp, _, _) => {
                Some(Action::MoveUp(MOUSE_SCROLL_LINES))
            }
            MouseEvent::Press(MouseButton::WheelDown, _, _) => {
                Some(Action::MoveDown(MOUSE_SCROLL_LINES))
            }
            _ => None,
        }
    }

    fn buffer_input(&mut self, ch: u8) {
        // Don't buffer leading 0s.
        if self.input_buffer.is_empty() && ch == b'0' {
            return;
        }

        if self.input_buffer.len() >= MAX_BUFFER_SIZE {
            self.input_buffer.rotate_left(1);
            self.input_buffer.pop();
        }

        self.input_buffer.push(ch);
    }

    fn try_parse_input_buffer_as_number(&mut self) -> Option<u64> {
        let n = std::str::from_utf8(&self.input_buffer)
            .ok()
            .and_then(|digits| digits.parse::<u64>().ok());
        self.input_buffer.clear();
        n
    }

    fn status_row(&self) -> u16 {
        u16::try_from(self.dimensions.height)
            .unwrap_or(u16::MAX)
            .max(1)
    }

    fn prompt_search(&mut self, backwards: bool) {
        let prompt = if backwards { "?" } else { "/" };
        let status_row = self.status_row();
        let _ = write!(
            self.stdout,
            "{}{}{}",
            termion::cursor::Goto(1, status_row),
            termion::clear::CurrentLine,
            termion::cursor::Show
        );
        let _ = self.stdout.flush();
        let result = self.readline_editor.readline(prompt);
        let _ = write!(self.stdout, "{}", termion::cursor::Hide);

        match result {
            Ok(pattern) => {
                // An empty pattern repeats the last one in the new direction.
                if !pattern.is_empty() {
                    let _ = self.readline_editor.add_history_entry(pattern.as_str());
                    self.last_search = Some(LastSearch { pattern, backwards });
                } else if let Some(last) = &mut self.last_search {
                    last.backwards = backwards;
                }
                self.repeat_search(false);
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {}
            Err(err) => {
                warn!(target: "app", error = %err, "readline failed");
                self.message = Some(format!("Input error: {err}"));
            }
        }
    }

    fn repeat_search(&mut self, reverse: bool) {
        let Some(last) = &self.last_search else {
            self.message = Some("No previous search".to_string());
            return;
        };

        // Smart case: only case sensitive when the pattern has capitals.
        let case_sensitive = last.pattern.chars().any(char::is_uppercase);
        let mut matcher = match RegexMatcher::new(&last.pattern, case_sensitive) {
            Ok(matcher) => matcher,
            Err(err) => {
                self.message = Some(err.to_string());
                return;
            }
        };
        let options = SearchOptions {
            backwards: last.backwards != reverse,
            wrap_around: true,
        };

        let status_row = self.status_row();
        self.arm_interrupts(true);
        let interrupt = self.interrupt.clone();
        let stdout = &mut self.stdout;
        let outcome = self.view.search(
            &mut matcher,
            options,
            &mut |progress: SearchProgress| {
                let percent = progress
                    .percent
                    .map_or_else(String::new, |percent| format!(" {percent}%"));
                let _ = write!(
                    stdout,
                    "{}{}Searching...{percent}",
                    termion::cursor::Goto(1, status_row),
                    termion::clear::CurrentLine,
                );
                let _ = stdout.flush();
                match &interrupt {
                    Some(interrupt) if interrupt.borrow_mut().check() => ControlFlow::Break(()),
                    _ => ControlFlow::Continue(()),
                }
            },
        );

        self.arm_interrupts(false);

        self.message = match outcome {
            SearchOutcome::Found(_) => None,
            SearchOutcome::NotFound => Some("Pattern not found".to_string()),
            SearchOutcome::Aborted => Some("Search cancelled".to_string()),
        };
    }

    fn status_line(&mut self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }

        let position = self.view.current_position();
        let percent = match position.percent {
            Some(percent) => format!("{percent}%"),
            None => format!("{} bytes so far", self.view.filesize()),
        };
        let config = self.view.config();
        let mut modes = vec![];
        if config.wrap {
            modes.push("wrap");
        }
        if config.nroff {
            modes.push("nroff");
        }
        modes.push(self.view.encoding().name());

        format!(
            "{}  Line {}  Col {}  {}  [{}]",
            self.name,
            position.line + 1,
            position.column,
            percent,
            modes.join(" ")
        )
    }

    pub fn draw_screen(&mut self) {
        let mut terminal = AnsiTerminal::new(String::new());
        self.view.render(&mut terminal);

        if let Some(err) = self.view.take_error() {
            warn!(target: "app", error = %err, "input read failed");
            self.message = Some(format!("Error reading input: {err}"));
        }

        let status = fit_to_width(&self.status_line(), self.dimensions.width);
        let _ = terminal.position_cursor(1, self.status_row());
        let _ = terminal.set_inverted(true);
        let _ = write!(terminal, "{status}");
        let _ = terminal.reset_style();

        let _ = terminal.position_cursor(1, 1);
        let _ = terminal.flush_contents(&mut self.stdout);
    }
}

fn key_action(key: Key, count: Option<u64>) -> Option<Action> {
    let count_or_1 = count.unwrap_or(1);
    match key {
        Key::Char('j') | Key::Char('\n') | Key::Down | Key::Ctrl('e') => {
            Some(Action::MoveDown(count_or_1))
        }
        Key::Char('k') | Key::Up | Key::Ctrl('y') => Some(Action::MoveUp(count_or_1)),
        Key::Char(' ') | Key::Char('f') | Key::PageDown | Key::Ctrl('f') => {
            Some(Action::PageDown)
        }
        Key::Char('b') | Key::PageUp | Key::Ctrl('b') => Some(Action::PageUp),
        Key::Char('d') | Key::Ctrl('d') => Some(Action::HalfPageDown),
        Key::Char('u') | Key::Ctrl('u') => Some(Action::HalfPageUp),
        Key::Char('h') | Key::Left => Some(Action::MoveLeft(count_or_1)),
        Key::Char('l') | Key::Right => Some(Action::MoveRight(count_or_1)),
        Key::Char('$') => Some(Action::MoveToEol),
        Key::Char('g') | Key::Home | Key::Char('G') | Key::End if count.is_some() => {
            Some(Action::MoveToLine(count_or_1.saturating_sub(1)))
        }
        Key::Char('g') | Key::Home => Some(Action::MoveToTop),
        Key::Char('G') | Key::End => Some(Action::MoveToBottom),
        Key::Char('W') => Some(Action::ToggleWrap),
        Key::Char('R') => Some(Action::ToggleNroff),
        _ => None,
    }
}

// Cut or pad `text` to exactly `width` columns.
fn fit_to_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if used + ch_width > width {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out.extend(std::iter::repeat(' ').take(width - used));
    out
}
