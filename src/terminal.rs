use std::fmt::{self, Write};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use termion::{clear, cursor, style};
use tracing::debug;

use crate::canvas::{Attr, Canvas};

/// Collects a frame of terminal output in a buffer so it can be written in
/// one go.
pub struct AnsiTerminal {
    pub output: String,
}

impl AnsiTerminal {
    pub fn new(output: String) -> Self {
        AnsiTerminal { output }
    }

    pub fn clear_screen(&mut self) -> fmt::Result {
        write!(self.output, "{}", clear::All)
    }

    /// 1-based, like the escape sequence.
    pub fn position_cursor(&mut self, col: u16, row: u16) -> fmt::Result {
        write!(self.output, "{}", cursor::Goto(col, row))
    }

    pub fn reset_style(&mut self) -> fmt::Result {
        write!(self.output, "{}", style::Reset)
    }

    pub fn set_inverted(&mut self, inverted: bool) -> fmt::Result {
        if inverted {
            write!(self.output, "{}", style::Invert)
        } else {
            write!(self.output, "{}", style::NoInvert)
        }
    }

    pub fn set_attr(&mut self, attr: Attr) -> fmt::Result {
        match attr {
            Attr::Normal => Ok(()),
            Attr::Bold => write!(self.output, "{}", style::Bold),
            Attr::Underline => write!(self.output, "{}", style::Underline),
            Attr::Selected => write!(self.output, "{}", style::Invert),
        }
    }

    pub fn flush_contents<W: io::Write + ?Sized>(&mut self, out: &mut W) -> io::Result<()> {
        out.write_all(self.output.as_bytes())?;
        self.output.clear();
        out.flush()
    }
}

impl Write for AnsiTerminal {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.output.write_str(s)
    }
}

impl Canvas for AnsiTerminal {
    fn clear(&mut self) {
        // Anything buffered belongs to a frame that is being redrawn.
        self.output.clear();
        let _ = self.clear_screen();
    }

    fn put(&mut self, row: usize, col: usize, text: &str, _width: usize, attr: Attr) {
        let (Ok(col), Ok(row)) = (u16::try_from(col + 1), u16::try_from(row + 1)) else {
            return;
        };
        let _ = self.position_cursor(col, row);
        let _ = self.set_attr(attr);
        let _ = self.write_str(text);
        if attr != Attr::Normal {
            let _ = self.reset_style();
        }
    }
}

/// Notices Esc or Ctrl-C typed while a long operation (a search, reading a
/// pipe to the end) keeps the app from handling input. It only looks at the
/// terminal while armed, and must only be armed while nothing else reads
/// the terminal: whatever else was typed meanwhile is dropped.
pub struct TtyInterrupt {
    tty: File,
    armed: bool,
}

impl TtyInterrupt {
    pub fn open() -> io::Result<TtyInterrupt> {
        Ok(TtyInterrupt {
            tty: termion::get_tty()?,
            armed: false,
        })
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
    }

    /// Drain pending input without blocking; true if it held an interrupt.
    pub fn check(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        let mut interrupted = false;
        loop {
            let ready = {
                let mut fds = [PollFd::new(self.tty.as_fd(), PollFlags::POLLIN)];
                poll(&mut fds, PollTimeout::ZERO)
            };
            if !matches!(ready, Ok(n) if n > 0) {
                break;
            }

            let mut buf = [0; 64];
            match self.tty.read(&mut buf) {
                Ok(n) if n > 0 => interrupted |= has_interrupt_key(&buf[..n]),
                _ => break,
            }
        }
        if interrupted {
            debug!(target: "app", "interrupted from the keyboard");
        }
        interrupted
    }
}

// Ctrl-C, or an Esc that does not start an escape sequence (arrow keys and
// mouse reports begin with one).
fn has_interrupt_key(bytes: &[u8]) -> bool {
    bytes.iter().enumerate().any(|(i, byte)| match byte {
        0x03 => true,
        0x1b => !matches!(bytes.get(i + 1), Some(b'[' | b'O')),
        _ => false,
    })
}
