use std::fmt;
use std::sync::Arc;

use unicode_normalization::char::is_combining_mark;
use unicode_width::UnicodeWidthChar;

/// One decoded unit of input: either a character, or a single byte that
/// could not be decoded in the current encoding.
///
/// Invalid bytes are reported one at a time so that formatting always makes
/// forward progress over garbled input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Char(char),
    Invalid(u8),
}

impl Unit {
    pub fn is(self, ch: char) -> bool {
        self == Unit::Char(ch)
    }

    /// The character handed to a matcher: invalid bytes never match text.
    pub fn to_char_lossy(self) -> char {
        match self {
            Unit::Char(ch) => ch,
            Unit::Invalid(_) => char::REPLACEMENT_CHARACTER,
        }
    }
}

/// A single-byte codepage: a byte to character mapping supplied by whoever
/// loads charset tables.
#[derive(PartialEq, Eq)]
pub struct Codepage {
    name: String,
    table: [char; 256],
}

impl Codepage {
    pub fn new(name: impl Into<String>, table: [char; 256]) -> Codepage {
        Codepage {
            name: name.into(),
            table,
        }
    }

    pub fn from_fn(name: impl Into<String>, decode: impl Fn(u8) -> char) -> Codepage {
        let mut table = ['\0'; 256];
        for (byte, slot) in table.iter_mut().enumerate() {
            *slot = decode(byte as u8);
        }
        Codepage::new(name, table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decode(&self, byte: u8) -> char {
        self.table[byte as usize]
    }
}

impl fmt::Debug for Codepage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codepage").field("name", &self.name).finish()
    }
}

/// How bytes are turned into characters, and how those characters are
/// classified for layout.
///
/// In single-byte encodings there are no combining marks and every character
/// occupies exactly one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    SingleByte(Arc<Codepage>),
}

impl Encoding {
    pub fn latin1() -> Encoding {
        Encoding::SingleByte(Arc::new(Codepage::from_fn("latin1", char::from)))
    }

    pub fn is_utf8(&self) -> bool {
        matches!(self, Encoding::Utf8)
    }

    pub fn name(&self) -> &str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::SingleByte(codepage) => codepage.name(),
        }
    }

    pub fn is_print(&self, unit: Unit) -> bool {
        match unit {
            Unit::Char(ch) => is_printable_char(ch),
            Unit::Invalid(_) => false,
        }
    }

    pub fn is_mark(&self, unit: Unit) -> bool {
        match (self, unit) {
            (Encoding::Utf8, Unit::Char(ch)) => is_combining_mark(ch),
            _ => false,
        }
    }

    /// A mark that takes no column of its own (general categories Mn and Me).
    pub fn is_non_spacing_mark(&self, unit: Unit) -> bool {
        self.is_mark(unit) && self.width(unit) == 0
    }

    /// A mark that widens its base (general category Mc).
    pub fn is_spacing_mark(&self, unit: Unit) -> bool {
        self.is_mark(unit) && self.width(unit) > 0
    }

    pub fn width(&self, unit: Unit) -> u64 {
        match (self, unit) {
            (Encoding::Utf8, Unit::Char(ch)) => match ch.width() {
                Some(0) => 0,
                Some(2) => 2,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// The glyph drawn for a unit; anything unprintable shows as `.`.
    pub fn display_char(&self, unit: Unit) -> char {
        match unit {
            Unit::Char(ch) if is_printable_char(ch) => ch,
            _ => '.',
        }
    }
}

fn is_printable_char(ch: char) -> bool {
    if ch.is_control() {
        return false;
    }
    // Invisible format characters (Cf).
    !matches!(
        ch,
        '\u{AD}'
            | '\u{600}'..='\u{605}'
            | '\u{61C}'
            | '\u{6DD}'
            | '\u{70F}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
    )
}
