//! Backspace overprinting, as produced by `nroff` and friends for terminals
//! that cannot do bold or underline: `X\bX` is a bold `X`, `_\bX` (or
//! `X\b_`) an underlined `X`.

use crate::canvas::Attr;
use crate::charset::Unit;
use crate::datasource::DataSource;
use crate::formatter::{CharReader, FormatterState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub unit: Unit,
    pub attr: Attr,
}

impl Decoded {
    fn plain(unit: Unit) -> Decoded {
        Decoded {
            unit,
            attr: Attr::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NroffDecoder {
    enabled: bool,
}

impl NroffDecoder {
    pub fn new(enabled: bool) -> NroffDecoder {
        NroffDecoder { enabled }
    }

    /// The next character, with an overprint sequence starting at
    /// `state.offset` collapsed into one attributed character. When the
    /// lookahead does not form a sequence only the first character is
    /// consumed.
    pub fn next(&self, reader: &mut CharReader<'_>, state: &mut FormatterState) -> Option<Decoded> {
        let first = reader.next_char(state)?;
        // CR, LF, TAB and other specials never take part in overprinting.
        if !self.enabled || !reader.encoding().is_print(first) {
            return Some(Decoded::plain(first));
        }

        let mut after = *state;
        match reader.next_char(&mut after) {
            Some(unit) if unit.is('\x08') => {}
            _ => return Some(Decoded::plain(first)),
        }
        let second = match reader.next_char(&mut after) {
            Some(unit) if reader.encoding().is_print(unit) => unit,
            _ => return Some(Decoded::plain(first)),
        };

        let decoded = if first.is('_') && second.is('_') {
            // Ambiguous; follow whatever the surrounding text was doing.
            let attr = if state.nroff_underscore_is_underlined {
                Attr::Underline
            } else {
                Attr::Bold
            };
            Decoded { unit: first, attr }
        } else if first == second {
            after.nroff_underscore_is_underlined = false;
            Decoded {
                unit: first,
                attr: Attr::Bold,
            }
        } else if first.is('_') {
            after.nroff_underscore_is_underlined = true;
            Decoded {
                unit: second,
                attr: Attr::Underline,
            }
        } else if second.is('_') {
            after.nroff_underscore_is_underlined = true;
            Decoded {
                unit: first,
                attr: Attr::Underline,
            }
        } else {
            return Some(Decoded::plain(first));
        };

        *state = after;
        Some(decoded)
    }
}

/// Whether the raw bytes at `offset` form a single-byte overprint sequence
/// that the decoder would collapse into one column.
pub fn is_overprint_at(source: &mut DataSource, offset: u64) -> bool {
    if source.get_byte(offset + 1) != Some(b'\x08') {
        return false;
    }
    let Some(first) = source.get_byte(offset).filter(|b| is_ascii_print(*b)) else {
        return false;
    };
    let Some(second) = source.get_byte(offset + 2).filter(|b| is_ascii_print(*b)) else {
        return false;
    };
    first == second || first == b'_' || second == b'_'
}

fn is_ascii_print(byte: u8) -> bool {
    (0x20..0x7f).contains(&byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::charset::Encoding;

    fn decode_all(bytes: &[u8], enabled: bool) -> Vec<(Unit, Attr, u64)> {
        let mut source = DataSource::string(bytes.to_vec());
        let encoding = Encoding::Utf8;
        let mut reader = CharReader::new(&mut source, &encoding, None);
        let decoder = NroffDecoder::new(enabled);

        let mut state = FormatterState::new(0);
        let mut out = vec![];
        while let Some(decoded) = decoder.next(&mut reader, &mut state) {
            out.push((decoded.unit, decoded.attr, state.offset));
        }
        out
    }

    #[test]
    fn test_bold_and_underline() {
        assert_eq!(
            vec![(Unit::Char('A'), Attr::Bold, 3)],
            decode_all(b"A\x08A", true)
        );
        assert_eq!(
            vec![(Unit::Char('A'), Attr::Underline, 3)],
            decode_all(b"_\x08A", true)
        );
        assert_eq!(
            vec![(Unit::Char('A'), Attr::Underline, 3)],
            decode_all(b"A\x08_", true)
        );
    }

    #[test]
    fn test_mismatch_consumes_one_character() {
        assert_eq!(
            vec![
                (Unit::Char('A'), Attr::Normal, 1),
                (Unit::Char('\x08'), Attr::Normal, 2),
                (Unit::Char('B'), Attr::Normal, 3),
            ],
            decode_all(b"A\x08B", true)
        );
    }

    #[test]
    fn test_disabled() {
        assert_eq!(3, decode_all(b"A\x08A", false).len());
    }

    #[test]
    fn test_underscore_overprint_follows_context() {
        // After an underline, `_\b_` is an underlined underscore.
        let decoded = decode_all(b"_\x08a_\x08_", true);
        assert_eq!(Attr::Underline, decoded[1].1);

        // After bold (or nothing), it is a bold one.
        let decoded = decode_all(b"a\x08a_\x08_", true);
        assert_eq!(Attr::Bold, decoded[1].1);
        let decoded = decode_all(b"_\x08_", true);
        assert_eq!(Attr::Bold, decoded[0].1);
    }

    #[test]
    fn test_no_overprint_around_specials() {
        let decoded = decode_all(b"\t\x08\t", true);
        assert_eq!(3, decoded.len());
    }

    #[test]
    fn test_is_overprint_at() {
        let mut source = DataSource::string(b"a\x08a_\x08bc\x08d".to_vec());
        assert!(is_overprint_at(&mut source, 0));
        assert!(!is_overprint_at(&mut source, 1));
        assert!(is_overprint_at(&mut source, 3));
        assert!(!is_overprint_at(&mut source, 6));
        assert!(!is_overprint_at(&mut source, 8));
    }
}
