//! A sparse, sorted map between byte offsets and (line, column) positions.
//!
//! Lines here are paragraphs and columns are unwrapped columns, so entries
//! stay valid across wrap-mode and width changes. Each entry also carries the
//! column the position has when overprint sequences are collapsed, which is
//! what the user sees in nroff mode.

use tracing::{debug, trace};

use crate::datasource::DataSource;
use crate::nroff::is_overprint_at;

/// Furthest a single lookup step walks past the last cached entry before it
/// records a new one.
pub const COORD_CACHE_GRANULARITY: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordEntry {
    pub offset: u64,
    pub line: u64,
    pub column: u64,
    pub nroff_column: u64,
}

/// Which part of a `CoordEntry` a lookup resolves. The other part is the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Find the offset of a (line, column).
    Offset,
    /// Find the (line, column) of an offset.
    LineColumn,
}

/// How columns are counted while walking bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRules {
    pub nroff: bool,
    pub tab_spacing: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NroffState {
    Start,
    // On the `\b` of an overprint sequence.
    Backspace,
    // On the character after the `\b`.
    Continuation,
}

pub struct CoordCache {
    entries: Vec<CoordEntry>,
}

impl Default for CoordCache {
    fn default() -> Self {
        CoordCache::new()
    }
}

impl CoordCache {
    pub fn new() -> CoordCache {
        CoordCache {
            entries: vec![CoordEntry::default()],
        }
    }

    pub fn reset(&mut self) {
        debug!(target: "coord_cache", entries = self.entries.len(), "coord cache reset");
        self.entries.clear();
        self.entries.push(CoordEntry::default());
    }

    pub fn entries(&self) -> &[CoordEntry] {
        &self.entries
    }

    fn less(a: &CoordEntry, b: &CoordEntry, key: Lookup, rules: ColumnRules) -> bool {
        match key {
            // Resolving an offset: entries are keyed by position.
            Lookup::Offset if rules.nroff => {
                (a.line, a.nroff_column) < (b.line, b.nroff_column)
            }
            Lookup::Offset => (a.line, a.column) < (b.line, b.column),
            Lookup::LineColumn => a.offset < b.offset,
        }
    }

    // Index of the last entry that does not come after `coord`.
    fn find(&self, coord: &CoordEntry, want: Lookup, rules: ColumnRules) -> usize {
        let mut base = 0;
        let mut limit = self.entries.len();
        while limit > 1 {
            let i = base + limit / 2;
            if !Self::less(coord, &self.entries[i], want, rules) {
                base = i;
            }
            limit = (limit + 1) / 2;
        }
        base
    }

    fn push(&mut self, entry: CoordEntry) {
        if let Some(last) = self.entries.last() {
            debug_assert!(
                last.offset < entry.offset && last.line <= entry.line,
                "coord cache entries out of order: {last:?} then {entry:?}"
            );
        }
        trace!(target: "coord_cache", ?entry, "new entry");
        self.entries.push(entry);
    }

    /// Fill in the part of `coord` named by `want` from the other part,
    /// walking forward from the nearest cached entry and caching new entries
    /// as the walk goes. `interrupted` is polled between walk steps; when it
    /// returns true the result is wherever the walk got to.
    pub fn lookup(
        &mut self,
        source: &mut DataSource,
        rules: ColumnRules,
        coord: &mut CoordEntry,
        want: Lookup,
        interrupted: &mut dyn FnMut() -> bool,
    ) {
        let tab = rules.tab_spacing.max(1);

        loop {
            let i = self.find(coord, want, rules);
            let mut current = self.entries[i];
            let limit = match self.entries.get(i + 1) {
                Some(next) => next.offset,
                None => current.offset + COORD_CACHE_GRANULARITY,
            };

            let mut entry = current;
            let mut nroff_state = NroffState::Start;
            let at_tail = i + 1 == self.entries.len();

            // Past the last entry, keep going until there is something to
            // cache: a long run of `\r` or chained overprints has no
            // cacheable position within the granularity.
            while current.offset < limit || (at_tail && entry.offset == self.entries[i].offset) {
                let Some(byte) = source.get_byte(current.offset) else {
                    break;
                };

                if !Self::less(&current, coord, want, rules) {
                    // Never land inside an overprint sequence when the
                    // column counts overprints as one.
                    let inside_overprint =
                        want == Lookup::Offset && rules.nroff && nroff_state != NroffState::Start;
                    if !inside_overprint {
                        break;
                    }
                }

                let mut next = CoordEntry {
                    offset: current.offset + 1,
                    line: current.line,
                    column: current.column + 1,
                    nroff_column: current.nroff_column + 1,
                };

                if byte == b'\r' {
                    match source.get_byte(current.offset + 1) {
                        // Part of a line ending that something else completes.
                        Some(b'\r' | b'\n') => {
                            next.column = current.column;
                            next.nroff_column = current.nroff_column;
                        }
                        // Old Mac line ending.
                        _ => {
                            next.line += 1;
                            next.column = 0;
                            next.nroff_column = 0;
                        }
                    }
                } else if nroff_state == NroffState::Backspace {
                    next.nroff_column = current.nroff_column.saturating_sub(1);
                } else if byte == b'\t' {
                    next.column = current.column / tab * tab + tab;
                    next.nroff_column = current.nroff_column / tab * tab + tab;
                } else if byte == b'\n' {
                    next.line += 1;
                    next.column = 0;
                    next.nroff_column = 0;
                }

                nroff_state = match nroff_state {
                    NroffState::Start | NroffState::Continuation => {
                        if is_overprint_at(source, current.offset) {
                            NroffState::Backspace
                        } else {
                            NroffState::Start
                        }
                    }
                    NroffState::Backspace => NroffState::Continuation,
                };

                // Columns step backwards inside overprints and stand still on
                // `\r`, so neither position can be cached.
                if nroff_state == NroffState::Start && byte != b'\r' {
                    entry = next;
                }
                current = next;
            }

            if at_tail && entry.offset != self.entries[i].offset {
                self.push(entry);
                if !interrupted() {
                    continue;
                }
            }

            match want {
                Lookup::Offset => coord.offset = current.offset,
                Lookup::LineColumn => {
                    coord.line = current.line;
                    coord.column = current.column;
                    coord.nroff_column = current.nroff_column;
                }
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: ColumnRules = ColumnRules {
        nroff: false,
        tab_spacing: 8,
    };
    const NROFF: ColumnRules = ColumnRules {
        nroff: true,
        tab_spacing: 8,
    };

    fn never() -> bool {
        false
    }

    fn to_coord(
        cache: &mut CoordCache,
        source: &mut DataSource,
        rules: ColumnRules,
        offset: u64,
    ) -> (u64, u64) {
        let mut coord = CoordEntry {
            offset,
            ..CoordEntry::default()
        };
        cache.lookup(source, rules, &mut coord, Lookup::LineColumn, &mut never);
        let column = if rules.nroff {
            coord.nroff_column
        } else {
            coord.column
        };
        (coord.line, column)
    }

    fn to_offset(
        cache: &mut CoordCache,
        source: &mut DataSource,
        rules: ColumnRules,
        line: u64,
        column: u64,
    ) -> u64 {
        let mut coord = CoordEntry {
            line,
            column,
            nroff_column: column,
            ..CoordEntry::default()
        };
        cache.lookup(source, rules, &mut coord, Lookup::Offset, &mut never);
        coord.offset
    }

    #[test]
    fn test_lines_and_columns() {
        let mut source = DataSource::string(b"abc\ndef\nghi\n".to_vec());
        let mut cache = CoordCache::new();

        assert_eq!((0, 0), to_coord(&mut cache, &mut source, PLAIN, 0));
        assert_eq!((1, 1), to_coord(&mut cache, &mut source, PLAIN, 5));
        assert_eq!((2, 3), to_coord(&mut cache, &mut source, PLAIN, 11));
        assert_eq!(4, to_offset(&mut cache, &mut source, PLAIN, 1, 0));
        assert_eq!(8, to_offset(&mut cache, &mut source, PLAIN, 2, 0));
        // Columns past the end of a line land on the start of the next one.
        assert_eq!(4, to_offset(&mut cache, &mut source, PLAIN, 0, 50));
    }

    #[test]
    fn test_tabs_and_line_endings() {
        let mut source = DataSource::string(b"\tx\r\nab\rc".to_vec());
        let mut cache = CoordCache::new();

        assert_eq!((0, 8), to_coord(&mut cache, &mut source, PLAIN, 1));
        // `\r\n` ends the line once.
        assert_eq!((0, 9), to_coord(&mut cache, &mut source, PLAIN, 2));
        assert_eq!((0, 9), to_coord(&mut cache, &mut source, PLAIN, 3));
        assert_eq!((1, 0), to_coord(&mut cache, &mut source, PLAIN, 4));
        // A lone `\r` ends a line by itself.
        assert_eq!((2, 0), to_coord(&mut cache, &mut source, PLAIN, 7));
    }

    #[test]
    fn test_nroff_columns() {
        let mut source = DataSource::string(b"a\x08ab_\x08cd".to_vec());
        let mut cache = CoordCache::new();

        assert_eq!((0, 3), to_coord(&mut cache, &mut source, PLAIN, 3));
        assert_eq!((0, 1), to_coord(&mut cache, &mut source, NROFF, 3));
        assert_eq!((0, 3), to_coord(&mut cache, &mut source, NROFF, 7));

        // Column 2 is the underlined `c`; the lookup lands on the start of its
        // overprint sequence, never inside it.
        let mut cache = CoordCache::new();
        assert_eq!(4, to_offset(&mut cache, &mut source, NROFF, 0, 2));
    }

    #[test]
    fn test_long_file_grows_cache_monotonically() {
        let mut text = String::new();
        for n in 0..2000 {
            text.push_str(&format!("line {n:04}\n"));
        }
        let mut source = DataSource::string(text.into_bytes());
        let mut cache = CoordCache::new();

        // Each line is 10 bytes.
        assert_eq!((1234, 3), to_coord(&mut cache, &mut source, PLAIN, 12343));
        assert_eq!(15000, to_offset(&mut cache, &mut source, PLAIN, 1500, 0));
        assert_eq!(500, to_offset(&mut cache, &mut source, PLAIN, 50, 0));

        let entries = cache.entries();
        assert!(entries.len() > 10);
        for pair in entries.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
            assert!(pair[0].line <= pair[1].line);
            assert!(pair[1].offset - pair[0].offset <= COORD_CACHE_GRANULARITY);
        }
    }

    #[test]
    fn test_round_trip() {
        let text = "first\tline\r\nsecond\rthird\n\nx\x08xy_\x08z\n";
        for rules in [PLAIN, NROFF] {
            let mut source = DataSource::string(text.as_bytes().to_vec());
            let mut cache = CoordCache::new();
            for offset in 0..=text.len() as u64 {
                let (line, column) = to_coord(&mut cache, &mut source, rules, offset);
                let resolved = to_offset(&mut cache, &mut source, rules, line, column);
                assert_eq!(
                    (line, column),
                    to_coord(&mut cache, &mut source, rules, resolved),
                    "offset {offset} with {rules:?}"
                );
            }
        }
    }

    #[test]
    fn test_long_runs_without_cacheable_positions() {
        let mut text = "\r".repeat(3000);
        text.push_str("\nabc\n");
        let mut source = DataSource::string(text.into_bytes());
        let mut cache = CoordCache::new();
        assert_eq!((1, 2), to_coord(&mut cache, &mut source, PLAIN, 3003));
        assert_eq!(3003, to_offset(&mut cache, &mut source, PLAIN, 1, 2));

        // `a\ba\ba...`: every byte is inside an overprint sequence.
        let mut text = "a".to_string();
        for _ in 0..1500 {
            text.push_str("\x08a");
        }
        text.push_str("bc\n");
        let len = text.len() as u64;
        for rules in [PLAIN, NROFF] {
            let mut source = DataSource::string(text.clone().into_bytes());
            let mut cache = CoordCache::new();
            let (line, column) = to_coord(&mut cache, &mut source, rules, len - 2);
            assert_eq!(0, line);
            assert_eq!(len - 2, to_offset(&mut cache, &mut source, rules, line, column));
        }
    }

    #[test]
    fn test_interrupted_walk_stops_early() {
        let text = "x".repeat(COORD_CACHE_GRANULARITY as usize * 4);
        let mut source = DataSource::string(text.into_bytes());
        let mut cache = CoordCache::new();

        let mut coord = CoordEntry {
            offset: 4000,
            ..CoordEntry::default()
        };
        cache.lookup(&mut source, PLAIN, &mut coord, Lookup::LineColumn, &mut || true);
        assert_eq!(COORD_CACHE_GRANULARITY, coord.column);
        assert_eq!(2, cache.entries().len());
    }
}
