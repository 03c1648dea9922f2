//! Feeding decoded text to a matcher.
//!
//! Search runs over characters, not screen rows: the bytes are decoded in the
//! current encoding and, in nroff mode, overprint sequences are collapsed, so
//! "bold" matches `b\bbo\bol\bld\bd`. Matches are reported as byte spans.

use std::collections::VecDeque;
use std::ops::Range;

use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::charset::Encoding;
use crate::datasource::DataSource;
use crate::error::Result;
use crate::formatter::{CharReader, FormatterState};
use crate::growbuf::{Wait, PRODUCER_WAIT};
use crate::nroff::NroffDecoder;

/// Bytes examined between progress reports.
pub const SEARCH_CHUNK_BYTES: u64 = 64 * 1024;

/// Regex matching works a paragraph at a time; paragraphs longer than this
/// are searched in pieces.
pub const MAX_REGEX_LINE_BYTES: usize = 1 << 20;

/// The matches a search cares about: those starting in `from..until`.
/// Text before `from` is only context. A forward search keeps the first
/// match, a backward search the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hits {
    from: u64,
    until: Option<u64>,
    keep_last: bool,
    found: Option<Range<u64>>,
}

impl Hits {
    pub fn new(from: u64, until: Option<u64>, keep_last: bool) -> Hits {
        Hits {
            from,
            until,
            keep_last,
            found: None,
        }
    }

    pub fn from(&self) -> u64 {
        self.from
    }

    /// Matches must be pushed in order of their start.
    pub fn push(&mut self, span: Range<u64>) {
        let wanted =
            span.start >= self.from && self.until.map_or(true, |until| span.start < until);
        if wanted && !self.is_done() {
            self.found = Some(span);
        }
    }

    /// Nothing later can change the result.
    pub fn is_done(&self) -> bool {
        !self.keep_last && self.found.is_some()
    }

    pub fn take(&mut self) -> Option<Range<u64>> {
        self.found.take()
    }
}

/// Something that recognizes a pattern in a stream of characters. Each
/// character comes with the byte span it was decoded from, and every match
/// is pushed to `hits`.
pub trait Matcher {
    fn reset(&mut self);
    fn feed(&mut self, ch: char, span: Range<u64>, hits: &mut Hits);
    /// The data ended; report anything still pending.
    fn finish(&mut self, hits: &mut Hits);
}

/// Plain substring search.
pub struct LiteralMatcher {
    pattern: Vec<char>,
    case_sensitive: bool,
    window: VecDeque<(char, Range<u64>)>,
}

impl LiteralMatcher {
    pub fn new(pattern: &str, case_sensitive: bool) -> LiteralMatcher {
        let pattern = pattern
            .chars()
            .map(|ch| fold_case(ch, case_sensitive))
            .collect();
        LiteralMatcher {
            pattern,
            case_sensitive,
            window: VecDeque::new(),
        }
    }
}

fn fold_case(ch: char, case_sensitive: bool) -> char {
    if case_sensitive {
        ch
    } else {
        ch.to_lowercase().next().unwrap_or(ch)
    }
}

impl Matcher for LiteralMatcher {
    fn reset(&mut self) {
        self.window.clear();
    }

    fn feed(&mut self, ch: char, span: Range<u64>, hits: &mut Hits) {
        if self.pattern.is_empty() {
            return;
        }

        self.window.push_back((fold_case(ch, self.case_sensitive), span));
        if self.window.len() > self.pattern.len() {
            self.window.pop_front();
        }
        if self.window.len() < self.pattern.len()
            || !self.window.iter().map(|(ch, _)| ch).eq(self.pattern.iter())
        {
            return;
        }

        let start = self.window.front().map_or(0, |(_, span)| span.start);
        let end = self.window.back().map_or(0, |(_, span)| span.end);
        hits.push(start..end);
    }

    fn finish(&mut self, _hits: &mut Hits) {
        self.window.clear();
    }
}

/// Regular expression search, one paragraph at a time. Patterns never match
/// across a line terminator, and `^`/`$` anchor at paragraph boundaries even
/// when the search starts in the middle of one.
pub struct RegexMatcher {
    regex: Regex,
    line: String,
    // Byte index into `line` of each character, with the span it came from.
    spans: Vec<(usize, Range<u64>)>,
}

impl RegexMatcher {
    pub fn new(pattern: &str, case_sensitive: bool) -> Result<RegexMatcher> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(RegexMatcher {
            regex,
            line: String::new(),
            spans: vec![],
        })
    }

    fn span_of(&self, start: usize, end: usize) -> Option<Range<u64>> {
        let first = self.spans.partition_point(|(index, _)| *index < start);
        let last = self.spans.partition_point(|(index, _)| *index < end);
        let start = self.spans.get(first)?.1.start;
        let end = self.spans.get(last.checked_sub(1)?)?.1.end;
        Some(start..end)
    }

    fn flush(&mut self, hits: &mut Hits) {
        // The whole paragraph is the haystack, so anchors and word
        // boundaries see the text before the first candidate.
        let from = hits.from();
        let first = self.spans.partition_point(|(_, span)| span.start < from);
        let mut at = self.spans.get(first).map_or(self.line.len(), |(index, _)| *index);

        while at <= self.line.len() && !hits.is_done() {
            let Some(m) = self.regex.find_at(&self.line, at) else {
                break;
            };
            if m.is_empty() {
                at = m.end() + self.line[m.end()..].chars().next().map_or(1, char::len_utf8);
                continue;
            }
            if let Some(span) = self.span_of(m.start(), m.end()) {
                hits.push(span);
            }
            at = m.end();
        }

        self.line.clear();
        self.spans.clear();
    }
}

impl Matcher for RegexMatcher {
    fn reset(&mut self) {
        self.line.clear();
        self.spans.clear();
    }

    fn feed(&mut self, ch: char, span: Range<u64>, hits: &mut Hits) {
        if ch == '\n' || ch == '\r' {
            self.flush(hits);
            return;
        }
        self.spans.push((self.line.len(), span));
        self.line.push(ch);
        if self.line.len() >= MAX_REGEX_LINE_BYTES {
            self.flush(hits);
        }
    }

    fn finish(&mut self, hits: &mut Hits) {
        self.flush(hits);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub backwards: bool,
    /// Continue from the other end of the data when nothing is found.
    pub wrap_around: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(Range<u64>),
    NotFound,
    /// The progress callback asked to stop.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProgress {
    pub offset: u64,
    pub percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStep {
    Found(Range<u64>),
    NotFound,
    /// A chunk was searched, or the data is still on its way; call `step`
    /// again to go on.
    Pending,
}

enum Scan {
    Found(Range<u64>),
    Budget,
    PastRange,
    OutOfData,
}

/// A search for a match starting in `from..until` (or anywhere after
/// `from`), done a chunk at a time so the caller can report progress and
/// cancel between chunks. Decoding starts at the beginning of the paragraph
/// holding `from` and, past `until`, runs on to the end of that paragraph.
///
/// A pipe that has stalled is waited on, a bounded wait per step; only a
/// producer that cannot be waited on counts as ended when it stalls.
pub struct SearchDriver<'m> {
    matcher: &'m mut dyn Matcher,
    decoder: NroffDecoder,
    state: FormatterState,
    hits: Hits,
    until: Option<u64>,
    started: bool,
}

impl<'m> SearchDriver<'m> {
    pub fn new(
        matcher: &'m mut dyn Matcher,
        nroff: bool,
        from: u64,
        until: Option<u64>,
    ) -> SearchDriver<'m> {
        matcher.reset();
        SearchDriver {
            matcher,
            decoder: NroffDecoder::new(nroff),
            state: FormatterState::new(from),
            hits: Hits::new(from, until, false),
            until,
            started: false,
        }
    }

    /// Search the whole range and report the last match instead of the first.
    pub fn find_last(mut self) -> SearchDriver<'m> {
        self.hits.keep_last = true;
        self
    }

    /// Where the next step resumes.
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    pub fn step(&mut self, source: &mut DataSource, encoding: &Encoding) -> SearchStep {
        if !self.started {
            self.started = true;
            let from = self.hits.from();
            let limit = from.saturating_sub(MAX_REGEX_LINE_BYTES as u64);
            self.state = FormatterState::new(source.bol(from, limit).min(from));
        }

        let budget_end = self.state.offset.saturating_add(SEARCH_CHUNK_BYTES);
        loop {
            match self.scan(source, encoding, budget_end) {
                Scan::Found(span) => return SearchStep::Found(span),
                Scan::Budget => return SearchStep::Pending,
                Scan::PastRange => {}
                Scan::OutOfData if source.may_still_grow() => {
                    match source.wait_for_data(PRODUCER_WAIT) {
                        Wait::Ready => continue,
                        Wait::Pending => return SearchStep::Pending,
                        Wait::Unsupported => {}
                    }
                }
                Scan::OutOfData => {}
            }

            trace!(target: "search", offset = self.state.offset, "reached end of searchable data");
            self.matcher.finish(&mut self.hits);
            return match self.hits.take() {
                Some(span) => SearchStep::Found(span),
                None => SearchStep::NotFound,
            };
        }
    }

    fn scan(&mut self, source: &mut DataSource, encoding: &Encoding, budget_end: u64) -> Scan {
        let mut reader = CharReader::new(source, encoding, None);

        while self.state.offset < budget_end {
            let start = self.state.offset;
            let Some(decoded) = self.decoder.next(&mut reader, &mut self.state) else {
                return Scan::OutOfData;
            };

            let ends_paragraph = decoded.unit.is('\n') || decoded.unit.is('\r');
            if decoded.unit.is('\n') {
                self.state = FormatterState::new(self.state.offset);
            }
            let span = start..self.state.offset;
            self.matcher.feed(decoded.unit.to_char_lossy(), span, &mut self.hits);
            if self.hits.is_done() {
                if let Some(span) = self.hits.take() {
                    return Scan::Found(span);
                }
            }

            // Nothing starting after this can be wanted.
            if ends_paragraph && self.until.is_some_and(|until| self.state.offset > until) {
                return Scan::PastRange;
            }
        }
        Scan::Budget
    }
}
