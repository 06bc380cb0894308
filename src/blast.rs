//! BLAST Pairwise Report Parser Module
//!
//! Rebuilds structured hits from BLAST's default (`-outfmt 0`) pairwise text.
//! The report has no formal grammar, so parsing is a line-driven state
//! machine: [`BlastParser::feed`] consumes one line at a time and hands back a
//! [`BlastHit`] whenever the previous high-scoring pair is complete.
//!
//! # Report Layout
//! ```text
//! BLASTX 2.12.0+                                 <- citation header
//!
//! Query= contig_7 assembled contig               <- query name (may wrap)
//!
//! Length=9000
//!
//! > dnaA chromosomal replication initiator       <- subject name (may wrap)
//! Length=40
//!
//!  Score = 80.1 bits (196),  Expect = 2e-20,     <- key = value header
//!  Identities = 38/40 (95%), Positives = 39/40 (97%), Gaps = 0/40 (0%)
//!  Frame = +2
//!
//! Query  302  MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSRV  421
//!             MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILS V
//! Sbjct  1    MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSEV  40
//! ```
//!
//! # Example Usage
//! ```no_run
//! use geneseek::blast::BlastReader;
//!
//! let mut reader = BlastReader::open("hits.txt").unwrap();
//! while let Some(hit) = reader.read_next().unwrap() {
//!     println!("{} -> {} (E = {:?})", hit.query.name, hit.subject.name, hit.expect());
//! }
//! ```

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlastParseError {
    #[error("report ended inside the hit of '{query}' against '{subject}' before any alignment coordinates")]
    UnparseableTrailingRecord { query: String, subject: String },

    #[error("line {line}: hit of '{query}' against '{subject}' has no alignment coordinates")]
    IncompleteRecord {
        line: usize,
        query: String,
        subject: String,
    },

    #[error("line {line}: malformed alignment line '{text}'")]
    MalformedCoordinateLine { line: usize, text: String },

    #[error("line {line}: invalid alignment coordinate '{value}'")]
    InvalidCoordinate { line: usize, value: String },

    #[error("line {line}: invalid sequence length '{value}'")]
    InvalidLength { line: usize, value: String },
}

// ============================================================================
// Hit Records
// ============================================================================

/// One side (query or subject) of a high-scoring pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitSide {
    /// Identifier (text before the first whitespace).
    pub name: String,
    /// Rest of the name line.
    pub defline: String,
    /// First coordinate printed for this side.
    pub start: usize,
    /// Last coordinate printed for this side. Lower than `start` on minus
    /// strands.
    pub end: usize,
    /// `|end - start| + 1`.
    pub length: usize,
    /// Aligned residues with gaps removed.
    pub sequence: String,
    /// Full sequence length, when the report prints one.
    pub full_length: Option<usize>,
}

impl HitSide {
    /// Span as `(min, max)`.
    pub fn span(&self) -> (usize, usize) {
        (self.start.min(self.end), self.start.max(self.end))
    }
}

/// A single high-scoring pair between a query and a subject.
#[derive(Debug, Clone, PartialEq)]
pub struct BlastHit {
    pub query: HitSide,
    pub subject: HitSide,
    /// Header pairs (`score`, `expect`, `identities`, `frame`, `strand`, ...)
    /// keyed by lowercased name.
    pub fields: FxHashMap<String, String>,
}

impl BlastHit {
    /// Raw header value.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// E-value. Accepts BLAST's `e-150` shorthand for `1e-150`.
    pub fn expect(&self) -> Option<f64> {
        let raw = self.field("expect")?.trim();
        if raw.starts_with(['e', 'E']) {
            format!("1{}", raw).parse().ok()
        } else {
            raw.parse().ok()
        }
    }

    /// Identity counts from `n/m (p%)`.
    pub fn identities(&self) -> Option<(usize, usize)> {
        let raw = self.field("identities")?;
        let ratio = raw.split_whitespace().next()?;
        let (n, m) = ratio.split_once('/')?;
        Some((n.parse().ok()?, m.parse().ok()?))
    }

    /// Identity in `[0, 1]`. Uses the printed percentage, falling back to
    /// `n/m` when it is missing.
    pub fn identity_fraction(&self) -> Option<f64> {
        let raw = self.field("identities")?;
        let percent = raw
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once('%'))
            .and_then(|(p, _)| p.trim().parse::<f64>().ok());
        match percent {
            Some(p) => Some(p / 100.0),
            None => {
                let (n, m) = self.identities()?;
                (m > 0).then(|| n as f64 / m as f64)
            }
        }
    }

    /// Reading frame of the query. `Frame = +2` (or the first component of
    /// `+2/-1`) when present, otherwise derived from `Strand = Plus/Minus`.
    pub fn reading_frame(&self) -> Option<i32> {
        if let Some(frame) = self.field("frame") {
            let first = frame.split('/').next()?.trim();
            return first.trim_start_matches('+').parse().ok();
        }
        let strand = self.field("strand")?;
        let mut parts = strand.split('/').map(|s| s.trim().to_ascii_lowercase());
        let query = parts.next()?;
        let subject = parts.next().unwrap_or_else(|| query.clone());
        Some(if query == subject { 1 } else { -1 })
    }
}

// ============================================================================
// Parser State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PreHeader,
    QueryName,
    PostLength,
    SubjectName,
    SubjectHeader,
    Alignment,
}

#[derive(Debug, Default, Clone)]
struct SideBuilder {
    start: Option<usize>,
    end: Option<usize>,
    sequence: String,
}

/// Hit under construction.
#[derive(Debug, Clone)]
struct PendingHit {
    query_name: String,
    query_defline: String,
    query_length: Option<usize>,
    /// Subject name line, accumulated until the first `Score` line.
    subject_raw: String,
    subject_name: String,
    subject_defline: String,
    subject_length: Option<usize>,
    query: SideBuilder,
    subject: SideBuilder,
    fields: FxHashMap<String, String>,
}

impl PendingHit {
    fn new(query_raw: &str, query_length: Option<usize>, subject_raw: &str) -> Self {
        let (query_name, query_defline) = split_name(query_raw);
        Self {
            query_name,
            query_defline,
            query_length,
            subject_raw: subject_raw.trim_start().to_string(),
            subject_name: String::new(),
            subject_defline: String::new(),
            subject_length: None,
            query: SideBuilder::default(),
            subject: SideBuilder::default(),
            fields: FxHashMap::default(),
        }
    }

    /// Next HSP against the same subject.
    fn next_hsp(&self) -> Self {
        Self {
            query: SideBuilder::default(),
            subject: SideBuilder::default(),
            fields: FxHashMap::default(),
            ..self.clone()
        }
    }

    fn subject_label(&self) -> String {
        if self.subject_name.is_empty() {
            split_name(&self.subject_raw).0
        } else {
            self.subject_name.clone()
        }
    }

    fn build(self) -> Option<BlastHit> {
        let side = |b: SideBuilder, name: String, defline: String, full: Option<usize>| {
            let (start, end) = (b.start?, b.end?);
            Some(HitSide {
                name,
                defline,
                start,
                end,
                length: start.abs_diff(end) + 1,
                sequence: b.sequence,
                full_length: full,
            })
        };
        Some(BlastHit {
            query: side(self.query, self.query_name, self.query_defline, self.query_length)?,
            subject: side(
                self.subject,
                self.subject_name,
                self.subject_defline,
                self.subject_length,
            )?,
            fields: self.fields,
        })
    }
}

/// Splits `name rest of defline` at the first whitespace.
fn split_name(raw: &str) -> (String, String) {
    let raw = raw.trim();
    match raw.split_once(char::is_whitespace) {
        Some((name, defline)) => (name.to_string(), defline.trim_start().to_string()),
        None => (raw.to_string(), String::new()),
    }
}

/// Reads `Length=1,234` or `(1,234 letters)`. Returns `None` for other lines.
fn length_line(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("Length=") {
        return Some(rest.trim());
    }
    line.strip_prefix('(')
        .and_then(|rest| rest.strip_suffix("letters)"))
        .map(str::trim)
}

/// Line-at-a-time BLAST report parser.
///
/// Hits are produced only once complete, so a hit is returned by the `feed`
/// call for the line that *follows* it (next `Score`, `>`, or `Query=`), or by
/// [`BlastParser::finish`] at end of input.
#[derive(Debug)]
pub struct BlastParser {
    state: State,
    headers: Vec<String>,
    query_raw: String,
    query_length: Option<usize>,
    current: Option<PendingHit>,
    /// HSP dropped after a bad coordinate line; later HSPs of the same
    /// subject start from it.
    discarded: Option<PendingHit>,
    line_no: usize,
}

impl Default for BlastParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BlastParser {
    pub fn new() -> Self {
        Self {
            state: State::PreHeader,
            headers: Vec::new(),
            query_raw: String::new(),
            query_length: None,
            current: None,
            discarded: None,
            line_no: 0,
        }
    }

    /// Lines preceding the first `Query=` (program version, citation, ...).
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Consumes one line (trailing newline optional).
    ///
    /// On error the offending record is discarded and parsing can continue
    /// with the next line.
    pub fn feed(&mut self, line: &str) -> Result<Option<BlastHit>, BlastParseError> {
        self.line_no += 1;
        let line = line.trim_end_matches(['\n', '\r']).trim_start();

        if line.trim_end().is_empty() {
            if self.state == State::SubjectHeader {
                self.state = State::Alignment;
            }
            return Ok(None);
        }

        match self.state {
            State::PreHeader => {
                if let Some(rest) = line.strip_prefix("Query=") {
                    self.start_query(rest);
                } else {
                    self.headers.push(line.trim_end().to_string());
                }
                Ok(None)
            }
            State::QueryName => {
                if let Some(rest) = line.strip_prefix('>') {
                    self.start_subject(rest);
                } else if let Some(len) = length_line(line) {
                    self.query_length = Some(self.parse_length(len)?);
                    self.state = State::PostLength;
                } else if let Some(rest) = line.strip_prefix("Query=") {
                    self.start_query(rest);
                } else {
                    self.query_raw.push_str(line.trim_end());
                }
                Ok(None)
            }
            State::PostLength => {
                if let Some(rest) = line.strip_prefix('>') {
                    self.start_subject(rest);
                } else if let Some(rest) = line.strip_prefix("Query=") {
                    self.start_query(rest);
                }
                Ok(None)
            }
            State::SubjectName => {
                if line.starts_with("Score") {
                    if let Some(hit) = self.current.as_mut() {
                        let (name, defline) = split_name(&hit.subject_raw);
                        hit.subject_name = name;
                        hit.subject_defline = defline;
                    }
                    self.parse_fields(line);
                    self.state = State::SubjectHeader;
                } else if let Some(len) = length_line(line) {
                    let len = self.parse_length(len)?;
                    if let Some(hit) = self.current.as_mut() {
                        hit.subject_length = Some(len);
                    }
                } else if let Some(hit) = self.current.as_mut() {
                    hit.subject_raw.push_str(line.trim_end());
                }
                Ok(None)
            }
            State::SubjectHeader => {
                self.parse_fields(line);
                Ok(None)
            }
            State::Alignment => self.feed_alignment(line),
        }
    }

    /// Signals end of input and returns the last pending hit, if any.
    pub fn finish(&mut self) -> Result<Option<BlastHit>, BlastParseError> {
        self.discarded = None;
        let Some(pending) = self.current.take() else {
            return Ok(None);
        };
        self.state = State::PostLength;
        let query = pending.query_name.clone();
        let subject = pending.subject_label();
        pending
            .build()
            .map(Some)
            .ok_or(BlastParseError::UnparseableTrailingRecord { query, subject })
    }

    fn feed_alignment(&mut self, line: &str) -> Result<Option<BlastHit>, BlastParseError> {
        if let Some(rest) = line.strip_prefix("Query=") {
            let done = self.take_pending();
            self.start_query(rest);
            return done;
        }
        if let Some(rest) = line.strip_prefix('>') {
            let done = self.take_pending();
            self.start_subject(rest);
            return done;
        }
        if line.starts_with("Score") {
            let next = self
                .current
                .as_ref()
                .or(self.discarded.as_ref())
                .map(PendingHit::next_hsp);
            self.discarded = None;
            let done = self.take_pending();
            self.current = next;
            self.parse_fields(line);
            self.state = State::SubjectHeader;
            return done;
        }

        let is_query = line.starts_with("Query");
        if !is_query && !line.starts_with("Sbjct") {
            return Ok(None);
        }
        if self.current.is_none() {
            return Ok(None);
        }

        match self.parse_coordinate_line(line) {
            Ok((start, residues, end)) => {
                if let Some(hit) = self.current.as_mut() {
                    let side = if is_query { &mut hit.query } else { &mut hit.subject };
                    side.start.get_or_insert(start);
                    side.end = Some(end);
                    side.sequence.extend(residues.chars().filter(|&c| c != '-'));
                }
                Ok(None)
            }
            Err(e) => {
                // The rest of this HSP is ignored; it is never yielded.
                self.discarded = self.current.take().map(|hit| hit.next_hsp());
                Err(e)
            }
        }
    }

    fn parse_coordinate_line<'l>(
        &self,
        line: &'l str,
    ) -> Result<(usize, &'l str, usize), BlastParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (start, residues, end) = match tokens.as_slice() {
            [_, start, residues, end] => (*start, *residues, *end),
            [_, start, end] => (*start, "", *end),
            _ => {
                return Err(BlastParseError::MalformedCoordinateLine {
                    line: self.line_no,
                    text: line.trim_end().to_string(),
                })
            }
        };
        Ok((self.parse_coordinate(start)?, residues, self.parse_coordinate(end)?))
    }

    fn take_pending(&mut self) -> Result<Option<BlastHit>, BlastParseError> {
        let Some(pending) = self.current.take() else {
            return Ok(None);
        };
        let query = pending.query_name.clone();
        let subject = pending.subject_label();
        pending.build().map(Some).ok_or(BlastParseError::IncompleteRecord {
            line: self.line_no,
            query,
            subject,
        })
    }

    fn start_query(&mut self, rest: &str) {
        self.discarded = None;
        self.query_raw = rest.trim().to_string();
        self.query_length = None;
        self.state = State::QueryName;
    }

    fn start_subject(&mut self, rest: &str) {
        self.discarded = None;
        self.current = Some(PendingHit::new(&self.query_raw, self.query_length, rest));
        self.state = State::SubjectName;
    }

    /// Parses comma-separated `key = value` / `key: value` pairs.
    fn parse_fields(&mut self, line: &str) {
        let Some(hit) = self.current.as_mut() else {
            return;
        };
        for pair in line.split(',').map(str::trim) {
            let split = if pair.contains('=') {
                pair.split_once('=')
            } else {
                pair.split_once(':')
            };
            let Some((key, value)) = split else {
                continue;
            };
            let key = key.split('(').next().unwrap_or("").trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            hit.fields.insert(key, value.trim().to_string());
        }
    }

    fn parse_coordinate(&self, raw: &str) -> Result<usize, BlastParseError> {
        raw.parse().map_err(|_| BlastParseError::InvalidCoordinate {
            line: self.line_no,
            value: raw.to_string(),
        })
    }

    fn parse_length(&self, raw: &str) -> Result<usize, BlastParseError> {
        raw.replace(',', "")
            .trim()
            .parse()
            .map_err(|_| BlastParseError::InvalidLength {
                line: self.line_no,
                value: raw.to_string(),
            })
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Streams hits out of any buffered source: a saved report, a child process's
/// stdout, or an in-memory string.
pub struct BlastReader<R: BufRead> {
    reader: R,
    parser: BlastParser,
    line_buf: String,
    finished: bool,
}

impl BlastReader<BufReader<File>> {
    /// Opens a saved pairwise report.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open BLAST report: {}", path.as_ref().display()))?;
        Ok(Self::new(BufReader::with_capacity(1024 * 1024, file)))
    }
}

impl<R: BufRead> BlastReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: BlastParser::new(),
            line_buf: String::with_capacity(512),
            finished: false,
        }
    }

    /// Citation lines seen so far.
    pub fn headers(&self) -> &[String] {
        self.parser.headers()
    }

    /// Reads until the next complete hit.
    ///
    /// # Returns
    /// - `Ok(Some(hit))` - A complete hit
    /// - `Ok(None)` - End of input
    /// - `Err(e)` - I/O error or a [`BlastParseError`]; reading may resume
    ///   after a parse error
    pub fn read_next(&mut self) -> Result<Option<BlastHit>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            self.line_buf.clear();
            let n = match self.reader.read_line(&mut self.line_buf) {
                Ok(n) => n,
                Err(e) => {
                    self.finished = true;
                    return Err(e).context("Failed to read BLAST output");
                }
            };
            if n == 0 {
                self.finished = true;
                return Ok(self.parser.finish()?);
            }
            if let Some(hit) = self.parser.feed(&self.line_buf)? {
                return Ok(Some(hit));
            }
        }
    }
}

impl<R: BufRead> Iterator for BlastReader<R> {
    type Item = Result<BlastHit>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(hit)) => Some(Ok(hit)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
