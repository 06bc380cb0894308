//! Sequence I/O Module
//!
//! Readers and writers for the formats the pipeline consumes and produces.
//!
//! # Supported Formats
//! - FASTA: read (plain or gzipped) and write, 70 residues per line
//! - FASTQ: read (plain or gzipped), Phred+33 or Phred+64 qualities
//! - GFF3: read and write, `##gff-version 3` written before the first feature
//!
//! # Examples
//! ```no_run
//! use geneseek::seqio::{read_sequences, FastaWriter};
//!
//! let genome = read_sequences("genome.fa.gz").unwrap();
//! let mut out = FastaWriter::create("copy.fasta").unwrap();
//! for seq in &genome {
//!     out.write(seq).unwrap();
//! }
//! ```

use crate::annotation::{Annotation, UnknownNamer};
use crate::sequence::Sequence;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const FASTA_LINE_WIDTH: usize = 70;

/// Opens a file for buffered reading, decompressing `.gz` transparently.
pub fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Ok(Box::new(BufReader::with_capacity(1024 * 1024, MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::with_capacity(1024 * 1024, file)))
    }
}

/// Splits a header line body into identifier and description.
fn split_header(header: &str) -> (String, String) {
    let header = header.trim();
    match header.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_string(), rest.trim().to_string()),
        None => (header.to_string(), String::new()),
    }
}

// ============================================================================
// Format Detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFormat {
    Fasta,
    Fastq,
    Gff,
}

impl SeqFormat {
    /// Guesses the format from the first non-empty line.
    pub fn detect<R: BufRead>(reader: &mut R) -> Result<Option<SeqFormat>> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(if trimmed.starts_with('>') {
                Some(SeqFormat::Fasta)
            } else if trimmed.starts_with('@') {
                Some(SeqFormat::Fastq)
            } else if trimmed.starts_with("##gff-version") || trimmed.split('\t').count() == 9 {
                Some(SeqFormat::Gff)
            } else {
                None
            });
        }
    }

    /// Detects the format of a file on disk.
    pub fn detect_path<P: AsRef<Path>>(path: P) -> Result<Option<SeqFormat>> {
        let mut reader = open_text(path.as_ref())?;
        Self::detect(&mut reader)
    }
}

// ============================================================================
// FASTA Format
// ============================================================================

/// Sequential FASTA reader.
///
/// Handles multi-line sequences, blank lines and Windows line endings.
pub struct FastaReader<R: BufRead> {
    reader: R,
    line_buf: String,
    current_header: Option<String>,
}

impl FastaReader<Box<dyn BufRead + Send>> {
    /// Opens a FASTA file (plain or `.gz`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = open_text(path.as_ref())
            .with_context(|| format!("Failed to open FASTA: {}", path.as_ref().display()))?;
        Self::new(reader)
    }
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut fasta = Self {
            reader,
            line_buf: String::with_capacity(256),
            current_header: None,
        };

        // Skip to the first header
        loop {
            fasta.line_buf.clear();
            if fasta.reader.read_line(&mut fasta.line_buf)? == 0 {
                break;
            }
            if let Some(header) = fasta.line_buf.trim_start().strip_prefix('>') {
                fasta.current_header = Some(header.to_string());
                break;
            }
        }
        Ok(fasta)
    }

    /// Reads the next record.
    ///
    /// # Returns
    /// - `Ok(Some(seq))` - Successfully read a record
    /// - `Ok(None)` - End of file reached
    /// - `Err(e)` - I/O error occurred
    pub fn read_next(&mut self) -> Result<Option<Sequence>> {
        let header = match self.current_header.take() {
            Some(h) => h,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(10000);
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }
            if let Some(next) = self.line_buf.strip_prefix('>') {
                self.current_header = Some(next.to_string());
                break;
            }
            seq.push_str(self.line_buf.trim());
        }

        let (name, defline) = split_header(&header);
        Ok(Some(Sequence::new(name, seq).with_defline(defline)))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<Sequence>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// FASTA writer wrapping residues at 70 columns.
pub struct FastaWriter<W: Write> {
    writer: W,
}

impl FastaWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create FASTA: {}", path.as_ref().display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FastaWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, seq: &Sequence) -> Result<()> {
        if seq.defline.is_empty() {
            writeln!(self.writer, ">{}", seq.name)?;
        } else {
            writeln!(self.writer, ">{} {}", seq.name, seq.defline)?;
        }
        for chunk in seq.seq.as_bytes().chunks(FASTA_LINE_WIDTH) {
            self.writer.write_all(chunk)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

// ============================================================================
// FASTQ Format
// ============================================================================

/// FASTQ reader; qualities are decoded to integer scores.
///
/// The Phred offset is chosen from the first record: 64 if every quality
/// character is at least `@`, otherwise 33.
pub struct FastqReader<R: BufRead> {
    reader: R,
    line_buf: String,
    phred_offset: Option<u8>,
}

impl FastqReader<Box<dyn BufRead + Send>> {
    /// Opens a FASTQ file (plain or `.gz`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = open_text(path.as_ref())
            .with_context(|| format!("Failed to open FASTQ: {}", path.as_ref().display()))?;
        Ok(Self::new(reader))
    }
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: String::with_capacity(512),
            phred_offset: None,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        self.line_buf.clear();
        if self.reader.read_line(&mut self.line_buf)? == 0 {
            return Ok(None);
        }
        Ok(Some(self.line_buf.trim_end().to_string()))
    }

    /// Reads the next record (4 lines per record).
    ///
    /// # FASTQ Format
    /// ```text
    /// @read_name description
    /// SEQUENCE
    /// +
    /// QUALITY
    /// ```
    pub fn read_next(&mut self) -> Result<Option<Sequence>> {
        // Line 1: @name, skipping blank lines
        let header = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(l) if l.trim().is_empty() => continue,
                Some(l) => break l,
            }
        };
        let Some(header) = header.trim_start().strip_prefix('@') else {
            anyhow::bail!("Invalid FASTQ header: {}", header);
        };
        let (name, defline) = split_header(header);

        // Line 2: sequence
        let seq = self
            .next_line()?
            .with_context(|| format!("Truncated FASTQ record: {}", name))?;

        // Line 3: + (separator, ignored)
        self.next_line()?
            .with_context(|| format!("Truncated FASTQ record: {}", name))?;

        // Line 4: quality scores
        let qual = self
            .next_line()?
            .with_context(|| format!("Truncated FASTQ record: {}", name))?;
        if qual.len() != seq.len() {
            anyhow::bail!(
                "FASTQ record {} has {} bases but {} quality scores",
                name,
                seq.len(),
                qual.len()
            );
        }

        let offset = *self
            .phred_offset
            .get_or_insert_with(|| if qual.bytes().all(|b| b >= 64) { 64 } else { 33 });
        let scores = qual.bytes().map(|b| b.saturating_sub(offset)).collect();

        Ok(Some(
            Sequence::new(name, seq)
                .with_defline(defline)
                .with_qual(scores),
        ))
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<Sequence>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Reads every sequence of a FASTA or FASTQ file (plain or `.gz`).
pub fn read_sequences<P: AsRef<Path>>(path: P) -> Result<Vec<Sequence>> {
    let path = path.as_ref();
    let format = SeqFormat::detect_path(path)?;
    let records = match format {
        Some(SeqFormat::Fastq) => FastqReader::open(path)?.collect::<Result<Vec<_>>>(),
        Some(SeqFormat::Fasta) | None => FastaReader::open(path)?.collect::<Result<Vec<_>>>(),
        Some(SeqFormat::Gff) => anyhow::bail!("{} is a GFF file, not sequences", path.display()),
    };
    records.with_context(|| format!("Failed to read sequences: {}", path.display()))
}

// ============================================================================
// GFF3 Format
// ============================================================================

/// GFF3 writer; the version header is written with the first feature.
pub struct GffWriter<W: Write> {
    writer: W,
    wrote_header: bool,
}

impl GffWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create GFF: {}", path.as_ref().display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> GffWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            wrote_header: false,
        }
    }

    pub fn write(&mut self, annotation: &Annotation) -> Result<()> {
        if !self.wrote_header {
            writeln!(self.writer, "##gff-version 3")?;
            self.wrote_header = true;
        }
        writeln!(self.writer, "{}", annotation)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Parses GFF features from a reader, skipping comments and blank lines.
pub fn parse_annotations<R: BufRead>(
    reader: R,
    name_key: &str,
    namer: &UnknownNamer,
) -> Result<Vec<Annotation>> {
    let mut features = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let feature = Annotation::parse_line(&line, name_key, namer)
            .with_context(|| format!("Invalid GFF line {}", i + 1))?;
        features.push(feature);
    }
    Ok(features)
}

/// Reads every feature of a GFF file.
pub fn read_annotations<P: AsRef<Path>>(
    path: P,
    name_key: &str,
    namer: &UnknownNamer,
) -> Result<Vec<Annotation>> {
    let reader = open_text(path.as_ref())?;
    parse_annotations(reader, name_key, namer)
        .with_context(|| format!("Failed to read GFF: {}", path.as_ref().display()))
}
