//! GFF Feature Module
//!
//! [`Annotation`] is one GFF3 feature line. Its identity is derived from the
//! sequence name, feature type and span (`seqname_type[start:end]`), so two
//! features over the same span compare equal regardless of attributes.
//!
//! # Attribute Parsing
//! The 9th column is split on `;`. Each entry is split at the first `=`; when
//! the column contains no `=` at all, a space is used instead (GTF style).
//! Repeated keys are merged into one comma-joined value.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Attribute key used to name a feature unless configured otherwise.
pub const DEFAULT_NAME_KEY: &str = "ID";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GffParseError {
    #[error("expected 9 tab-separated columns, found {0}")]
    ColumnCount(usize),
    #[error("invalid coordinate '{0}'")]
    InvalidCoordinate(String),
}

// ============================================================================
// Unknown Namer
// ============================================================================

/// Hands out `unknown N` names for features without a name attribute.
///
/// Owned by whoever creates annotations; safe to share between threads.
#[derive(Debug, Default)]
pub struct UnknownNamer {
    count: AtomicUsize,
}

impl UnknownNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next name, starting at `unknown 1`.
    pub fn next_name(&self) -> String {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        format!("unknown {}", n)
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Insertion-ordered attribute map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value; a repeated key gets the value appended after a comma.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.push(',');
                existing.push_str(&value);
            }
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses a GFF attribute column.
    pub fn parse(column: &str) -> Self {
        let sep = if column.contains('=') { '=' } else { ' ' };
        let mut attrs = Self::new();
        for entry in column.trim().split(';').map(str::trim) {
            if let Some((key, value)) = entry.split_once(sep) {
                attrs.insert(key, value);
            }
        }
        attrs
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

// ============================================================================
// Annotation
// ============================================================================

#[derive(Debug, Clone)]
pub struct Annotation {
    pub seq_name: String,
    pub source: String,
    pub feature_type: String,
    pub start: usize,
    pub end: usize,
    pub score: String,
    /// `+`, `-`, or anything else for unknown (conventionally `.`).
    pub strand: String,
    pub phase: String,
    pub attributes: Attributes,
    pub id: String,
    pub name: String,
}

impl Annotation {
    /// Builds a feature. Coordinates are normalised so `start <= end`; the
    /// name comes from `name_key`, or from `namer` when that key is absent.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seq_name: impl Into<String>,
        source: impl Into<String>,
        feature_type: impl Into<String>,
        a: usize,
        b: usize,
        score: impl Into<String>,
        strand: impl Into<String>,
        phase: impl Into<String>,
        attributes: Attributes,
        name_key: &str,
        namer: &UnknownNamer,
    ) -> Self {
        let seq_name = seq_name.into();
        let feature_type = feature_type.into();
        let (start, end) = (a.min(b), a.max(b));
        let id = format!(
            "{}_{}[{}:{}]",
            if seq_name.is_empty() { "X" } else { seq_name.as_str() },
            feature_type,
            start,
            end
        );
        let name = match attributes.get(name_key) {
            Some(n) => n.to_string(),
            None => namer.next_name(),
        };

        Self {
            seq_name,
            source: source.into(),
            feature_type,
            start,
            end,
            score: score.into(),
            strand: strand.into(),
            phase: phase.into(),
            attributes,
            id,
            name,
        }
    }

    /// Parses one tab-separated GFF line.
    pub fn parse_line(
        line: &str,
        name_key: &str,
        namer: &UnknownNamer,
    ) -> Result<Self, GffParseError> {
        let cols: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
        if cols.len() != 9 {
            return Err(GffParseError::ColumnCount(cols.len()));
        }
        let coord = |s: &str| {
            s.trim()
                .parse::<usize>()
                .map_err(|_| GffParseError::InvalidCoordinate(s.to_string()))
        };

        Ok(Self::new(
            cols[0],
            cols[1],
            cols[2],
            coord(cols[3])?,
            coord(cols[4])?,
            cols[5],
            cols[6],
            cols[7],
            Attributes::parse(cols[8]),
            name_key,
            namer,
        ))
    }

    /// Number of positions covered.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Annotation {}

impl Hash for Annotation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.seq_name,
            self.source,
            self.feature_type,
            self.start,
            self.end,
            self.score,
            self.strand,
            self.phase,
            self.attributes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gff3_line() {
        let namer = UnknownNamer::new();
        let line = "chr1\tgeneseek\tgene\t300\t100\t.\t-\t0\tID=g1;homologs=a,b";
        let ann = Annotation::parse_line(line, DEFAULT_NAME_KEY, &namer).unwrap();

        assert_eq!(ann.start, 100);
        assert_eq!(ann.end, 300);
        assert_eq!(ann.id, "chr1_gene[100:300]");
        assert_eq!(ann.name, "g1");
        assert_eq!(ann.attributes.get("homologs"), Some("a,b"));
        assert_eq!(ann.len(), 201);
        assert_eq!(namer.next_name(), "unknown 1");
    }

    #[test]
    fn test_gtf_style_attributes() {
        let attrs = Attributes::parse("gene_id g1; transcript_id t1; gene_id g2");
        assert_eq!(attrs.get("gene_id"), Some("g1,g2"));
        assert_eq!(attrs.get("transcript_id"), Some("t1"));
    }

    #[test]
    fn test_unknown_names_count_up() {
        let namer = UnknownNamer::new();
        let a = Annotation::new(
            "", "src", "gene", 1, 10, ".", "+", "0", Attributes::new(), "ID", &namer,
        );
        let b = Annotation::new(
            "", "src", "gene", 5, 20, ".", "+", "0", Attributes::new(), "ID", &namer,
        );
        assert_eq!(a.name, "unknown 1");
        assert_eq!(b.name, "unknown 2");
        assert_eq!(a.id, "X_gene[1:10]");
    }

    #[test]
    fn test_equality_uses_id() {
        let namer = UnknownNamer::new();
        let mut attrs = Attributes::new();
        attrs.insert("ID", "x");
        let a = Annotation::new("c", "s1", "gene", 1, 9, ".", "+", "0", attrs, "ID", &namer);
        let b = Annotation::new("c", "s2", "gene", 9, 1, "5", "-", "1", Attributes::new(), "ID", &namer);
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_roundtrips_columns() {
        let namer = UnknownNamer::new();
        let line = "chr1\tsrc\tgene\t1\t9\t.\t+\t1\tID=g1;homologs=p1,p2";
        let ann = Annotation::parse_line(line, "ID", &namer).unwrap();
        assert_eq!(ann.to_string(), line);
    }

    #[test]
    fn test_bad_lines() {
        let namer = UnknownNamer::new();
        assert_eq!(
            Annotation::parse_line("a\tb\tc", "ID", &namer),
            Err(GffParseError::ColumnCount(3))
        );
        assert!(matches!(
            Annotation::parse_line("a\tb\tc\tx\t9\t.\t+\t0\t", "ID", &namer),
            Err(GffParseError::InvalidCoordinate(_))
        ));
    }
}
