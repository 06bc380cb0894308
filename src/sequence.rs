//! Sequence Model Module
//!
//! Immutable sequence values shared by every stage of the pipeline.
//!
//! A [`Sequence`] always knows where it came from: its [`Location`] is expressed
//! in the coordinate space of the root sequence it was derived from, and the
//! root's name is kept in a handle shared by every derived value. Deriving a new
//! sequence (slicing, reverse-complementing, translating) never touches the
//! source value.
//!
//! # Coordinates
//! Locations are 1-based and inclusive with `start <= end`. Orientation is an
//! explicit [`Strand`]. For a reverse-strand sequence, local index 0 is the
//! residue at the *highest* original coordinate.

use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, LazyLock};

// ============================================================================
// Strand and Location
// ============================================================================

/// Orientation relative to the root sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// Returns the opposite strand.
    pub fn flip(self) -> Self {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }

    /// `+1` for forward, `-1` for reverse.
    pub fn sign(self) -> i32 {
        match self {
            Strand::Forward => 1,
            Strand::Reverse => -1,
        }
    }

    /// GFF strand column symbol.
    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

/// A span on the root sequence (1-based, inclusive, `start <= end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub start: usize,
    pub end: usize,
    pub strand: Strand,
}

impl Location {
    /// Builds a location, normalising the endpoints so that `start <= end`.
    pub fn new(a: usize, b: usize, strand: Strand) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
            strand,
        }
    }

    /// Number of original positions covered.
    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

// ============================================================================
// Sequence Kind
// ============================================================================

/// Residue alphabet of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Nucleotide,
    Protein,
}

const NUCLEOTIDE_ALPHABET: &[u8] = b"ATUCGNYRatucgnyr- ";

impl SequenceKind {
    /// Guesses the alphabet: any character outside the nucleotide set
    /// (including the ambiguity codes N, Y, R) marks a protein.
    pub fn infer(residues: &str) -> Self {
        if residues.bytes().all(|b| NUCLEOTIDE_ALPHABET.contains(&b)) {
            SequenceKind::Nucleotide
        } else {
            SequenceKind::Protein
        }
    }
}

// ============================================================================
// Origin
// ============================================================================

/// Identity of the root sequence a [`Sequence`] was derived from.
///
/// Shared through an `Arc` by the root and every slice, so that thousands of
/// ORFs can point back at one genome without copying its residues. Only the
/// name is kept; callers that need the root residues hold the root itself.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Origin {
    name: String,
}

// ============================================================================
// Sequence
// ============================================================================

/// A named residue string with its position in the original coordinate space.
///
/// Equality follows name and residues; hashing uses residues only.
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Identifier (first word of a FASTA header).
    pub name: String,
    /// Residues.
    pub seq: String,
    /// Optional per-residue quality scores, same length as `seq`.
    pub qual: Option<Vec<u8>>,
    /// Residue alphabet.
    pub kind: SequenceKind,
    /// Span on the root sequence. For translations this is still the
    /// nucleotide span the protein was read from.
    pub location: Location,
    /// Free-text description.
    pub defline: String,
    origin: Arc<Origin>,
}

impl Sequence {
    /// Creates a root sequence. Its kind is inferred from the residues and it
    /// is its own origin.
    pub fn new(name: impl Into<String>, seq: impl Into<String>) -> Self {
        let name = name.into();
        let seq = seq.into();
        Self {
            kind: SequenceKind::infer(&seq),
            location: Location::new(1, seq.len(), Strand::Forward),
            origin: Arc::new(Origin { name: name.clone() }),
            qual: None,
            defline: String::new(),
            name,
            seq,
        }
    }

    pub fn with_defline(mut self, defline: impl Into<String>) -> Self {
        self.defline = defline.into();
        self
    }

    pub fn with_qual(mut self, qual: Vec<u8>) -> Self {
        self.qual = Some(qual);
        self
    }

    /// Re-labels a derived sequence while keeping its residues, location and
    /// origin.
    pub fn renamed(&self, name: impl Into<String>, defline: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defline: defline.into(),
            ..self.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Name of the root sequence.
    pub fn original_name(&self) -> &str {
        &self.origin.name
    }

    pub fn strand(&self) -> Strand {
        self.location.strand
    }

    /// Returns the sub-sequence at local indices `range` (0-based, half-open).
    ///
    /// The location is recomputed against the root: on the reverse strand,
    /// local index `i` maps to original coordinate `end - i`.
    ///
    /// # Panics
    /// Panics if `range` is out of bounds, as string slicing does.
    pub fn slice(&self, range: Range<usize>) -> Sequence {
        let Range { start: a, end: b } = range;
        let seq = self.seq[a..b].to_string();
        let qual = self.qual.as_ref().map(|q| q[a..b].to_vec());

        let location = match self.location.strand {
            Strand::Forward => Location {
                start: self.location.start + a,
                end: (self.location.start + b).saturating_sub(1),
                strand: Strand::Forward,
            },
            Strand::Reverse => Location {
                start: (self.location.end + 1).saturating_sub(b),
                end: self.location.end.saturating_sub(a),
                strand: Strand::Reverse,
            },
        };

        Sequence {
            name: self.name.clone(),
            seq,
            qual,
            kind: self.kind,
            location,
            defline: String::new(),
            origin: Arc::clone(&self.origin),
        }
    }

    /// Reverse complement on the opposite strand, covering the same span.
    ///
    /// Protein sequences are returned unchanged.
    pub fn reverse_complement(&self) -> Sequence {
        if self.kind == SequenceKind::Protein {
            return self.clone();
        }

        Sequence {
            name: self.name.clone(),
            seq: reverse_complement(&self.seq),
            qual: self.qual.as_ref().map(|q| q.iter().rev().copied().collect()),
            kind: self.kind,
            location: Location {
                strand: self.location.strand.flip(),
                ..self.location
            },
            defline: self.defline.clone(),
            origin: Arc::clone(&self.origin),
        }
    }

    /// Translates with the standard genetic code. Trailing bases that do not
    /// fill a codon are dropped; unknown codons become `X`, stops `*`.
    pub fn translate(&self) -> Sequence {
        Sequence {
            name: self.name.clone(),
            seq: translate(&self.seq),
            qual: None,
            kind: SequenceKind::Protein,
            location: self.location,
            defline: self.defline.clone(),
            origin: Arc::clone(&self.origin),
        }
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.name == other.name
    }
}

impl Eq for Sequence {}

impl Hash for Sequence {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

// ============================================================================
// Complement
// ============================================================================

fn complement_base(c: char, rna: bool) -> char {
    match c {
        'A' => if rna { 'U' } else { 'T' },
        'a' => if rna { 'u' } else { 't' },
        'T' | 'U' => 'A',
        't' | 'u' => 'a',
        'C' => 'G',
        'c' => 'g',
        'G' => 'C',
        'g' => 'c',
        'R' => 'Y',
        'r' => 'y',
        'Y' => 'R',
        'y' => 'r',
        ' ' => ' ',
        '-' => '-',
        _ => 'N',
    }
}

/// Reverse complement of a DNA or RNA string.
///
/// RNA pairing is used only when the input contains `U` and no `T`.
/// Case is preserved; characters without a partner become `N`.
pub fn reverse_complement(seq: &str) -> String {
    let has_u = seq.bytes().any(|b| b == b'U' || b == b'u');
    let has_t = seq.bytes().any(|b| b == b'T' || b == b't');
    let rna = has_u && !has_t;
    seq.chars().rev().map(|c| complement_base(c, rna)).collect()
}

// ============================================================================
// Codon Table
// ============================================================================

/// Standard genetic code codon table.
static CODON_TABLE: LazyLock<FxHashMap<&'static str, char>> = LazyLock::new(|| {
    let mut table = FxHashMap::default();
    // Phenylalanine (F)
    table.insert("TTT", 'F'); table.insert("TTC", 'F');
    // Leucine (L)
    table.insert("TTA", 'L'); table.insert("TTG", 'L');
    table.insert("CTT", 'L'); table.insert("CTC", 'L');
    table.insert("CTA", 'L'); table.insert("CTG", 'L');
    // Isoleucine (I)
    table.insert("ATT", 'I'); table.insert("ATC", 'I'); table.insert("ATA", 'I');
    // Methionine (M)
    table.insert("ATG", 'M');
    // Valine (V)
    table.insert("GTT", 'V'); table.insert("GTC", 'V');
    table.insert("GTA", 'V'); table.insert("GTG", 'V');
    // Serine (S)
    table.insert("TCT", 'S'); table.insert("TCC", 'S');
    table.insert("TCA", 'S'); table.insert("TCG", 'S');
    table.insert("AGT", 'S'); table.insert("AGC", 'S');
    // Proline (P)
    table.insert("CCT", 'P'); table.insert("CCC", 'P');
    table.insert("CCA", 'P'); table.insert("CCG", 'P');
    // Threonine (T)
    table.insert("ACT", 'T'); table.insert("ACC", 'T');
    table.insert("ACA", 'T'); table.insert("ACG", 'T');
    // Alanine (A)
    table.insert("GCT", 'A'); table.insert("GCC", 'A');
    table.insert("GCA", 'A'); table.insert("GCG", 'A');
    // Tyrosine (Y)
    table.insert("TAT", 'Y'); table.insert("TAC", 'Y');
    // Stop codons (*)
    table.insert("TAA", '*'); table.insert("TAG", '*'); table.insert("TGA", '*');
    // Histidine (H)
    table.insert("CAT", 'H'); table.insert("CAC", 'H');
    // Glutamine (Q)
    table.insert("CAA", 'Q'); table.insert("CAG", 'Q');
    // Asparagine (N)
    table.insert("AAT", 'N'); table.insert("AAC", 'N');
    // Lysine (K)
    table.insert("AAA", 'K'); table.insert("AAG", 'K');
    // Aspartic acid (D)
    table.insert("GAT", 'D'); table.insert("GAC", 'D');
    // Glutamic acid (E)
    table.insert("GAA", 'E'); table.insert("GAG", 'E');
    // Cysteine (C)
    table.insert("TGT", 'C'); table.insert("TGC", 'C');
    // Tryptophan (W)
    table.insert("TGG", 'W');
    // Arginine (R)
    table.insert("CGT", 'R'); table.insert("CGC", 'R');
    table.insert("CGA", 'R'); table.insert("CGG", 'R');
    table.insert("AGA", 'R'); table.insert("AGG", 'R');
    // Glycine (G)
    table.insert("GGT", 'G'); table.insert("GGC", 'G');
    table.insert("GGA", 'G'); table.insert("GGG", 'G');
    table
});

/// Translates a codon (3 nucleotides) to an amino acid. `U` is read as `T`.
pub fn translate_codon(codon: &str) -> Option<char> {
    let upper = codon.to_ascii_uppercase().replace('U', "T");
    CODON_TABLE.get(upper.as_str()).copied()
}

/// Translates a nucleotide string codon by codon.
pub fn translate(seq: &str) -> String {
    let usable = seq.len() / 3 * 3;
    seq.as_bytes()[..usable]
        .chunks_exact(3)
        .map(|codon| {
            std::str::from_utf8(codon)
                .ok()
                .and_then(translate_codon)
                .unwrap_or('X')
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
