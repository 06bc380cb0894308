//! Open Reading Frame Scanner
//!
//! Single-pass, six-frame ORF discovery. The forward strand and its reverse
//! complement are walked together one position at a time; each of the six
//! frames keeps only two cursors (pending start, last stop), so the scan is
//! linear and nothing is ever re-read.
//!
//! Per frame the first start codon after a stop opens an ORF and the next stop
//! closes it, which yields the longest ORF of every open interval and never a
//! nested one. The reported slice includes the stop codon.

use crate::sequence::{Sequence, SequenceKind};
use rustc_hash::FxHashSet;

pub type Codon = [u8; 3];

pub const DEFAULT_START_CODONS: &[&str] = &["ATG"];
pub const DEFAULT_STOP_CODONS: &[&str] = &["TAG", "TAA", "TGA"];
pub const DEFAULT_MIN_ORF_LEN: usize = 300;

/// Normalises a codon string: upper case, `U` read as `T`. Returns `None`
/// unless it is exactly three of `ACGTU`.
pub fn parse_codon(s: &str) -> Option<Codon> {
    let bytes = s.trim().as_bytes();
    if bytes.len() != 3 {
        return None;
    }
    let mut codon = [0u8; 3];
    for (slot, &b) in codon.iter_mut().zip(bytes) {
        *slot = match b.to_ascii_uppercase() {
            b'U' => b'T',
            c @ (b'A' | b'C' | b'G' | b'T') => c,
            _ => return None,
        };
    }
    Some(codon)
}

/// All 64 codons over `ACGT`.
pub fn all_codons() -> impl Iterator<Item = Codon> {
    const DNA: [u8; 4] = *b"ACGT";
    DNA.into_iter().flat_map(|a| {
        DNA.into_iter()
            .flat_map(move |b| DNA.into_iter().map(move |c| [a, b, c]))
    })
}

/// Scanner parameters.
#[derive(Debug, Clone)]
pub struct OrfConfig {
    pub start_codons: FxHashSet<Codon>,
    pub stop_codons: FxHashSet<Codon>,
    /// Minimum ORF length in nucleotides, stop codon included.
    pub min_length: usize,
}

impl Default for OrfConfig {
    fn default() -> Self {
        Self {
            start_codons: DEFAULT_START_CODONS.iter().filter_map(|c| parse_codon(c)).collect(),
            stop_codons: DEFAULT_STOP_CODONS.iter().filter_map(|c| parse_codon(c)).collect(),
            min_length: DEFAULT_MIN_ORF_LEN,
        }
    }
}

impl OrfConfig {
    /// Amino acids encoded by the start codons.
    pub fn start_residues(&self) -> FxHashSet<u8> {
        self.start_codons
            .iter()
            .filter_map(|c| std::str::from_utf8(c).ok())
            .filter_map(crate::sequence::translate_codon)
            .map(|aa| aa as u8)
            .collect()
    }
}

/// Lazy iterator over the ORFs of one nucleotide sequence.
///
/// Forward-strand ORFs are slices of the input; reverse-strand ORFs are slices
/// of its reverse complement, so both carry correct locations and strands.
pub struct OrfScanner<'a> {
    forward: &'a Sequence,
    reverse: Sequence,
    config: &'a OrfConfig,
    /// Frames 0..3 are reverse, 3..6 forward.
    starts: [Option<usize>; 6],
    stops: [usize; 6],
    pos: usize,
    limit: usize,
    queued: Option<Sequence>,
}

impl<'a> OrfScanner<'a> {
    pub fn new(seq: &'a Sequence, config: &'a OrfConfig) -> Self {
        let limit = match seq.kind {
            SequenceKind::Nucleotide => seq.len().saturating_sub(2),
            SequenceKind::Protein => 0,
        };
        Self {
            forward: seq,
            reverse: seq.reverse_complement(),
            config,
            starts: [None; 6],
            stops: [0; 6],
            pos: 0,
            limit,
            queued: None,
        }
    }

    /// Advances one frame at position `i`; returns the closed ORF range.
    fn step(&mut self, frame: usize, codon: Option<Codon>, i: usize) -> Option<(usize, usize)> {
        let codon = codon?;
        if self.config.stop_codons.contains(&codon) {
            let closed = match self.starts[frame] {
                Some(s) if s >= self.stops[frame] && i + 3 - s >= self.config.min_length => {
                    Some((s, i + 3))
                }
                _ => None,
            };
            self.stops[frame] = i + 3;
            closed
        } else {
            if self.config.start_codons.contains(&codon)
                && self.starts[frame].is_none_or(|s| s < self.stops[frame])
            {
                self.starts[frame] = Some(i);
            }
            None
        }
    }
}

fn codon_at(seq: &str, i: usize) -> Option<Codon> {
    let b = seq.as_bytes().get(i..i + 3)?;
    let mut codon = [b[0], b[1], b[2]];
    for c in codon.iter_mut() {
        *c = match c.to_ascii_uppercase() {
            b'U' => b'T',
            other => other,
        };
    }
    Some(codon)
}

impl Iterator for OrfScanner<'_> {
    type Item = Sequence;

    fn next(&mut self) -> Option<Sequence> {
        if let Some(orf) = self.queued.take() {
            return Some(orf);
        }
        while self.pos < self.limit {
            let i = self.pos;
            self.pos += 1;

            let fwd = self.step(3 + i % 3, codon_at(&self.forward.seq, i), i);
            let rev = self.step(i % 3, codon_at(&self.reverse.seq, i), i);

            let fwd = fwd.map(|(a, b)| self.forward.slice(a..b));
            let rev = rev.map(|(a, b)| self.reverse.slice(a..b));
            match (fwd, rev) {
                (Some(f), r) => {
                    self.queued = r;
                    return Some(f);
                }
                (None, Some(r)) => return Some(r),
                (None, None) => {}
            }
        }
        None
    }
}

/// Collects every ORF of `seq`.
pub fn find_orfs(seq: &Sequence, config: &OrfConfig) -> Vec<Sequence> {
    OrfScanner::new(seq, config).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{reverse_complement, Location, Strand};

    fn config(min_length: usize) -> OrfConfig {
        OrfConfig {
            min_length,
            ..OrfConfig::default()
        }
    }

    #[test]
    fn test_parse_codon() {
        assert_eq!(parse_codon("atg"), Some(*b"ATG"));
        assert_eq!(parse_codon("AUG"), Some(*b"ATG"));
        assert_eq!(parse_codon("ATGC"), None);
        assert_eq!(parse_codon("ANG"), None);
        assert_eq!(all_codons().count(), 64);
    }

    #[test]
    fn test_start_residues() {
        let expected: FxHashSet<u8> = [b'M'].into_iter().collect();
        assert_eq!(OrfConfig::default().start_residues(), expected);
    }

    #[test]
    fn test_single_forward_orf() {
        let seq = Sequence::new("c", "CCATGAAACCCTAAGG");
        let orfs = find_orfs(&seq, &config(9));
        assert_eq!(orfs.len(), 1);
        assert_eq!(orfs[0].seq, "ATGAAACCCTAA");
        assert_eq!(orfs[0].location, Location::new(3, 14, Strand::Forward));
        assert_eq!(orfs[0].original_name(), "c");
    }

    #[test]
    fn test_min_length_includes_stop() {
        let seq = Sequence::new("c", "ATGAAATAA");
        assert_eq!(find_orfs(&seq, &config(9)).len(), 1);
        assert!(find_orfs(&seq, &config(10)).is_empty());
    }

    #[test]
    fn test_longest_orf_no_nesting() {
        // Second ATG is in frame and inside the first ORF.
        let seq = Sequence::new("c", "ATGAAAATGCCCTAA");
        let orfs = find_orfs(&seq, &config(3));
        let fwd: Vec<_> = orfs.iter().filter(|o| o.strand() == Strand::Forward).collect();
        assert_eq!(fwd.len(), 1);
        assert_eq!(fwd[0].seq, "ATGAAAATGCCCTAA");
    }

    #[test]
    fn test_reverse_strand_orf() {
        let orf = "ATGAAACCCTAA";
        let seq = Sequence::new("c", format!("GG{}CC", reverse_complement(orf)));
        let orfs = find_orfs(&seq, &config(9));
        assert_eq!(orfs.len(), 1);
        assert_eq!(orfs[0].seq, orf);
        assert_eq!(orfs[0].strand(), Strand::Reverse);
        assert_eq!(orfs[0].location, Location::new(3, 14, Strand::Reverse));
    }

    #[test]
    fn test_lowercase_input() {
        let seq = Sequence::new("c", "atgaaataa");
        assert_eq!(find_orfs(&seq, &config(9))[0].seq, "atgaaataa");
    }

    #[test]
    fn test_orfs_respect_codons_and_length() {
        let seq = Sequence::new(
            "c",
            "ATGCGTATGAAATAGCCATGGCGTTTAACTGAATGTTGACCATGTAGGCTTAAATGCCCGGGTTTAAA\
             TTACATTTACGCCATTAGTCATGACCCTTTGGTAGCATTGA",
        );
        let cfg = config(9);
        for orf in find_orfs(&seq, &cfg) {
            assert!(orf.len() >= 9);
            assert_eq!(orf.len() % 3, 0);
            assert!(cfg.start_codons.contains(&parse_codon(&orf.seq[..3]).unwrap()));
            assert!(cfg.stop_codons.contains(&parse_codon(&orf.seq[orf.len() - 3..]).unwrap()));
            assert_eq!(orf.len(), orf.location.len());
        }
    }

    #[test]
    fn test_strand_symmetry() {
        let seq = Sequence::new(
            "c",
            "TTATGCGTAAACCCGGGTAGCTTATTACATGGGCTTTCATAACGCATGCCCAAATTTGGGTGACTA",
        );
        let cfg = config(9);
        let rc = seq.reverse_complement();

        let split = |input: &Sequence| {
            let mut same: Vec<String> = Vec::new();
            let mut flipped: Vec<String> = Vec::new();
            for orf in find_orfs(input, &cfg) {
                if orf.strand() == input.strand() {
                    same.push(orf.seq);
                } else {
                    flipped.push(orf.seq);
                }
            }
            same.sort();
            flipped.sort();
            (same, flipped)
        };

        let (seq_same, seq_flipped) = split(&seq);
        let (rc_same, rc_flipped) = split(&rc);
        assert!(!seq_same.is_empty() || !seq_flipped.is_empty());
        assert_eq!(seq_same, rc_flipped);
        assert_eq!(seq_flipped, rc_same);
    }

    #[test]
    fn test_protein_has_no_orfs() {
        let seq = Sequence::new("p", "MKLWQESTP");
        assert!(find_orfs(&seq, &config(3)).is_empty());
    }
}
