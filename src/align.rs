//! Tethered Alignment Module
//!
//! Aligns a reference protein against the best suffix of a translated ORF
//! that begins with a start residue ("C-terminal tether"). Both strings are
//! reversed so that the shared C-terminus sits at the matrix origin; the
//! N-terminal end of the match is then free to stop at any start residue,
//! which is how the predicted gene's start codon is chosen.
//!
//! # Scoring
//! - Substitutions: BLOSUM62 plus `X` (0 against everything) and `*`
//!   (-9 against residues, 0 against `*`). Unknown letters score as `X`.
//! - Gaps: each gap column costs `extend`; the first gap column after a
//!   diagonal step also costs `create`.
//! - Ties: diagonal beats a gap in the reference, which beats a gap in the
//!   translation.

use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlignError {
    #[error("translation contains no start residue")]
    NoStartCodon,
    #[error("reference sequence is empty")]
    EmptyReference,
    #[error("alignment matrix of {cells} cells exceeds the limit of {limit}")]
    MatrixTooLarge { cells: usize, limit: usize },
}

// ============================================================================
// Substitution Matrix
// ============================================================================

const ALPHABET: &[u8; 22] = b"ARNDCQEGHILKMFPSTWYVX*";
const X_INDEX: usize = 20;
const STOP_INDEX: usize = 21;

#[rustfmt::skip]
const BLOSUM62: [[i32; 20]; 20] = [
    //A   R   N   D   C   Q   E   G   H   I   L   K   M   F   P   S   T   W   Y   V
    [ 4, -1, -2, -2,  0, -1, -1,  0, -2, -1, -1, -1, -1, -2, -1,  1,  0, -3, -2,  0], // A
    [-1,  5,  0, -2, -3,  1,  0, -2,  0, -3, -2,  2, -1, -3, -2, -1, -1, -3, -2, -3], // R
    [-2,  0,  6,  1, -3,  0,  0,  0,  1, -3, -3,  0, -2, -3, -2,  1,  0, -4, -2, -3], // N
    [-2, -2,  1,  6, -3,  0,  2, -1, -1, -3, -4, -1, -3, -3, -1,  0, -1, -4, -3, -3], // D
    [ 0, -3, -3, -3,  9, -3, -4, -3, -3, -1, -1, -3, -1, -2, -3, -1, -1, -2, -2, -1], // C
    [-1,  1,  0,  0, -3,  5,  2, -2,  0, -3, -2,  1,  0, -3, -1,  0, -1, -2, -1, -2], // Q
    [-1,  0,  0,  2, -4,  2,  5, -2,  0, -3, -3,  1, -2, -3, -1,  0, -1, -3, -2, -2], // E
    [ 0, -2,  0, -1, -3, -2, -2,  6, -2, -4, -4, -2, -3, -3, -2,  0, -2, -2, -3, -3], // G
    [-2,  0,  1, -1, -3,  0,  0, -2,  8, -3, -3, -1, -2, -1, -2, -1, -2, -2,  2, -3], // H
    [-1, -3, -3, -3, -1, -3, -3, -4, -3,  4,  2, -3,  1,  0, -3, -2, -1, -3, -1,  3], // I
    [-1, -2, -3, -4, -1, -2, -3, -4, -3,  2,  4, -2,  2,  0, -3, -2, -1, -2, -1,  1], // L
    [-1,  2,  0, -1, -3,  1,  1, -2, -1, -3, -2,  5, -1, -3, -1,  0, -1, -3, -2, -2], // K
    [-1, -1, -2, -3, -1,  0, -2, -3, -2,  1,  2, -1,  5,  0, -2, -1, -1, -1, -1,  1], // M
    [-2, -3, -3, -3, -2, -3, -3, -3, -1,  0,  0, -3,  0,  6, -4, -2, -2,  1,  3, -1], // F
    [-1, -2, -2, -1, -3, -1, -1, -2, -2, -3, -3, -1, -2, -4,  7, -1, -1, -4, -3, -2], // P
    [ 1, -1,  1,  0, -1,  0,  0,  0, -1, -2, -2,  0, -1, -2, -1,  4,  1, -3, -2, -2], // S
    [ 0, -1,  0, -1, -1, -1, -1, -2, -2, -1, -1, -1, -1, -2, -1,  1,  5, -2, -2,  0], // T
    [-3, -3, -4, -4, -2, -2, -3, -2, -2, -3, -2, -3, -1,  1, -4, -3, -2, 11,  2, -3], // W
    [-2, -2, -2, -3, -2, -1, -2, -3,  2, -1, -1, -2, -1,  3, -3, -2, -2,  2,  7, -1], // Y
    [ 0, -3, -3, -3, -1, -2, -2, -3, -3,  3,  1, -2,  1, -1, -2, -2,  0, -3, -1,  4], // V
];

/// Residue-pair scores over `ALPHABET`.
#[derive(Debug, Clone)]
pub struct SubstitutionMatrix {
    scores: [[i32; 22]; 22],
    lookup: [u8; 256],
}

impl SubstitutionMatrix {
    pub fn blosum62() -> Self {
        let mut scores = [[0i32; 22]; 22];
        for (a, row) in BLOSUM62.iter().enumerate() {
            scores[a][..20].copy_from_slice(row);
            scores[a][STOP_INDEX] = -9;
            scores[STOP_INDEX][a] = -9;
        }
        // X row/column stay 0, as does '*' against '*' and 'X'.

        let mut lookup = [X_INDEX as u8; 256];
        for (i, &aa) in ALPHABET.iter().enumerate() {
            lookup[aa as usize] = i as u8;
            lookup[aa.to_ascii_lowercase() as usize] = i as u8;
        }
        Self { scores, lookup }
    }

    pub fn score(&self, a: u8, b: u8) -> i32 {
        self.scores[self.lookup[a as usize] as usize][self.lookup[b as usize] as usize]
    }
}

impl Default for SubstitutionMatrix {
    fn default() -> Self {
        Self::blosum62()
    }
}

// ============================================================================
// Scoring and Result
// ============================================================================

/// Gap costs and resource limits.
#[derive(Debug, Clone)]
pub struct Scoring {
    pub create: i32,
    pub extend: i32,
    /// Refuse alignments whose matrix would exceed this many cells.
    pub max_cells: Option<usize>,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            create: 10,
            extend: 1,
            max_cells: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    /// Aligned translation (N to C, `-` for gaps).
    pub query: String,
    /// Aligned reference (N to C, `-` for gaps).
    pub subject: String,
    pub score: i32,
    /// Number of alignment columns.
    pub length: usize,
    /// Translation residues consumed; the suffix of the translation used.
    pub sublength: usize,
    pub identities: usize,
    pub gaps: usize,
}

impl Alignment {
    /// `identities / length`.
    pub fn identity(&self) -> f64 {
        if self.length == 0 {
            return 0.0;
        }
        self.identities as f64 / self.length as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Diagonal,
    /// Consumes a translation residue (gap in the reference).
    SkipTranslation,
    /// Consumes a reference residue (gap in the translation).
    SkipReference,
}

// ============================================================================
// Aligner
// ============================================================================

pub struct TetheredAligner {
    pub matrix: SubstitutionMatrix,
    pub scoring: Scoring,
    /// Residues that may begin the aligned suffix (upper case).
    pub start_residues: FxHashSet<u8>,
    /// Maximum unconsumed fraction of the reference.
    pub length_err: f64,
}

impl TetheredAligner {
    pub fn new(start_residues: FxHashSet<u8>, length_err: f64) -> Self {
        Self {
            matrix: SubstitutionMatrix::blosum62(),
            scoring: Scoring::default(),
            start_residues,
            length_err,
        }
    }

    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = scoring;
        self
    }

    fn is_start(&self, residue: u8) -> bool {
        self.start_residues.contains(&residue.to_ascii_uppercase())
    }

    /// Aligns `reference` against the best start-anchored suffix of
    /// `translation`.
    ///
    /// The whole reference is always reported: reference residues N-terminal
    /// of the optimum appear as leading columns against `-`.
    pub fn align(&self, reference: &str, translation: &str) -> Result<Alignment, AlignError> {
        if !translation.bytes().any(|b| self.is_start(b)) {
            return Err(AlignError::NoStartCodon);
        }
        if reference.is_empty() {
            return Err(AlignError::EmptyReference);
        }

        let v: Vec<u8> = reference.bytes().rev().collect();
        let w: Vec<u8> = translation.bytes().rev().collect();
        let (lv, lw) = (v.len(), w.len());
        if let Some(limit) = self.scoring.max_cells {
            let cells = lv.saturating_mul(lw);
            if cells > limit {
                return Err(AlignError::MatrixTooLarge { cells, limit });
            }
        }

        let Scoring { create, extend, .. } = self.scoring;
        let cols = lw + 1;
        let cells = (lv + 1) * cols;
        let mut score = vec![0i32; cells];
        let mut open = vec![0i32; cells];
        let mut trace = vec![Step::Diagonal; cells];

        open[0] = create;
        for j in 1..=lw {
            score[j] = -(j as i32) * extend;
            trace[j] = Step::SkipTranslation;
        }
        for i in 1..=lv {
            score[i * cols] = -(i as i32) * extend;
            trace[i * cols] = Step::SkipReference;
        }

        let mut best: Option<(i32, usize, usize)> = None;
        for i in 1..=lv {
            let row_ok = lv.abs_diff(i) as f64 / lv as f64 <= self.length_err;
            for j in 1..=lw {
                let cell = i * cols + j;
                let up = cell - cols;
                let left = cell - 1;

                let diag = score[up - 1] + self.matrix.score(v[i - 1], w[j - 1]);
                let skip_t = score[left] - extend - open[left];
                let skip_r = score[up] - extend - open[up];

                let (s, step) = if diag >= skip_t && diag >= skip_r {
                    (diag, Step::Diagonal)
                } else if skip_t >= skip_r {
                    (skip_t, Step::SkipTranslation)
                } else {
                    (skip_r, Step::SkipReference)
                };
                score[cell] = s;
                trace[cell] = step;
                open[cell] = if step == Step::Diagonal { create } else { 0 };

                if row_ok && self.is_start(w[j - 1]) && best.is_none_or(|(b, _, _)| s > b) {
                    best = Some((s, i, j));
                }
            }
        }

        let Some((best_score, bi, bj)) = best else {
            return Err(AlignError::NoStartCodon);
        };

        // Leading reference residues the tethered match did not reach.
        let lead = lv - bi;
        let mut subject: Vec<u8> = reference.as_bytes()[..lead].to_vec();
        let mut query: Vec<u8> = vec![b'-'; lead];
        let (mut length, mut gaps) = (lead, lead);
        let (mut sublength, mut identities) = (0, 0);

        // Walking back toward the origin visits columns in N to C order.
        let (mut i, mut j) = (bi, bj);
        while i > 0 || j > 0 {
            match trace[i * cols + j] {
                Step::Diagonal => {
                    subject.push(v[i - 1]);
                    query.push(w[j - 1]);
                    if v[i - 1].eq_ignore_ascii_case(&w[j - 1]) {
                        identities += 1;
                    }
                    sublength += 1;
                    i -= 1;
                    j -= 1;
                }
                Step::SkipTranslation => {
                    subject.push(b'-');
                    query.push(w[j - 1]);
                    gaps += 1;
                    sublength += 1;
                    j -= 1;
                }
                Step::SkipReference => {
                    subject.push(v[i - 1]);
                    query.push(b'-');
                    gaps += 1;
                    i -= 1;
                }
            }
            length += 1;
        }

        Ok(Alignment {
            query: String::from_utf8_lossy(&query).into_owned(),
            subject: String::from_utf8_lossy(&subject).into_owned(),
            score: best_score,
            length,
            sublength,
            identities,
            gaps,
        })
    }
}
