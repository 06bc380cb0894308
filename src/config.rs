//! Runtime parameters for the gene prediction pipeline.

use crate::align::{Scoring, SubstitutionMatrix, TetheredAligner};
use crate::orf::{all_codons, parse_codon, Codon, OrfConfig};
use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("allowable length error must be between 0 and 1, inclusive (got {0})")]
    LengthErrorOutOfRange(f64),
    #[error("minimum identity must be between 0 and 1, inclusive (got {0})")]
    IdentityOutOfRange(f64),
    #[error("maximum e-value must be positive (got {0})")]
    NonPositiveEvalue(f64),
    #[error("thread count must be at least 1")]
    ZeroThreads,
    #[error("'{0}' is not a codon")]
    InvalidCodon(String),
    #[error("no {0} codons configured")]
    EmptyCodonSet(&'static str),
    #[error("gap costs must not be negative (create {create}, extend {extend})")]
    NegativeGapCost { create: i32, extend: i32 },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Start codons; `*` means every codon that is not a stop.
    pub start_codons: Vec<String>,

    pub stop_codons: Vec<String>,

    /// Minimum ORF length in nucleotides, stop codon included.
    pub min_orf_len: usize,

    pub max_evalue: f64,

    pub min_identity: f64,

    /// Allowed relative length difference, `|hit - ref| / ref`.
    pub length_err: f64,

    /// Alignment workers per run, including the producer thread.
    pub threads: usize,

    pub matrix: SubstitutionMatrix,

    pub scoring: Scoring,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_codons: vec!["ATG".to_string()],
            stop_codons: vec!["TAG".to_string(), "TAA".to_string(), "TGA".to_string()],
            min_orf_len: 300,
            max_evalue: 1e-30,
            min_identity: 0.45,
            length_err: 0.2,
            threads: 16,
            matrix: SubstitutionMatrix::blosum62(),
            scoring: Scoring::default(),
        }
    }
}

impl PipelineConfig {
    /// Checks every parameter; called once before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.length_err) {
            return Err(ConfigError::LengthErrorOutOfRange(self.length_err));
        }
        if !(0.0..=1.0).contains(&self.min_identity) {
            return Err(ConfigError::IdentityOutOfRange(self.min_identity));
        }
        if !(self.max_evalue > 0.0) {
            return Err(ConfigError::NonPositiveEvalue(self.max_evalue));
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.scoring.create < 0 || self.scoring.extend < 0 {
            return Err(ConfigError::NegativeGapCost {
                create: self.scoring.create,
                extend: self.scoring.extend,
            });
        }
        self.orf_config().map(|_| ())
    }

    fn stop_set(&self) -> Result<FxHashSet<Codon>, ConfigError> {
        let stops = parse_codons(&self.stop_codons)?;
        if stops.is_empty() {
            return Err(ConfigError::EmptyCodonSet("stop"));
        }
        Ok(stops)
    }

    /// Scanner settings with the `*` start wildcard expanded.
    pub fn orf_config(&self) -> Result<OrfConfig, ConfigError> {
        let stop_codons = self.stop_set()?;
        let start_codons: FxHashSet<Codon> = if self.start_codons.iter().any(|c| c.trim() == "*") {
            all_codons().filter(|c| !stop_codons.contains(c)).collect()
        } else {
            parse_codons(&self.start_codons)?
        };
        if start_codons.is_empty() {
            return Err(ConfigError::EmptyCodonSet("start"));
        }
        Ok(OrfConfig {
            start_codons,
            stop_codons,
            min_length: self.min_orf_len,
        })
    }

    /// Aligner anchored on the residues the start codons encode.
    pub fn aligner(&self) -> Result<TetheredAligner, ConfigError> {
        let orf = self.orf_config()?;
        let mut aligner = TetheredAligner::new(orf.start_residues(), self.length_err)
            .with_scoring(self.scoring.clone());
        aligner.matrix = self.matrix.clone();
        Ok(aligner)
    }
}

fn parse_codons(codons: &[String]) -> Result<FxHashSet<Codon>, ConfigError> {
    codons
        .iter()
        .map(|c| parse_codon(c).ok_or_else(|| ConfigError::InvalidCodon(c.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        let orf = config.orf_config().unwrap();
        assert_eq!(orf.start_codons.len(), 1);
        assert_eq!(orf.stop_codons.len(), 3);
        assert_eq!(orf.min_length, 300);
    }

    #[test]
    fn test_wildcard_start() {
        let config = PipelineConfig {
            start_codons: vec!["*".to_string()],
            ..PipelineConfig::default()
        };
        let orf = config.orf_config().unwrap();
        assert_eq!(orf.start_codons.len(), 61);
        assert!(!orf.start_codons.contains(b"TAA"));
        assert!(orf.start_codons.contains(b"TTG"));
    }

    #[test]
    fn test_alternative_start_residues() {
        let config = PipelineConfig {
            start_codons: vec!["ATG".to_string(), "gtg".to_string(), "TTG".to_string()],
            ..PipelineConfig::default()
        };
        let aligner = config.aligner().unwrap();
        let expected: FxHashSet<u8> = [b'M', b'V', b'L'].into_iter().collect();
        assert_eq!(aligner.start_residues, expected);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let bad = |f: fn(&mut PipelineConfig)| {
            let mut config = PipelineConfig::default();
            f(&mut config);
            config.validate()
        };
        assert_eq!(bad(|c| c.length_err = 1.5), Err(ConfigError::LengthErrorOutOfRange(1.5)));
        assert_eq!(bad(|c| c.length_err = -0.1), Err(ConfigError::LengthErrorOutOfRange(-0.1)));
        assert_eq!(bad(|c| c.min_identity = 2.0), Err(ConfigError::IdentityOutOfRange(2.0)));
        assert_eq!(bad(|c| c.max_evalue = 0.0), Err(ConfigError::NonPositiveEvalue(0.0)));
        assert_eq!(bad(|c| c.threads = 0), Err(ConfigError::ZeroThreads));
        assert_eq!(
            bad(|c| c.stop_codons = vec!["TAX".to_string()]),
            Err(ConfigError::InvalidCodon("TAX".to_string()))
        );
        assert_eq!(bad(|c| c.stop_codons.clear()), Err(ConfigError::EmptyCodonSet("stop")));
        assert_eq!(bad(|c| c.start_codons.clear()), Err(ConfigError::EmptyCodonSet("start")));
        assert!(bad(|c| c.length_err = 1.0).is_ok());
        assert!(bad(|c| c.length_err = 0.0).is_ok());
    }
}
