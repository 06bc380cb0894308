//! Homolog Matching Pipeline
//!
//! Turns a stream of BLAST hits into gene calls on the candidate sequences.
//!
//! # Stages
//! 1. **Setup**: ORFs of every candidate are scanned once, in parallel, and
//!    database entries are indexed by name (nucleotide entries translated).
//! 2. **Filter**: hits are kept on e-value, identity and subject coverage.
//! 3. **Bind**: each hit is matched to candidate ORFs that overlap its query
//!    span in the same frame and have a plausible protein length.
//! 4. **Align**: each bound ORF is stop-trimmed, translated and tether-aligned
//!    to the database protein; the best one becomes the gene call.
//! 5. **Collapse**: calls with identical nucleotide sequence are merged into
//!    one predicted gene carrying every contributing homolog.
//!
//! Stages 2 to 4 run concurrently: the calling thread filters hits while the
//! BLAST report is still streaming and a fixed pool of workers aligns them.

use crate::align::{Alignment, TetheredAligner};
use crate::annotation::{Annotation, Attributes, UnknownNamer, DEFAULT_NAME_KEY};
use crate::blast::{BlastHit, BlastParseError};
use crate::config::{ConfigError, PipelineConfig};
use crate::orf::find_orfs;
use crate::sequence::{Location, Sequence, SequenceKind, Strand};
use crate::workqueue::run_pool;
use anyhow::Result;
use log::{debug, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::{Mutex, PoisonError};

/// Slack for the inclusive coverage threshold.
const COVERAGE_EPSILON: f64 = 1e-9;

// ============================================================================
// Records
// ============================================================================

/// A database entry ready for alignment.
#[derive(Debug, Clone)]
pub struct Reference {
    pub name: String,
    pub defline: String,
    /// Protein residues (translated for nucleotide entries).
    pub protein: String,
    /// Length of the entry as stored, used for hit coverage.
    pub length: usize,
}

impl Reference {
    fn from_sequence(seq: &Sequence) -> Self {
        let protein = match seq.kind {
            SequenceKind::Nucleotide => seq.translate().seq,
            SequenceKind::Protein => seq.seq.clone(),
        };
        Self {
            name: seq.name.clone(),
            defline: seq.defline.clone(),
            protein,
            length: seq.len(),
        }
    }
}

/// Best alignment of one hit.
#[derive(Debug, Clone)]
pub struct GeneCall {
    /// Database entry the call was found with.
    pub homolog: String,
    /// Predicted coding sequence, named after the homolog.
    pub gene: Sequence,
    /// Full ORF the gene was cut from.
    pub orf: Location,
    pub alignment: Alignment,
}

impl GeneCall {
    pub fn identity(&self) -> f64 {
        self.alignment.identity()
    }
}

/// One emitted gene: nucleotide sequence, its translation and a GFF feature.
#[derive(Debug, Clone)]
pub struct PredictedGene {
    pub gene: Sequence,
    pub protein: Sequence,
    pub annotation: Annotation,
    /// Every database entry that produced this exact sequence, sorted.
    pub homologs: Vec<String>,
}

/// `true` if `a` should replace `b` as the best call.
fn better(a: &GeneCall, b: &GeneCall) -> bool {
    a.identity()
        .total_cmp(&b.identity())
        .then(a.alignment.identities.cmp(&b.alignment.identities))
        .then(a.alignment.length.cmp(&b.alignment.length))
        .then(b.orf.cmp(&a.orf))
        == Ordering::Greater
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct MatchingPipeline {
    config: PipelineConfig,
    aligner: TetheredAligner,
    references: FxHashMap<String, Reference>,
    orfs: FxHashMap<String, Vec<Sequence>>,
}

impl MatchingPipeline {
    /// Validates `config`, indexes the database and scans every candidate.
    pub fn new(
        config: PipelineConfig,
        database: &[Sequence],
        candidates: &[Sequence],
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let orf_config = config.orf_config()?;
        let aligner = config.aligner()?;

        let references: FxHashMap<String, Reference> = database
            .iter()
            .map(|s| (s.name.clone(), Reference::from_sequence(s)))
            .collect();

        let orfs: FxHashMap<String, Vec<Sequence>> = candidates
            .par_iter()
            .map(|c| (c.name.clone(), find_orfs(c, &orf_config)))
            .collect();

        debug!(
            "Indexed {} database entries and {} ORFs over {} candidates",
            references.len(),
            orfs.values().map(Vec::len).sum::<usize>(),
            orfs.len()
        );

        Ok(Self {
            config,
            aligner,
            references,
            orfs,
        })
    }

    /// E-value, identity and coverage filter.
    pub fn passes_filter(&self, hit: &BlastHit) -> bool {
        let Some(reference) = self.references.get(&hit.subject.name) else {
            debug!("Subject {} is not in the database, dropping hit", hit.subject.name);
            return false;
        };
        match hit.expect() {
            Some(e) if e <= self.config.max_evalue => {}
            _ => return false,
        }
        match hit.identity_fraction() {
            Some(id) if id >= self.config.min_identity => {}
            _ => return false,
        }
        if reference.length == 0 {
            return false;
        }
        let coverage = hit.subject.length as f64 / reference.length as f64;
        coverage + COVERAGE_EPSILON >= 1.0 - self.config.length_err
    }

    /// Finds the candidate a hit's query names, trimming trailing characters
    /// until a name matches.
    pub fn resolve_candidate(&self, query: &str) -> Option<(&str, &[Sequence])> {
        let mut name = query;
        while !name.is_empty() {
            if let Some((key, orfs)) = self.orfs.get_key_value(name) {
                return Some((key.as_str(), orfs.as_slice()));
            }
            let mut chars = name.chars();
            chars.next_back();
            name = chars.as_str();
        }
        None
    }

    /// ORFs overlapping the hit in the same frame and strand whose protein
    /// length is within tolerance of `reference`.
    pub fn targets<'s>(
        &self,
        hit: &BlastHit,
        reference: &Reference,
        orfs: &'s [Sequence],
    ) -> Vec<&'s Sequence> {
        let Some(frame) = hit.reading_frame() else {
            debug!("Hit {} v. {} has no reading frame", hit.query.name, hit.subject.name);
            return Vec::new();
        };
        let strand = match frame.signum() {
            1 => Strand::Forward,
            -1 => Strand::Reverse,
            _ => return Vec::new(),
        };
        let (os, oe) = hit.query.span();
        let ref_len = reference.protein.len() as f64;

        orfs.iter()
            .filter(|orf| {
                let Location { start: ss, end: se, strand: orf_strand } = orf.location;
                ss < oe
                    && se > os
                    && (se % 3 == oe % 3 || ss % 3 == oe % 3)
                    && orf_strand == strand
            })
            .filter(|orf| {
                let protein_len = (orf.len().saturating_sub(3) / 3) as f64;
                ref_len > 0.0 && (protein_len - ref_len).abs() / ref_len <= self.config.length_err
            })
            .collect()
    }

    /// Aligns every target ORF of a hit and keeps the best one.
    pub fn best_match(&self, hit: &BlastHit) -> Option<GeneCall> {
        let reference = self.references.get(&hit.subject.name)?;
        let Some((candidate, orfs)) = self.resolve_candidate(&hit.query.name) else {
            debug!("No candidate named {}, dropping hit", hit.query.name);
            return None;
        };

        let mut best: Option<GeneCall> = None;
        for orf in self.targets(hit, reference, orfs) {
            let trimmed = orf.slice(0..orf.len() - 3);
            let translation = trimmed.translate();
            debug!("Aligning {:>33} v. {:>33}", candidate, reference.name);

            let alignment = match self.aligner.align(&reference.protein, &translation.seq) {
                Ok(a) => a,
                Err(e) => {
                    debug!("No alignment of {} at {:?}: {}", candidate, orf.location, e);
                    continue;
                }
            };
            if alignment.identity() < self.config.min_identity {
                continue;
            }

            let gene_len = (3 * alignment.sublength).min(trimmed.len());
            let region = trimmed.slice(trimmed.len() - gene_len..trimmed.len());
            let call = GeneCall {
                homolog: reference.name.clone(),
                gene: region,
                orf: orf.location,
                alignment,
            };
            if best.as_ref().is_none_or(|b| better(&call, b)) {
                best = Some(call);
            }
        }

        best.map(|mut call| {
            call.gene = call.gene.renamed(
                reference.name.trim(),
                gene_defline(&reference.defline, &call.gene),
            );
            call
        })
    }

    /// Streams `hits` through filtering and alignment on the worker pool and
    /// collapses the resulting calls into predicted genes.
    ///
    /// Malformed hit records are logged and skipped; any other error from the
    /// stream ends the run after in-flight work completes.
    pub fn run<I>(&self, hits: I, source: &str, namer: &UnknownNamer) -> Result<Vec<PredictedGene>>
    where
        I: IntoIterator<Item = Result<BlastHit>>,
    {
        let calls: Mutex<FxHashMap<String, Vec<GeneCall>>> = Mutex::new(FxHashMap::default());

        let queued = run_pool(
            self.config.threads,
            |queue| -> Result<usize> {
                let mut queued = 0usize;
                for item in hits {
                    let hit = match item {
                        Ok(hit) => hit,
                        Err(e) if e.downcast_ref::<BlastParseError>().is_some() => {
                            warn!("Skipping malformed BLAST record: {}", e);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if self.passes_filter(&hit) && queue.push(hit).is_ok() {
                        queued += 1;
                    }
                }
                Ok(queued)
            },
            |hit: BlastHit| {
                if let Some(call) = self.best_match(&hit) {
                    calls
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(call.gene.seq.clone())
                        .or_default()
                        .push(call);
                }
            },
        )?;

        let calls = calls.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!("{} hits passed filtering, {} distinct genes found", queued, calls.len());
        Ok(collapse(calls, source, namer))
    }
}

fn gene_defline(db_defline: &str, gene: &Sequence) -> String {
    let base = db_defline.split('[').next().unwrap_or("").trim();
    format!(
        "{}{}[source={}] [start={}] [end={}] [strand={}]",
        base,
        if base.is_empty() { "" } else { " " },
        gene.original_name(),
        gene.location.start,
        gene.location.end,
        gene.strand().sign()
    )
}

/// Merges calls sharing a nucleotide sequence into one gene each, ordered by
/// candidate, start and end.
pub fn collapse(
    buckets: FxHashMap<String, Vec<GeneCall>>,
    source: &str,
    namer: &UnknownNamer,
) -> Vec<PredictedGene> {
    let mut genes: Vec<PredictedGene> = buckets
        .into_values()
        .filter_map(|mut calls| {
            calls.sort_by(|a, b| a.homolog.cmp(&b.homolog));
            let mut homologs: Vec<String> = calls.iter().map(|c| c.homolog.clone()).collect();
            homologs.dedup();
            let gene = calls.into_iter().next()?.gene;

            let loc = gene.location;
            let mut attributes = Attributes::new();
            attributes.insert("homologs", homologs.join(","));
            let annotation = Annotation::new(
                gene.original_name(),
                source,
                "gene",
                loc.start,
                loc.end,
                ".",
                loc.strand.symbol().to_string(),
                (loc.start % 3).to_string(),
                attributes,
                DEFAULT_NAME_KEY,
                namer,
            );
            Some(PredictedGene {
                protein: gene.translate(),
                gene,
                annotation,
                homologs,
            })
        })
        .collect();

    genes.sort_by(|a, b| {
        a.gene
            .original_name()
            .cmp(b.gene.original_name())
            .then(a.gene.location.start.cmp(&b.gene.location.start))
            .then(a.gene.location.end.cmp(&b.gene.location.end))
    });
    genes
}
