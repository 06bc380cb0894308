//! geneseek - homolog gene prediction from BLAST hits
//!
//! Finds, for every database gene, the open reading frame in a set of
//! candidate genomes or transcripts that best matches it, and reports the
//! result as annotated gene calls.
//!
//! # Modules
//! - `sequence`: sequences with strand-aware coordinates, translation
//! - `annotation`: GFF3 features
//! - `seqio`: FASTA/FASTQ/GFF3 file I/O with gzip support
//! - `blast`: streaming parser for BLAST pairwise reports
//! - `orf`: six-frame open reading frame scanner
//! - `align`: start-codon-anchored affine-gap protein alignment
//! - `config`: validated pipeline parameters
//! - `workqueue`: closable work queue, worker pool and semaphore
//! - `pipeline`: hit filtering, ORF binding, alignment and deduplication

pub mod sequence;
pub mod annotation;
pub mod seqio;
pub mod blast;
pub mod orf;
pub mod align;
pub mod config;
pub mod workqueue;
pub mod pipeline;
