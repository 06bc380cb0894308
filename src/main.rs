use anyhow::{Context, Result};
use clap::Parser;
use geneseek::annotation::UnknownNamer;
use geneseek::blast::BlastReader;
use geneseek::config::PipelineConfig;
use geneseek::pipeline::{MatchingPipeline, PredictedGene};
use geneseek::seqio::{read_sequences, FastaWriter, GffWriter, SeqFormat};
use geneseek::sequence::{Sequence, SequenceKind};
use geneseek::workqueue::Semaphore;
use log::{debug, error, info, warn};
use std::env;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

fn parse_fraction(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if !(0.0..=1.0).contains(&val) {
        Err(format!("value must be between 0 and 1, got {}", val))
    } else {
        Ok(val)
    }
}

fn parse_evalue(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val > 0.0 {
        Ok(val)
    } else {
        Err(format!("e-value must be positive, got {}", val))
    }
}

#[derive(Parser)]
#[command(name = "geneseek")]
#[command(version)]
#[command(about = "Find homologs of database genes in genomes and transcripts")]
#[command(long_about = r#"
geneseek - homolog gene prediction from BLAST hits

For every candidate file:
  1. Scans all six reading frames for open reading frames
  2. BLASTs the candidates against the database (or replays a saved report)
  3. Keeps hits passing e-value, identity and coverage thresholds
  4. Aligns each hit's ORFs to the database protein, anchored at a start codon
  5. Merges identical genes and records every homolog that found them

BLAST PROGRAM (query = candidates, database = reference):
  nucleotide vs nucleotide  blastn      nucleotide vs protein  blastx
  protein vs nucleotide     tblastn     protein vs protein     blastp

OUTPUT FILES (in <directory>/sequences/, one set per candidate file):
  <name>.fasta   Predicted genes (nucleotide)
  <name>.faa     Predicted genes (translated)
  <name>.gff3    Gene features with a `homologs` attribute

EXAMPLES:
  geneseek reference.faa genome1.fna genome2.fna.gz -d results/
  geneseek -S ATG -S GTG -S TTG -I 0.6 reference.faa genome.fna
  geneseek --blast-db refdb reference.faa genome.fna
"#)]
struct Args {
    #[arg(value_name = "DATABASE", help_heading = "Input")]
    database: PathBuf,

    #[arg(value_name = "SEQUENCES", required = true, help_heading = "Input")]
    sequences: Vec<PathBuf>,

    /// Prebuilt BLAST database for DATABASE (passed as -db)
    #[arg(long = "blast-db", value_name = "NAME", help_heading = "BLAST")]
    blast_db: Option<String>,

    /// Saved pairwise BLAST report to use instead of running BLAST
    #[arg(long = "blast-output", value_name = "FILE", help_heading = "BLAST")]
    blast_output: Option<PathBuf>,

    /// Start codon; repeat for several, `*` for any non-stop codon
    #[arg(short = 'S', long = "start", value_name = "CODON", help_heading = "Gene Prediction")]
    start: Vec<String>,

    /// Stop codon; repeat for several
    #[arg(short = 'E', long = "stop", value_name = "CODON", help_heading = "Gene Prediction")]
    stop: Vec<String>,

    /// Minimum ORF length in bases
    #[arg(short = 'O', long = "orflen", value_name = "BASES", default_value = "300", help_heading = "Gene Prediction")]
    orflen: usize,

    #[arg(short = 'e', long, value_name = "FLOAT", default_value = "1e-30",
          value_parser = parse_evalue, help_heading = "Hit Filtering")]
    evalue: f64,

    /// Minimum fractional identity
    #[arg(short = 'I', long, value_name = "FLOAT", default_value = "0.45",
          value_parser = parse_fraction, help_heading = "Hit Filtering")]
    identity: f64,

    /// Allowed relative length error, |hit - ref| / ref
    #[arg(short = 'L', long = "length", value_name = "FLOAT", default_value = "0.2",
          value_parser = parse_fraction, help_heading = "Hit Filtering")]
    length_err: f64,

    /// Threads per candidate file (0 = all cores)
    #[arg(short = 'j', long, value_name = "NUM", default_value = "16", help_heading = "Runtime")]
    threads: usize,

    /// Candidate files processed at once
    #[arg(short = 'p', long, value_name = "NUM", default_value = "2", help_heading = "Runtime")]
    processes: usize,

    #[arg(short = 'd', long, value_name = "DIR", default_value = ".", help_heading = "Output")]
    directory: PathBuf,

    #[arg(short = 'v', long, help_heading = "Output")]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            min_orf_len: self.orflen,
            max_evalue: self.evalue,
            min_identity: self.identity,
            length_err: self.length_err,
            threads: if self.threads == 0 { num_cpus::get() } else { self.threads },
            ..PipelineConfig::default()
        };
        if !self.start.is_empty() {
            config.start_codons = self.start.clone();
        }
        if !self.stop.is_empty() {
            config.stop_codons = self.stop.clone();
        }
        config
    }
}

fn find_executable(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() && path.is_file() {
        return Ok(path.to_path_buf());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    anyhow::bail!("{} not found in PATH. Please install BLAST+ or add it to your PATH.", name)
}

/// BLAST+ program for a query/database pairing.
fn blast_program(query: SequenceKind, database: SequenceKind) -> &'static str {
    match (query, database) {
        (SequenceKind::Nucleotide, SequenceKind::Nucleotide) => "blastn",
        (SequenceKind::Nucleotide, SequenceKind::Protein) => "blastx",
        (SequenceKind::Protein, SequenceKind::Nucleotide) => "tblastn",
        (SequenceKind::Protein, SequenceKind::Protein) => "blastp",
    }
}

/// File name without directories, `.gz` or the format extension.
fn file_prefix(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// BLAST only reads plain FASTA; anything else is rewritten under `scratch`.
fn blast_readable(path: &Path, seqs: &[Sequence], scratch: &Path, name: &str) -> Result<PathBuf> {
    let plain = path.extension().and_then(|e| e.to_str()) != Some("gz")
        && SeqFormat::detect_path(path)? == Some(SeqFormat::Fasta);
    if plain {
        return Ok(path.to_path_buf());
    }

    fs::create_dir_all(scratch)
        .with_context(|| format!("Failed to create directory: {}", scratch.display()))?;
    let out = scratch.join(format!("{}.fasta", name));
    let mut writer = FastaWriter::create(&out)?;
    for seq in seqs {
        writer.write(seq)?;
    }
    writer.finish()?;
    debug!("Wrote BLAST-readable copy of {} to {}", path.display(), out.display());
    Ok(out)
}

struct Run<'a> {
    args: &'a Args,
    config: &'a PipelineConfig,
    database: &'a [Sequence],
    /// `-subject` file when no prebuilt BLAST database is given.
    subject: &'a Path,
    /// `None` when replaying a saved report.
    blast_dir: Option<&'a Path>,
    outdir: PathBuf,
}

impl Run<'_> {
    fn blast_command(&self, blast_dir: &Path, query: &Path, query_kind: SequenceKind) -> Command {
        let db_kind = self.database.first().map(|s| s.kind).unwrap_or(SequenceKind::Protein);
        let program = blast_program(query_kind, db_kind);

        let mut cmd = Command::new(blast_dir.join(program));
        cmd.arg("-query").arg(query);
        match &self.args.blast_db {
            Some(db) => {
                cmd.arg("-db").arg(db);
                cmd.arg("-num_threads").arg(self.config.threads.to_string());
            }
            None => {
                cmd.arg("-subject").arg(self.subject);
            }
        }
        cmd.arg("-evalue").arg(self.config.max_evalue.to_string());
        cmd
    }

    fn process_candidate(&self, path: &Path) -> Result<Option<usize>> {
        let candidates = match read_sequences(path) {
            Ok(seqs) => seqs,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                return Ok(None);
            }
        };
        let prefix = file_prefix(path);
        info!("{}: {} candidate sequences", prefix, candidates.len());

        let pipeline = MatchingPipeline::new(self.config.clone(), self.database, &candidates)?;
        let namer = UnknownNamer::new();

        let genes = match (&self.args.blast_output, self.blast_dir) {
            (Some(report), _) => {
                let mut reader = BlastReader::open(report)?;
                let genes = pipeline.run(&mut reader, &prefix, &namer)?;
                log_report_program(&reader, report);
                genes
            }
            (None, Some(blast_dir)) => {
                let query_kind = candidates.first().map(|s| s.kind).unwrap_or(SequenceKind::Nucleotide);
                let query = blast_readable(path, &candidates, &self.outdir.join("blast"), &prefix)?;
                let mut cmd = self.blast_command(blast_dir, &query, query_kind);
                debug!("Running {:?}", cmd);

                let mut child = cmd
                    .stdout(Stdio::piped())
                    .spawn()
                    .with_context(|| format!("Failed to run BLAST on {}", path.display()))?;
                let stdout = child.stdout.take().context("BLAST stdout was not captured")?;
                let mut reader = BlastReader::new(BufReader::with_capacity(1024 * 1024, stdout));
                let genes = pipeline.run(&mut reader, &prefix, &namer);
                log_report_program(&reader, path);
                let status = child.wait().context("Failed to wait for BLAST")?;
                let genes = genes?;
                if !status.success() {
                    anyhow::bail!("BLAST failed on {} (exit code: {:?})", path.display(), status.code());
                }
                genes
            }
            (None, None) => anyhow::bail!("No BLAST executable or saved report"),
        };

        write_genes(&self.outdir.join("sequences"), &prefix, &genes)?;
        Ok(Some(genes.len()))
    }
}

fn log_report_program<R: std::io::BufRead>(reader: &BlastReader<R>, source: &Path) {
    match reader.headers().first() {
        Some(program) => debug!("{}: report from {}", source.display(), program),
        None => warn!("{}: BLAST report has no program header", source.display()),
    }
}

fn write_genes(dir: &Path, prefix: &str, genes: &[PredictedGene]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut nucleotides = FastaWriter::create(dir.join(format!("{}.fasta", prefix)))?;
    let mut proteins = FastaWriter::create(dir.join(format!("{}.faa", prefix)))?;
    let mut features = GffWriter::create(dir.join(format!("{}.gff3", prefix)))?;
    for gene in genes {
        nucleotides.write(&gene.gene)?;
        proteins.write(&gene.protein)?;
        features.write(&gene.annotation)?;
    }
    nucleotides.finish()?;
    proteins.finish()?;
    features.finish()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let start_time = Instant::now();

    let config = args.pipeline_config();
    config.validate()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
        .ok();

    let database = read_sequences(&args.database)?;
    if database.is_empty() {
        anyhow::bail!("Database {} has no sequences", args.database.display());
    }
    info!("Loaded {} database sequences from {}", database.len(), args.database.display());

    let blast_dir = match &args.blast_output {
        Some(_) => None,
        None => {
            let program = if database[0].kind == SequenceKind::Protein { "blastp" } else { "blastn" };
            let exe = find_executable(program)?;
            debug!("Found BLAST: {}", exe.display());
            exe.parent().map(Path::to_path_buf)
        }
    };

    let outdir = args.directory.clone();
    fs::create_dir_all(&outdir)
        .with_context(|| format!("Failed to create directory: {}", outdir.display()))?;
    let subject = match (&args.blast_output, &args.blast_db) {
        (None, None) => blast_readable(&args.database, &database, &outdir.join("blast"), "database")?,
        _ => args.database.clone(),
    };

    let run = Run {
        args: &args,
        config: &config,
        database: &database,
        subject: &subject,
        blast_dir: blast_dir.as_deref(),
        outdir,
    };

    let semaphore = Semaphore::new(args.processes);
    let failures = Mutex::new(0usize);
    let total_genes = Mutex::new(0usize);

    std::thread::scope(|s| {
        for path in &args.sequences {
            let (run, sem, failures, total_genes) = (&run, &semaphore, &failures, &total_genes);
            s.spawn(move || {
                sem.acquire();
                match run.process_candidate(path) {
                    Ok(Some(n)) => {
                        info!("{}: {} genes predicted", path.display(), n);
                        *total_genes.lock().unwrap_or_else(PoisonError::into_inner) += n;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Failed to process {}: {:#}", path.display(), e);
                        *failures.lock().unwrap_or_else(PoisonError::into_inner) += 1;
                    }
                }
                sem.release();
            });
        }
    });

    let failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
    let total_genes = total_genes.into_inner().unwrap_or_else(PoisonError::into_inner);
    info!(
        "{} genes from {} file(s) in {:.1}s",
        total_genes,
        args.sequences.len(),
        start_time.elapsed().as_secs_f64()
    );

    if failures > 0 {
        anyhow::bail!("{} of {} candidate file(s) failed", failures, args.sequences.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blast_program_choice() {
        use SequenceKind::*;
        assert_eq!(blast_program(Nucleotide, Protein), "blastx");
        assert_eq!(blast_program(Nucleotide, Nucleotide), "blastn");
        assert_eq!(blast_program(Protein, Nucleotide), "tblastn");
        assert_eq!(blast_program(Protein, Protein), "blastp");
    }

    #[test]
    fn test_file_prefix() {
        assert_eq!(file_prefix(Path::new("/data/strain_A.fasta")), "strain_A");
        assert_eq!(file_prefix(Path::new("genome.fna.gz")), "genome");
        assert_eq!(file_prefix(Path::new("reads")), "reads");
        assert_eq!(file_prefix(Path::new(".hidden")), ".hidden");
    }

    #[test]
    fn test_fraction_parser() {
        assert_eq!(parse_fraction("0.45"), Ok(0.45));
        assert!(parse_fraction("1.5").is_err());
        assert!(parse_fraction("abc").is_err());
        assert!(parse_evalue("0").is_err());
        assert_eq!(parse_evalue("1e-5"), Ok(1e-5));
    }

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["geneseek", "db.faa", "genome.fna"]).unwrap();
        let config = args.pipeline_config();
        assert_eq!(config.start_codons, vec!["ATG"]);
        assert_eq!(config.stop_codons.len(), 3);
        assert_eq!(config.min_orf_len, 300);
        assert_eq!(config.threads, 16);
        assert_eq!(args.processes, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_repeated_starts_replace_default() {
        let args = Args::try_parse_from([
            "geneseek", "-S", "GTG", "-S", "TTG", "-L", "0.1", "db.faa", "a.fna", "b.fna",
        ])
        .unwrap();
        let config = args.pipeline_config();
        assert_eq!(config.start_codons, vec!["GTG", "TTG"]);
        assert_eq!(config.length_err, 0.1);
        assert_eq!(args.sequences.len(), 2);
        assert!(Args::try_parse_from(["geneseek", "-I", "2", "db.faa", "a.fna"]).is_err());
    }
}
