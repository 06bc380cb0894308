//! End-to-end tests: BLAST report text in, predicted genes out.

use anyhow::Result;
use geneseek::annotation::UnknownNamer;
use geneseek::blast::{BlastHit, BlastReader, HitSide};
use geneseek::config::PipelineConfig;
use geneseek::pipeline::MatchingPipeline;
use geneseek::seqio::{FastaWriter, GffWriter};
use geneseek::sequence::{Sequence, Strand};
use rustc_hash::{FxHashMap, FxHashSet};

const PROTEIN: &str = "MSEQNTLKHVAIVGAGPAGLSAAYYLKKAGHDVTLFERGERIGGRLHTLEVDGYRFDLGAQWFHPAHPALRELAEELGLTLEPATESFLFDAEGRRLLPSDWSALPEGSPAWL";

fn codon_for(aa: char) -> &'static str {
    match aa {
        'A' => "GCT", 'R' => "CGT", 'N' => "AAC", 'D' => "GAT", 'C' => "TGC",
        'Q' => "CAG", 'E' => "GAA", 'G' => "GGC", 'H' => "CAC", 'I' => "ATC",
        'L' => "CTG", 'K' => "AAA", 'M' => "ATG", 'F' => "TTC", 'P' => "CCG",
        'S' => "TCT", 'T' => "ACC", 'W' => "TGG", 'Y' => "TAC", 'V' => "GTT",
        _ => "NNN",
    }
}

fn back_translate(protein: &str) -> String {
    protein.chars().map(codon_for).collect()
}

/// Gene at 1-based position 6, preceded by an in-frame stop.
fn candidate_with_gene(gene: &str) -> String {
    format!("GCTGA{}TAACCGGCC", gene)
}

/// A blastx report with one hit of `protein` at nucleotide 6 of `query`.
fn blastx_report(query: &str, query_len: usize, subject: &str, protein: &str) -> String {
    let mut text = format!(
        "BLASTX 2.12.0+\n\n\
         Reference: Stephen F. Altschul, Thomas L. Madden, Alejandro A.\n\
         Schaffer, Jinghui Zhang, Zheng Zhang, Webb Miller, and David J.\n\
         Lipman (1997).\n\n\
         Query= {query}\n\nLength={query_len}\n\n\
         > {subject} test protein [Escherichia coli]\nLength={len}\n\n \
         Score = 230 bits (587),  Expect = 4e-75, Method: Compositional matrix adjust.\n \
         Identities = {len}/{len} (100%), Positives = {len}/{len} (100%), Gaps = 0/{len} (0%)\n \
         Frame = +3\n\n",
        len = protein.len()
    );
    for (i, chunk) in protein.as_bytes().chunks(60).enumerate() {
        let chunk = std::str::from_utf8(chunk).unwrap();
        let aa_start = 60 * i;
        let q_start = 6 + 3 * aa_start;
        let q_end = q_start + 3 * chunk.len() - 1;
        text.push_str(&format!("Query  {:<5}{}  {}\n", q_start, chunk, q_end));
        text.push_str(&format!("            {}\n", chunk));
        text.push_str(&format!("Sbjct  {:<5}{}  {}\n\n", aa_start + 1, chunk, aa_start + chunk.len()));
    }
    text.push_str("\nLambda      K        H\n    0.318    0.134    0.401\n");
    text
}

#[test]
fn test_report_to_gene_call() {
    let gene = back_translate(PROTEIN);
    let candidate = candidate_with_gene(&gene);
    let database = vec![Sequence::new("yfiA", PROTEIN).with_defline("test protein [Escherichia coli]")];
    let candidates = vec![Sequence::new("contig_1", candidate.as_str())];

    let pipeline = MatchingPipeline::new(PipelineConfig::default(), &database, &candidates).unwrap();
    let report = blastx_report("contig_1", candidate.len(), "yfiA", PROTEIN);
    let namer = UnknownNamer::new();
    let genes = pipeline
        .run(BlastReader::new(report.as_bytes()), "strain_A", &namer)
        .unwrap();

    assert_eq!(genes.len(), 1);
    let predicted = &genes[0];
    assert_eq!(predicted.gene.seq, gene);
    assert_eq!(predicted.protein.seq, PROTEIN);
    assert_eq!(predicted.homologs, vec!["yfiA".to_string()]);
    assert_eq!(predicted.gene.location.start, 6);
    assert_eq!(predicted.gene.location.strand, Strand::Forward);
    assert_eq!(predicted.annotation.seq_name, "contig_1");
    assert_eq!(predicted.annotation.source, "strain_A");
    assert_eq!(predicted.annotation.attributes.get("homologs"), Some("yfiA"));

    // Output files round through the writers.
    let mut fasta = FastaWriter::new(Vec::new());
    let mut gff = GffWriter::new(Vec::new());
    fasta.write(&predicted.gene).unwrap();
    gff.write(&predicted.annotation).unwrap();
    let fasta = String::from_utf8(fasta.finish().unwrap()).unwrap();
    let gff = String::from_utf8(gff.finish().unwrap()).unwrap();
    assert!(fasta.starts_with(">yfiA test protein [source=contig_1] [start=6]"));
    assert!(gff.starts_with("##gff-version 3\ncontig_1\tstrain_A\tgene\t6\t"));
}

#[test]
fn test_parsing_twice_is_stable() {
    let report = blastx_report("contig_1", 400, "yfiA", PROTEIN);
    let parse = || {
        BlastReader::new(report.as_bytes())
            .collect::<Result<Vec<_>>>()
            .unwrap()
    };
    let (a, b) = (parse(), parse());
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].query.length, a[0].query.end.abs_diff(a[0].query.start) + 1);
    assert_eq!(a[0].subject.length, PROTEIN.len());
    assert_eq!(a[0].subject.sequence, PROTEIN);
    assert_eq!(a[0].query.sequence, b[0].query.sequence);
    assert_eq!(a[0].fields, b[0].fields);
}

#[test]
fn test_hits_below_thresholds_yield_nothing() {
    let gene = back_translate(PROTEIN);
    let candidate = candidate_with_gene(&gene);
    let database = vec![Sequence::new("yfiA", PROTEIN)];
    let candidates = vec![Sequence::new("contig_1", candidate.as_str())];
    let config = PipelineConfig {
        max_evalue: 1e-80,
        ..PipelineConfig::default()
    };

    let pipeline = MatchingPipeline::new(config, &database, &candidates).unwrap();
    let report = blastx_report("contig_1", candidate.len(), "yfiA", PROTEIN);
    let genes = pipeline
        .run(BlastReader::new(report.as_bytes()), "strain_A", &UnknownNamer::new())
        .unwrap();
    assert!(genes.is_empty());
}

/// Protein unique to `i`: a shared body plus a suffix spelling `i`.
fn numbered_protein(i: usize) -> String {
    const DIGITS: &[u8] = b"ACDEFGHIKL";
    let suffix: String = format!("{:03}", i)
        .bytes()
        .map(|d| DIGITS[(d - b'0') as usize] as char)
        .flat_map(|c| std::iter::repeat(c).take(3))
        .collect();
    format!("{}{}", &PROTEIN[..100], suffix)
}

fn side(name: &str, start: usize, end: usize) -> HitSide {
    HitSide {
        name: name.to_string(),
        defline: String::new(),
        start,
        end,
        length: start.abs_diff(end) + 1,
        sequence: String::new(),
        full_length: None,
    }
}

#[test]
fn test_thousand_hits_on_eight_threads() {
    let proteins: Vec<String> = (0..1000).map(numbered_protein).collect();
    let database: Vec<Sequence> = proteins
        .iter()
        .enumerate()
        .map(|(i, p)| Sequence::new(format!("ref_{}", i), p.as_str()))
        .collect();
    let candidates: Vec<Sequence> = proteins
        .iter()
        .enumerate()
        .map(|(i, p)| Sequence::new(format!("contig_{}", i), candidate_with_gene(&back_translate(p))))
        .collect();

    let config = PipelineConfig {
        threads: 8,
        ..PipelineConfig::default()
    };
    let pipeline = MatchingPipeline::new(config, &database, &candidates).unwrap();

    let hits = proteins.iter().enumerate().map(|(i, p)| {
        let mut fields = FxHashMap::default();
        fields.insert("expect".to_string(), "1e-60".to_string());
        fields.insert("identities".to_string(), format!("{0}/{0} (100%)", p.len()));
        fields.insert("frame".to_string(), "+3".to_string());
        Ok(BlastHit {
            query: side(&format!("contig_{}", i), 6, 5 + 3 * p.len()),
            subject: side(&format!("ref_{}", i), 1, p.len()),
            fields,
        })
    });

    let genes = pipeline.run(hits, "batch", &UnknownNamer::new()).unwrap();
    assert_eq!(genes.len(), 1000);

    let homologs: FxHashSet<&str> = genes
        .iter()
        .flat_map(|g| g.homologs.iter().map(String::as_str))
        .collect();
    assert_eq!(homologs.len(), 1000);
    for gene in &genes {
        assert_eq!(gene.homologs.len(), 1);
        let index: usize = gene.homologs[0]["ref_".len()..].parse().unwrap();
        assert_eq!(gene.protein.seq, proteins[index]);
        assert_eq!(gene.gene.original_name(), format!("contig_{}", index));
    }
}
