//! End-to-end polishing tests over synthetic fixtures: a reference FASTA and
//! an indexed BAM are generated into a temp dir, then the library pipeline
//! (chunker -> per-chunk polish -> merge) runs against them.
use std::{collections::HashMap, fs::File, io::Write, path::PathBuf};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_htslib::bam::{
    self,
    header::HeaderRecord,
    record::{Cigar, CigarString},
};
use tempfile::TempDir;

use burnish::{
    chunk::Chunker,
    merge::merge_chunk_sequences,
    params::Params,
    polish_chunk,
    repeats::RepeatCountMatrix,
    utils::parse_region,
    ChunkResult, DumpOptions, PolishOptions,
};

const CONTIG: &str = "c";

fn random_sequence(len: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| b"ACGT"[rng.gen_range(0..4)] as char)
        .collect()
}

fn write_reference(dir: &TempDir, sequence: &str) -> PathBuf {
    let path = dir.path().join("assembly.fa");
    let mut file = File::create(&path).unwrap();
    writeln!(file, ">{CONTIG} synthetic test contig").unwrap();
    writeln!(file, "{sequence}").unwrap();
    path
}

/// Write an indexed BAM of fully-aligned reads `(name, pos, seq)`, sorted by
/// position, all mapped forward with quality 30 bases.
fn write_bam(dir: &TempDir, contig_len: usize, reads: &[(String, i64, String)]) -> PathBuf {
    let path = dir.path().join("reads.bam");
    let mut header = bam::Header::new();
    let mut sq = HeaderRecord::new(b"SQ");
    sq.push_tag(b"SN", &CONTIG);
    sq.push_tag(b"LN", &contig_len);
    header.push_record(&sq);

    let mut sorted: Vec<_> = reads.to_vec();
    sorted.sort_by_key(|(_, pos, _)| *pos);
    {
        let mut writer = bam::Writer::from_path(&path, &header, bam::Format::Bam).unwrap();
        for (name, pos, seq) in &sorted {
            let mut record = bam::Record::new();
            let cigar = CigarString(vec![Cigar::Match(seq.len() as u32)]);
            record.set(
                name.as_bytes(),
                Some(&cigar),
                seq.as_bytes(),
                &vec![30u8; seq.len()],
            );
            record.set_tid(0);
            record.set_pos(*pos);
            record.set_mapq(60);
            writer.write(&record).unwrap();
        }
    }
    let index: Option<&PathBuf> = None;
    bam::index::build(&path, index, bam::index::Type::Bai, 1).unwrap();
    path
}

fn test_params(chunk_size: usize, chunk_boundary: usize, use_rle: bool) -> Params {
    let mut params = Params::default();
    params.polish.chunk_size = chunk_size;
    params.polish.chunk_boundary = chunk_boundary;
    params.polish.use_run_length_encoding = use_rle;
    params.polish.max_depth = 0;
    params
}

/// Run the chunk pipeline and merge, mirroring the binary's orchestration.
fn polish_all(
    bam_path: &PathBuf,
    reference: &HashMap<String, Vec<u8>>,
    params: &Params,
    matrix: &RepeatCountMatrix,
    region: Option<&str>,
    diploid: bool,
) -> (Vec<ChunkResult>, String, Option<String>) {
    let region = region.map(|spec| parse_region(spec).unwrap());
    let chunker = Chunker::from_alignment(
        bam_path,
        region.as_ref(),
        params.polish.chunk_size,
        params.polish.chunk_boundary,
    )
    .unwrap();
    assert!(!chunker.is_empty());

    let dumps = DumpOptions::default();
    let opts = PolishOptions {
        bam_path: bam_path.to_str().unwrap(),
        params: &params.polish,
        matrix,
        diploid,
        dumps: &dumps,
        features: None,
        feature_max_run_length: 0,
    };
    let mut results: Vec<ChunkResult> = (0..chunker.len())
        .map(|idx| polish_chunk(idx, &chunker.chunks[idx], reference, &opts).unwrap())
        .collect();
    results.sort_by_key(|result| result.chunk_idx);

    let sequences: Vec<String> = results.iter().map(|r| r.hap1.clone()).collect();
    let overlaps: Vec<usize> = (0..chunker.len().saturating_sub(1))
        .map(|i| {
            chunker.chunks[i]
                .boundary_end
                .saturating_sub(chunker.chunks[i + 1].boundary_start)
        })
        .collect();
    let merged_h1 = merge_chunk_sequences(&sequences, &overlaps);
    let merged_h2 = diploid.then(|| {
        let sequences: Vec<String> = results
            .iter()
            .map(|r| r.hap2.clone().expect("diploid result without hap2"))
            .collect();
        merge_chunk_sequences(&sequences, &overlaps)
    });
    (results, merged_h1, merged_h2)
}

#[test]
fn perfect_read_reproduces_the_reference() {
    let dir = TempDir::new().unwrap();
    let sequence = random_sequence(1000, 11);
    write_reference(&dir, &sequence);
    let bam_path = write_bam(&dir, 1000, &[("read1".to_string(), 0, sequence.clone())]);

    let params = test_params(400, 50, true);
    let matrix = params.repeat_matrix().unwrap();
    let reference = HashMap::from([(CONTIG.to_string(), sequence.clone().into_bytes())]);

    let (_, merged, _) = polish_all(&bam_path, &reference, &params, &matrix, None, false);
    assert_eq!(merged, sequence);
}

#[test]
fn snv_majority_becomes_the_consensus() {
    let dir = TempDir::new().unwrap();
    let sequence = random_sequence(1000, 13);
    write_reference(&dir, &sequence);

    // every read carries the same substitution at position 500
    let mut mutated: Vec<u8> = sequence.clone().into_bytes();
    mutated[500] = match mutated[500] {
        b'A' => b'G',
        _ => b'A',
    };
    let mutated = String::from_utf8(mutated).unwrap();
    let reads: Vec<(String, i64, String)> = (0..20)
        .map(|i| (format!("read{i}"), 0, mutated.clone()))
        .collect();
    let bam_path = write_bam(&dir, 1000, &reads);

    let params = test_params(400, 50, false);
    let matrix = params.repeat_matrix().unwrap();
    let reference = HashMap::from([(CONTIG.to_string(), sequence.clone().into_bytes())]);

    let (_, merged, _) = polish_all(&bam_path, &reference, &params, &matrix, None, false);
    assert_eq!(merged.len(), sequence.len());
    assert_eq!(merged.as_bytes()[500], mutated.as_bytes()[500]);
    assert_eq!(&merged[..500], &mutated[..500]);
    assert_eq!(&merged[501..], &mutated[501..]);
}

#[test]
fn empty_read_set_yields_an_empty_workset() {
    let dir = TempDir::new().unwrap();
    let sequence = random_sequence(100, 17);
    write_reference(&dir, &sequence);
    let bam_path = write_bam(&dir, 100, &[]);

    let chunker = Chunker::from_alignment(&bam_path, None, 100, 0).unwrap();
    assert!(chunker.is_empty());
}

#[test]
fn region_restriction_limits_the_output() {
    let dir = TempDir::new().unwrap();
    let sequence = random_sequence(1000, 11);
    write_reference(&dir, &sequence);
    let bam_path = write_bam(&dir, 1000, &[("read1".to_string(), 0, sequence.clone())]);

    let params = test_params(400, 50, true);
    let matrix = params.repeat_matrix().unwrap();
    let reference = HashMap::from([(CONTIG.to_string(), sequence.clone().into_bytes())]);

    let (_, merged, _) = polish_all(
        &bam_path,
        &reference,
        &params,
        &matrix,
        Some("c:200-600"),
        false,
    );
    assert_eq!(merged.len(), 400);
    assert_eq!(merged, sequence[200..600]);
}

#[test]
fn balanced_het_phases_into_two_haplotypes() {
    let dir = TempDir::new().unwrap();
    let sequence = random_sequence(1000, 19);
    write_reference(&dir, &sequence);

    // half the reads carry the reference base at 500, half a substitution
    let mut alt: Vec<u8> = sequence.clone().into_bytes();
    alt[500] = match alt[500] {
        b'C' => b'T',
        _ => b'C',
    };
    let alt = String::from_utf8(alt).unwrap();
    let mut reads = Vec::new();
    for i in 0..50 {
        let seq = if i < 25 { sequence.clone() } else { alt.clone() };
        reads.push((format!("read{i:02}"), 0, seq));
    }
    let bam_path = write_bam(&dir, 1000, &reads);

    // a single chunk keeps the het site and all reads together
    let params = test_params(1000, 0, false);
    let matrix = params.repeat_matrix().unwrap();
    let reference = HashMap::from([(CONTIG.to_string(), sequence.clone().into_bytes())]);

    let (results, merged_h1, merged_h2) =
        polish_all(&bam_path, &reference, &params, &matrix, None, true);
    let merged_h2 = merged_h2.unwrap();

    // both haplotypes exist and differ only at the het position
    assert_eq!(merged_h1.len(), merged_h2.len());
    let diffs: Vec<usize> = merged_h1
        .bytes()
        .zip(merged_h2.bytes())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(diffs, vec![500]);

    // reads split evenly and disjointly
    let result = &results[0];
    assert!(result.h1_reads.len().abs_diff(result.h2_reads.len()) <= 1);
    assert_eq!(result.h1_reads.len() + result.h2_reads.len(), 50);
    assert!(result.h1_reads.is_disjoint(&result.h2_reads));
}
