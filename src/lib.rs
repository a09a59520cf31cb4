//! # burnish
//!
//! This library backs the `burnish` binary, which polishes a draft genome
//! assembly by reconciling it with long reads aligned against it. Each
//! contig is cut into overlapping windows; per window, reads are decoded
//! into run-length space, folded into a partial-order alignment graph, and
//! the consensus is refined by iterative realignment. In diploid mode,
//! variant bubbles are phased into two haplotypes before repeat counts are
//! re-estimated. Finished windows are stitched back into contigs and
//! written as FASTA.
pub mod bubble;
pub mod chunk;
pub mod cli;
pub mod error;
pub mod features;
pub mod hmm;
pub mod io;
pub mod merge;
pub mod params;
pub mod poa;
pub mod reads;
pub mod repeats;
pub mod rle;
pub mod utils;

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use log::{info, trace};
use rust_htslib::bam;

use crate::{
    chunk::Chunk,
    error::PolishError,
    features::FeatureWriter,
    io::dumps,
    params::PolishParams,
    reads::{poor_mans_downsample, reads_and_alignments_for_chunk},
    repeats::RepeatCountMatrix,
    rle::RleString,
};

/// Optional per-chunk diagnostic outputs, each enabled by a file base name.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub poa_dot: Option<String>,
    pub poa_tsv: Option<String>,
    pub repeat_counts: Option<String>,
    pub haplotype_reads: Option<String>,
    pub haplotype_bams: Option<String>,
}

/// Everything a worker needs besides its chunk. Shared read-only across all
/// workers.
pub struct PolishOptions<'a> {
    pub bam_path: &'a str,
    pub params: &'a PolishParams,
    pub matrix: &'a RepeatCountMatrix,
    pub diploid: bool,
    pub dumps: &'a DumpOptions,
    pub features: Option<&'a dyn FeatureWriter>,
    pub feature_max_run_length: usize,
}

/// One chunk's polished output, placed into the dense result array at
/// `chunk_idx` before merging.
#[derive(Debug)]
pub struct ChunkResult {
    pub chunk_idx: usize,
    pub hap1: String,
    pub hap2: Option<String>,
    pub h1_reads: BTreeSet<String>,
    pub h2_reads: BTreeSet<String>,
}

/// The main work of `burnish` happens in this function. It is meant to be
/// called from inside a rayon parallel iterator, one call per chunk. Each
/// call opens its own alignment reader (indexed readers are stateful), works
/// entirely on chunk-local data, and returns the polished consensus for its
/// window. Any error returned from here is fatal for the whole run.
pub fn polish_chunk(
    chunk_idx: usize,
    chunk: &Chunk,
    reference: &HashMap<String, Vec<u8>>,
    opts: &PolishOptions,
) -> Result<ChunkResult> {
    let tidx = rayon::current_thread_index().unwrap_or(0);
    trace!("Thread {tidx} polishing chunk {chunk_idx} ({})", chunk.fetch_definition());
    let p = opts.params;

    let full_ref = reference.get(&chunk.ref_name).ok_or_else(|| {
        PolishError::MalformedInput {
            msg: format!(
                "reference sequence missing for contig {}. Perhaps the alignment and assembly are mismatched?",
                chunk.ref_name
            ),
        }
    })?;
    if chunk.boundary_start >= full_ref.len() {
        return Err(PolishError::MalformedInput {
            msg: format!(
                "contig {} has length {} but chunk {chunk_idx} starts at {}. Perhaps the alignment and assembly are mismatched?",
                chunk.ref_name,
                full_ref.len(),
                chunk.boundary_start
            ),
        }
        .into());
    }
    let window = &full_ref[chunk.boundary_start..chunk.boundary_end.min(full_ref.len())];
    let ref_rle = if p.use_run_length_encoding {
        RleString::compress(window)
    } else {
        RleString::without_rle(window)
    };

    let mut bam = bam::IndexedReader::from_path(opts.bam_path)
        .with_context(|| format!("could not open indexed alignment file {}", opts.bam_path))?;
    let (reads, alignments) =
        reads_and_alignments_for_chunk(&mut bam, chunk, &ref_rle, p.use_run_length_encoding)?;

    let (reads, alignments) = if p.max_depth > 0 {
        let before = reads.len();
        let (did, reads, alignments) =
            poor_mans_downsample(p.max_depth, chunk, reads, alignments, p.seed, chunk_idx);
        if did {
            info!(
                "Chunk {chunk_idx}: downsampled from {before} to {} reads",
                reads.len()
            );
        }
        (reads, alignments)
    } else {
        (reads, alignments)
    };

    let (mut poa, final_alignments) = poa::realign_all(&reads, alignments, &ref_rle, p);

    if let Some(base) = &opts.dumps.poa_dot {
        let path = dumps::chunk_file_name(base, "poa", chunk_idx, chunk, "dot");
        dumps::write_poa_dot(&path, &poa)?;
    }
    if let Some(base) = &opts.dumps.poa_tsv {
        let path = dumps::chunk_file_name(base, "poa", chunk_idx, chunk, "tsv");
        dumps::write_poa_tsv(&path, &poa)?;
    }
    if let Some(base) = &opts.dumps.repeat_counts {
        let path = dumps::chunk_file_name(base, "repeatCount", chunk_idx, chunk, "tsv");
        dumps::write_repeat_counts_tsv(&path, &poa, &reads)?;
    }
    if let Some(writer) = opts.features {
        writer.write_features(chunk_idx, chunk, &poa, &reads, opts.feature_max_run_length)?;
    }

    if !opts.diploid {
        if p.use_run_length_encoding {
            repeats::estimate_repeat_counts(&mut poa, opts.matrix);
        }
        return Ok(ChunkResult {
            chunk_idx,
            hap1: expand_to_string(&poa.ref_string)?,
            hap2: None,
            h1_reads: BTreeSet::new(),
            h2_reads: BTreeSet::new(),
        });
    }

    // diploid: detect bubbles, phase reads, and build one consensus per
    // haplotype with haplotype-specific repeat counts
    let bg = bubble::bubble_graph_from_poa(&poa, &reads, &final_alignments, p);
    let phase = bubble::phase_bubble_graph(&bg, &reads, p);
    info!(
        "Chunk {chunk_idx}: of {} reads, {} phased into hap1 and {} into hap2 ({} unphased) over {} bubbles",
        reads.len(),
        phase.h1_reads.len(),
        phase.h2_reads.len(),
        phase.unphased.len(),
        bg.bubbles.len()
    );

    let mut members1 = vec![false; reads.len()];
    for &idx in &phase.h1_idxs {
        members1[idx] = true;
    }
    let mut members2 = vec![false; reads.len()];
    for &idx in &phase.h2_idxs {
        members2[idx] = true;
    }
    let (lengths1, lengths2) = if p.use_run_length_encoding {
        (
            repeats::phased_node_run_lengths(&poa, opts.matrix, &members1),
            repeats::phased_node_run_lengths(&poa, opts.matrix, &members2),
        )
    } else {
        let current: Vec<u64> = poa.nodes.iter().map(|n| n.run_length).collect();
        (current.clone(), current)
    };

    let hap1 = bubble::haplotype_consensus(
        &poa,
        &bg,
        &phase.fragment.hap1,
        &lengths1,
        p.use_run_length_encoding,
    );
    let hap2 = bubble::haplotype_consensus(
        &poa,
        &bg,
        &phase.fragment.hap2,
        &lengths2,
        p.use_run_length_encoding,
    );

    if let Some(base) = &opts.dumps.haplotype_reads {
        let path = dumps::chunk_file_name(base, "haplotypeReads", chunk_idx, chunk, "tsv");
        dumps::write_haplotype_reads(&path, &phase.h1_reads, &phase.h2_reads, &phase.unphased)?;
    }
    if let Some(base) = &opts.dumps.haplotype_bams {
        dumps::write_haplotype_bams(
            base,
            opts.bam_path,
            chunk_idx,
            chunk,
            &phase.h1_reads,
            &phase.h2_reads,
        )?;
    }

    Ok(ChunkResult {
        chunk_idx,
        hap1: expand_to_string(&hap1)?,
        hap2: Some(expand_to_string(&hap2)?),
        h1_reads: phase.h1_reads,
        h2_reads: phase.h2_reads,
    })
}

fn expand_to_string(rle: &RleString) -> Result<String> {
    String::from_utf8(rle.expand()).map_err(|_| {
        PolishError::Internal {
            msg: "consensus contains non-UTF8 bytes".into(),
        }
        .into()
    })
}
