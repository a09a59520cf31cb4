use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use itertools::Itertools;
use log::{info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::{prelude::*, ThreadPoolBuilder};

use burnish::{
    chunk::Chunker,
    cli::Cli,
    error::PolishError,
    features::validate_feature_config,
    io::fasta,
    merge::merge_chunk_sequences,
    params::Params,
    polish_chunk,
    utils::parse_region,
    ChunkResult, DumpOptions, PolishOptions,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level.to_level_filter())
        .init();
    let start_time = Instant::now();

    check_inputs(&cli)?;

    info!("Parsing model parameters from file: {}", cli.params);
    let mut params = Params::from_json(&cli.params)?;
    if let Some(depth) = cli.depth {
        info!(
            "Overriding maxDepth parameter from {} to {depth}",
            params.polish.max_depth
        );
        params.polish.max_depth = depth;
    }

    let feature_type = cli.effective_feature_type();
    validate_feature_config(feature_type, params.polish.use_run_length_encoding)?;
    let feature_max_run_length = cli
        .feature_max_run_length
        .or_else(|| feature_type.map(|f| f.default_max_run_length()))
        .unwrap_or(0);
    let truth_alignments = cli.truth_alignment_paths()?;
    for path in &truth_alignments {
        if !Path::new(path).is_file() {
            return Err(PolishError::InputUnavailable { path: path.into() }.into());
        }
    }

    if (cli.dump_poa_dot.is_some() || cli.dump_poa_tsv.is_some()) && cli.region.is_none() {
        warn!("POA dump options are intended for use with a specific --region");
    }

    let matrix = params.repeat_matrix()?;
    let reference = fasta::read_assembly(&cli.assembly)?;
    let region = cli.region.as_deref().map(parse_region).transpose()?;

    let chunker = Chunker::from_alignment(
        &cli.alignment,
        region.as_ref(),
        params.polish.chunk_size,
        params.polish.chunk_boundary,
    )?;
    info!(
        "Set up chunker with chunk size {} and boundary {} (region={}), resulting in {} chunks",
        chunker.chunk_size,
        chunker.chunk_boundary,
        cli.region.as_deref().unwrap_or("all"),
        chunker.len()
    );
    if chunker.is_empty() {
        return Err(PolishError::EmptyWorkset.into());
    }

    let mut chunk_order: Vec<usize> = (0..chunker.len()).collect();
    if params.polish.shuffle_chunks {
        let mut rng = StdRng::seed_from_u64(params.polish.seed);
        chunk_order.shuffle(&mut rng);
    }

    ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()?;
    info!("Polishing {} chunks on {} thread(s)", chunker.len(), cli.threads);

    let dumps = DumpOptions {
        poa_dot: cli.dump_poa_dot.clone(),
        poa_tsv: cli.dump_poa_tsv.clone(),
        repeat_counts: cli.dump_repeat_counts.clone(),
        haplotype_reads: cli.diploid.then(|| cli.dump_haplotype_reads.clone()).flatten(),
        haplotype_bams: cli.diploid.then(|| cli.dump_haplotype_bams.clone()).flatten(),
    };
    let opts = PolishOptions {
        bam_path: &cli.alignment,
        params: &params.polish,
        matrix: &matrix,
        diploid: cli.diploid,
        dumps: &dumps,
        features: None, // the feature sidecar plugs in here
        feature_max_run_length,
    };

    // one task per chunk; each worker writes only its own result slot
    let mut results: Vec<ChunkResult> = chunk_order
        .par_iter()
        .map(|&chunk_idx| polish_chunk(chunk_idx, &chunker.chunks[chunk_idx], &reference, &opts))
        .collect::<Result<Vec<_>>>()?;
    results.sort_by_key(|result| result.chunk_idx);

    let phased_reads: usize = results
        .iter()
        .map(|r| r.h1_reads.len() + r.h2_reads.len())
        .sum();
    if cli.diploid {
        info!("Phased {phased_reads} reads across all chunks");
    }

    info!("Merging polished strings from {} chunks", results.len());
    let contigs_h1 = merge_all(&chunker, &results, |r| r.hap1.as_str());
    if cli.diploid {
        let contigs_h2 = merge_all(&chunker, &results, |r| {
            r.hap2.as_deref().unwrap_or(&r.hap1)
        });
        fasta::write_assembly(format!("{}.h1.fa", cli.output_base), &contigs_h1)?;
        fasta::write_assembly(format!("{}.h2.fa", cli.output_base), &contigs_h2)?;
    } else {
        fasta::write_assembly(format!("{}.fa", cli.output_base), &contigs_h1)?;
    }

    info!(
        "Finished polishing in {:.1}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Verify the input files (and the alignment index) exist before any work.
fn check_inputs(cli: &Cli) -> Result<()> {
    for path in [&cli.alignment, &cli.assembly, &cli.params] {
        if !Path::new(path).is_file() {
            return Err(PolishError::InputUnavailable { path: path.into() }.into());
        }
    }
    let index = format!("{}.bai", cli.alignment);
    if !Path::new(&index).is_file() {
        return Err(PolishError::MissingIndex {
            path: cli.alignment.clone().into(),
        }
        .into());
    }
    Ok(())
}

/// Group chunk results by contig (chunks are in header x coordinate order)
/// and merge each contig's chain, parallel across contigs.
fn merge_all<'a, F>(
    chunker: &Chunker,
    results: &'a [ChunkResult],
    sequence_of: F,
) -> Vec<(String, String)>
where
    F: Fn(&'a ChunkResult) -> &'a str + Sync,
{
    let contig_ranges: Vec<(String, Vec<usize>)> = chunker
        .chunks
        .iter()
        .enumerate()
        .group_by(|(_, chunk)| chunk.ref_name.clone())
        .into_iter()
        .map(|(name, group)| (name, group.map(|(idx, _)| idx).collect()))
        .collect();

    contig_ranges
        .into_par_iter()
        .map(|(name, indices)| {
            let sequences: Vec<String> = indices
                .iter()
                .map(|&idx| sequence_of(&results[idx]).to_string())
                .collect();
            let overlaps: Vec<usize> = indices
                .iter()
                .tuple_windows()
                .map(|(&left, &right)| {
                    chunker.chunks[left]
                        .boundary_end
                        .saturating_sub(chunker.chunks[right].boundary_start)
                })
                .collect();
            (name, merge_chunk_sequences(&sequences, &overlaps))
        })
        .collect()
}
