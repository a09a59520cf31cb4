//! # Command line interface for `burnish`
use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::features::FeatureType;

#[derive(Parser)]
#[command(
    name = "burnish",
    author,
    version,
    about = "Polishes a draft assembly using read alignments",
    long_about = None
)]
pub struct Cli {
    /// Alignment of reads to the assembly. Must be an indexed BAM.
    pub alignment: String,

    /// Draft assembly in FASTA format.
    pub assembly: String,

    /// JSON parameter file.
    pub params: String,

    /// Log level
    #[arg(short = 'a', long, value_enum, default_value = "critical")]
    pub log_level: LogLevel,

    /// Number of worker threads to use
    #[arg(short = 't', long, default_value_t = 1, value_parser = positive_thread_count)]
    pub threads: usize,

    /// Base name for output files
    #[arg(short = 'o', long, default_value = "output")]
    pub output_base: String,

    /// Only polish the given region. Format: name or name:start-end
    /// (zero-based, end exclusive).
    #[arg(short = 'r', long)]
    pub region: Option<String>,

    /// Override the downsampling depth from the parameter file
    #[arg(short = 'p', long)]
    pub depth: Option<u64>,

    /// Perform diploid phasing and emit two haplotype assemblies
    #[arg(short = '2', long)]
    pub diploid: bool,

    /// Produce features for the default feature type
    #[arg(short = 'f', long)]
    pub produce_features: bool,

    /// Produce features of a specific type (overrides -f)
    #[arg(short = 'F', long, value_enum)]
    pub feature_type: Option<FeatureType>,

    /// Max run length for RLE feature types
    #[arg(short = 'L', long)]
    pub feature_max_run_length: Option<usize>,

    /// Truth alignments for feature labeling. With --diploid, two
    /// comma-separated values.
    #[arg(short = 'u', long)]
    pub truth_alignments: Option<String>,

    /// Base name to write out the per-chunk POA as DOT files
    #[arg(short = 'd', long)]
    pub dump_poa_dot: Option<String>,

    /// Base name to write out per-chunk repeat count observations
    #[arg(short = 'i', long)]
    pub dump_repeat_counts: Option<String>,

    /// Base name to write out the per-chunk POA as TSV files
    #[arg(short = 'j', long)]
    pub dump_poa_tsv: Option<String>,

    /// Base name to write out per-chunk phased BAMs (diploid only)
    #[arg(short = 'm', long)]
    pub dump_haplotype_bams: Option<String>,

    /// Base name to write out per-chunk phased read sets (diploid only)
    #[arg(short = 'n', long)]
    pub dump_haplotype_reads: Option<String>,
}

impl Cli {
    /// The effective feature type: `-F` wins, `-f` falls back to the default
    /// layout for the current mode.
    pub fn effective_feature_type(&self) -> Option<FeatureType> {
        self.feature_type.or_else(|| {
            self.produce_features.then(|| {
                if self.diploid {
                    FeatureType::DiploidRle
                } else {
                    FeatureType::SplitRle
                }
            })
        })
    }

    /// Truth alignment paths, enforcing the one-per-haplotype rule in
    /// diploid mode.
    pub fn truth_alignment_paths(&self) -> Result<Vec<String>> {
        let Some(spec) = &self.truth_alignments else {
            return Ok(Vec::new());
        };
        let paths: Vec<String> = spec.split(',').map(str::to_string).collect();
        if self.diploid && paths.len() != 2 {
            bail!("--truth-alignments must have two comma-separated values with --diploid");
        }
        if !self.diploid && paths.len() != 1 {
            bail!("--truth-alignments must be a single path without --diploid");
        }
        Ok(paths)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Only warnings, errors, and coarse progress
    Critical,
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Critical => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

fn positive_thread_count(raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(0) => bail!("a thread count of 0 makes no sense, give at least 1"),
        Ok(count) => Ok(count),
        Err(_) => bail!("'{raw}' is not a valid thread count"),
    }
}
