//! # Feature-dump sidecar contract
//!
//! Training-feature generation for a downstream consensus model lives
//! outside this crate; only its capability surface appears here. The core
//! validates the configuration and calls through [`FeatureWriter`] once per
//! finished chunk.
use anyhow::Result;
use clap::ValueEnum;

use crate::{chunk::Chunk, error::PolishError, poa::Poa, reads::ChunkRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeatureType {
    /// Weighted likelihoods from POA nodes, non-RLE.
    #[value(name = "simple", alias = "simpleWeight")]
    Simple,
    /// Run lengths split into chunks.
    #[value(name = "split", alias = "splitRleWeight", alias = "rleWeight")]
    SplitRle,
    /// Run lengths split into per-nucleotide channels.
    #[value(name = "channel", alias = "channelRleWeight")]
    ChannelRle,
    /// Diploid features over both haplotypes.
    #[value(name = "diploid", alias = "diploidRleWeight")]
    DiploidRle,
}

impl FeatureType {
    /// Default run-length cap for each feature layout.
    pub fn default_max_run_length(self) -> usize {
        match self {
            FeatureType::Simple => 0,
            FeatureType::SplitRle => 10,
            FeatureType::ChannelRle => 12,
            FeatureType::DiploidRle => 50,
        }
    }

    pub fn requires_rle(self) -> bool {
        !matches!(self, FeatureType::Simple)
    }
}

/// Reject configurations where the feature layout and the RLE setting
/// contradict each other.
pub fn validate_feature_config(
    feature_type: Option<FeatureType>,
    use_run_length_encoding: bool,
) -> Result<()> {
    let Some(feature_type) = feature_type else {
        return Ok(());
    };
    if feature_type.requires_rle() != use_run_length_encoding {
        let msg = if use_run_length_encoding {
            "simple features require runLengthEncoding to be disabled"
        } else {
            "RLE feature types require runLengthEncoding to be enabled"
        };
        return Err(PolishError::Configuration { msg: msg.into() }.into());
    }
    Ok(())
}

/// Capability implemented by the external feature sidecar. The core calls it
/// after each chunk's POA is final, before the chunk's data is released.
pub trait FeatureWriter: Send + Sync {
    fn write_features(
        &self,
        chunk_idx: usize,
        chunk: &Chunk,
        poa: &Poa,
        reads: &[ChunkRead],
        max_run_length: usize,
    ) -> Result<()>;
}
