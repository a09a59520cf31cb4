//! # Parameter file decoding
//!
//! All tunables live in a JSON parameter file under a top-level `polish`
//! object. Missing fields fall back to defaults, so a minimal file such as
//! `{"polish": {"chunkSize": 1000}}` is valid. The repeat-count substitution
//! matrix may be supplied inline as nested arrays indexed
//! `[base][strand][trueLength][observedLength]`; when absent, a parametric
//! error model is synthesized (see [`crate::repeats::RepeatCountMatrix`]).
use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{error::PolishError, repeats::RepeatCountMatrix};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Params {
    pub polish: PolishParams,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            polish: PolishParams::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolishParams {
    /// Width of each polishing window, in reference bases.
    pub chunk_size: usize,
    /// Extra bases carried on each side of a window; adjacent windows overlap
    /// by this amount on both flanks.
    pub chunk_boundary: usize,
    /// Per-window coverage cap enforced by downsampling. 0 disables the cap.
    pub max_depth: u64,
    pub use_run_length_encoding: bool,
    /// Process chunks in a seeded pseudo-random order for load balancing.
    pub shuffle_chunks: bool,
    /// Seed shared by chunk shuffling and per-chunk downsampling.
    pub seed: u64,
    /// Maximum consensus refinement passes in the POA engine.
    pub max_poa_iterations: usize,
    pub hmm: HmmParams,
    /// Fraction of a site's total weight a non-reference candidate must carry
    /// to open a bubble.
    pub min_candidate_weight: f64,
    /// Minimum accumulated read weight for a read-realized allele to enter a
    /// bubble's allele set.
    pub min_allele_support: f64,
    /// Reads whose haplotype log-likelihood ratio lies within +-tau stay
    /// unphased.
    pub phase_llr_threshold: f64,
    pub max_phase_rounds: usize,
    /// Largest run length the repeat-count estimator will propose.
    pub max_run_length: usize,
    /// Optional inline matrix, log probabilities indexed
    /// `[base][strand][trueLength][observedLength]`.
    pub repeat_count_matrix: Option<Vec<Vec<Vec<Vec<f64>>>>>,
}

impl Default for PolishParams {
    fn default() -> Self {
        PolishParams {
            chunk_size: 100_000,
            chunk_boundary: 50,
            max_depth: 64,
            use_run_length_encoding: true,
            shuffle_chunks: true,
            seed: 0,
            max_poa_iterations: 4,
            hmm: HmmParams::default(),
            min_candidate_weight: 0.3,
            min_allele_support: 2.0,
            phase_llr_threshold: 2.0,
            max_phase_rounds: 16,
            max_run_length: 50,
            repeat_count_matrix: None,
        }
    }
}

/// Pair-HMM probabilities used for read-to-consensus realignment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HmmParams {
    /// Probability that an aligned pair is a substitution.
    pub substitution: f64,
    pub insert_open: f64,
    pub insert_extend: f64,
    pub delete_open: f64,
    pub delete_extend: f64,
    /// Posterior match probability below which an aligned pair is discarded.
    pub min_posterior_match: f64,
    /// Half-width of the alignment band around the anchored diagonal.
    pub band_size: usize,
}

impl Default for HmmParams {
    fn default() -> Self {
        HmmParams {
            substitution: 0.05,
            insert_open: 0.05,
            insert_extend: 0.5,
            delete_open: 0.05,
            delete_extend: 0.5,
            min_posterior_match: 0.85,
            band_size: 64,
        }
    }
}

impl Params {
    /// Decode parameters from a JSON file and validate them.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Params> {
        let file = File::open(&path).map_err(|_| PolishError::InputUnavailable {
            path: path.as_ref().to_path_buf(),
        })?;
        let reader = BufReader::new(file);
        let params: Params = serde_json::from_reader(reader).with_context(|| {
            format!(
                "could not decode parameter file {}",
                path.as_ref().display()
            )
        })?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.polish;
        let malformed = |msg: String| PolishError::MalformedInput { msg };
        if p.chunk_size == 0 {
            return Err(malformed("chunkSize must be positive".into()).into());
        }
        if p.max_poa_iterations == 0 {
            return Err(malformed("maxPoaIterations must be positive".into()).into());
        }
        if p.max_run_length == 0 {
            return Err(malformed("maxRunLength must be positive".into()).into());
        }
        for (name, prob) in [
            ("hmm.substitution", p.hmm.substitution),
            ("hmm.insertOpen", p.hmm.insert_open),
            ("hmm.insertExtend", p.hmm.insert_extend),
            ("hmm.deleteOpen", p.hmm.delete_open),
            ("hmm.deleteExtend", p.hmm.delete_extend),
            ("hmm.minPosteriorMatch", p.hmm.min_posterior_match),
            ("minCandidateWeight", p.min_candidate_weight),
        ] {
            if !(0.0..1.0).contains(&prob) {
                return Err(malformed(format!("{name} must be in [0, 1), got {prob}")).into());
            }
        }
        if p.hmm.insert_open + p.hmm.delete_open >= 1.0 {
            return Err(
                malformed("hmm gap-open probabilities must sum to less than 1".into()).into(),
            );
        }
        // shape-check an inline matrix up front so workers never see a bad one
        self.repeat_matrix()?;
        Ok(())
    }

    /// The repeat-count substitution matrix: decoded from the parameter file
    /// when supplied inline, synthesized from the parametric error model
    /// otherwise.
    pub fn repeat_matrix(&self) -> Result<RepeatCountMatrix> {
        match &self.polish.repeat_count_matrix {
            Some(raw) => RepeatCountMatrix::from_nested(raw, self.polish.max_run_length),
            None => Ok(RepeatCountMatrix::error_model(self.polish.max_run_length)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_json_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"polish": {{"chunkSize": 400, "chunkBoundary": 50, "maxDepth": 30,
                 "useRunLengthEncoding": false, "hmm": {{"substitution": 0.1}}}}}}"#
        )
        .unwrap();
        let params = Params::from_json(file.path()).unwrap();
        assert_eq!(params.polish.chunk_size, 400);
        assert_eq!(params.polish.chunk_boundary, 50);
        assert_eq!(params.polish.max_depth, 30);
        assert!(!params.polish.use_run_length_encoding);
        assert_eq!(params.polish.hmm.substitution, 0.1);
        // untouched fields fall back to defaults
        assert_eq!(params.polish.max_poa_iterations, 4);
    }

    #[test]
    fn garbage_json_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(Params::from_json(file.path()).is_err());
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let mut params = Params::default();
        params.polish.hmm.substitution = 1.5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn missing_file_is_input_unavailable() {
        let err = Params::from_json("/no/such/params.json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolishError>(),
            Some(PolishError::InputUnavailable { .. })
        ));
    }
}
