//! # Bayesian repeat-count re-estimation
//!
//! In RLE space the consensus only decides which base each run carries; how
//! many times it repeats is chosen afterwards by a site-wise posterior over
//! the run lengths observed in the reads, scored against a four-dimensional
//! substitution matrix indexed `[base][strand][trueLength][observedLength]`.
use anyhow::Result;
use ndarray::Array4;

use crate::{error::PolishError, poa::Poa};

const N_BASES: usize = 4;
const N_STRANDS: usize = 2;

/// Log-probability matrix `M[base][strand][trueLength][observedLength]`.
#[derive(Debug, Clone)]
pub struct RepeatCountMatrix {
    log_probs: Array4<f64>,
    max_run_length: usize,
    max_observed: usize,
}

fn base_index(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

impl RepeatCountMatrix {
    /// Decode an inline matrix from the parameter file, shape-checked against
    /// `max_run_length`.
    pub fn from_nested(
        raw: &[Vec<Vec<Vec<f64>>>],
        max_run_length: usize,
    ) -> Result<RepeatCountMatrix> {
        let malformed = |msg: String| PolishError::MalformedInput { msg };
        if raw.len() != N_BASES {
            return Err(malformed(format!(
                "repeat-count matrix must have {N_BASES} base planes, got {}",
                raw.len()
            ))
            .into());
        }
        let true_dim = max_run_length + 1;
        let obs_dim = raw[0]
            .first()
            .and_then(|strand| strand.first())
            .map(Vec::len)
            .unwrap_or(0);
        if obs_dim == 0 {
            return Err(malformed("repeat-count matrix has an empty observed axis".into()).into());
        }

        let mut log_probs =
            Array4::from_elem((N_BASES, N_STRANDS, true_dim, obs_dim), f64::NEG_INFINITY);
        for (b, strands) in raw.iter().enumerate() {
            if strands.len() != N_STRANDS {
                return Err(malformed(format!(
                    "repeat-count matrix base plane {b} must have {N_STRANDS} strands"
                ))
                .into());
            }
            for (s, rows) in strands.iter().enumerate() {
                if rows.len() < true_dim {
                    return Err(malformed(format!(
                        "repeat-count matrix [{b}][{s}] has {} true-length rows, need {true_dim}",
                        rows.len()
                    ))
                    .into());
                }
                for (t, row) in rows.iter().enumerate().take(true_dim) {
                    if row.len() != obs_dim {
                        return Err(malformed(format!(
                            "repeat-count matrix [{b}][{s}][{t}] has ragged observed axis"
                        ))
                        .into());
                    }
                    for (o, &lp) in row.iter().enumerate() {
                        log_probs[[b, s, t, o]] = lp;
                    }
                }
            }
        }
        Ok(RepeatCountMatrix {
            log_probs,
            max_run_length,
            max_observed: obs_dim - 1,
        })
    }

    /// Parametric fallback when the parameter file carries no matrix: a
    /// peaked error model where the observed length matches the true length
    /// with high probability and decays exponentially with distance. Only the
    /// argmax matters downstream, so the rows are not exactly normalized.
    pub fn error_model(max_run_length: usize) -> RepeatCountMatrix {
        let dim = max_run_length + 1;
        let mut log_probs = Array4::from_elem((N_BASES, N_STRANDS, dim, dim), f64::NEG_INFINITY);
        for b in 0..N_BASES {
            for s in 0..N_STRANDS {
                for t in 0..dim {
                    for o in 0..dim {
                        let d = t.abs_diff(o);
                        log_probs[[b, s, t, o]] = if d == 0 {
                            0.9f64.ln()
                        } else {
                            0.05f64.ln() - d as f64
                        };
                    }
                }
            }
        }
        RepeatCountMatrix {
            log_probs,
            max_run_length,
            max_observed: max_run_length,
        }
    }

    pub fn max_run_length(&self) -> usize {
        self.max_run_length
    }

    fn log_prob(&self, base_idx: usize, forward: bool, true_len: usize, observed: u64) -> f64 {
        let strand = usize::from(!forward);
        let observed = (observed as usize).min(self.max_observed);
        self.log_probs[[base_idx, strand, true_len, observed]]
    }

    /// Posterior argmax over run lengths `1..=max_run_length` under a flat
    /// prior; ties go to the smaller length. `None` without observations.
    pub fn most_likely_run_length(
        &self,
        base: u8,
        observations: &[(u64, bool, f64)],
    ) -> Option<u64> {
        let base_idx = base_index(base)?;
        if observations.is_empty() {
            return None;
        }
        let mut best = (0u64, f64::NEG_INFINITY);
        for t in 1..=self.max_run_length {
            let posterior: f64 = observations
                .iter()
                .map(|&(observed, forward, weight)| {
                    weight * self.log_prob(base_idx, forward, t, observed)
                })
                .sum();
            if posterior > best.1 {
                best = (t as u64, posterior);
            }
        }
        Some(best.0)
    }
}

/// Re-estimate every node's run length from the run lengths its reads
/// observed, then refresh the consensus string.
pub fn estimate_repeat_counts(poa: &mut Poa, matrix: &RepeatCountMatrix) {
    let new_lengths = node_run_lengths(poa, matrix, None);
    for (node, length) in poa.nodes.iter_mut().zip(&new_lengths) {
        node.run_length = *length;
    }
    poa.refresh_ref_string();
}

/// Per-node run lengths estimated from one haplotype's reads only
/// (`members[read_idx]`), leaving nodes without in-haplotype observations at
/// their current length. Used once per haplotype in diploid mode.
pub fn phased_node_run_lengths(
    poa: &Poa,
    matrix: &RepeatCountMatrix,
    members: &[bool],
) -> Vec<u64> {
    node_run_lengths(poa, matrix, Some(members))
}

fn node_run_lengths(poa: &Poa, matrix: &RepeatCountMatrix, members: Option<&[bool]>) -> Vec<u64> {
    poa.nodes
        .iter()
        .map(|node| {
            let observations: Vec<(u64, bool, f64)> = node
                .observations
                .iter()
                .filter(|obs| obs.base == node.base)
                .filter(|obs| members.map_or(true, |members| members[obs.read_idx]))
                .map(|obs| (obs.run_length, obs.forward_strand, obs.weight))
                .collect();
            matrix
                .most_likely_run_length(node.base, &observations)
                .unwrap_or(node.run_length)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        poa::Poa,
        reads::{ChunkRead, ReadAlignment},
        rle::RleString,
    };

    #[test]
    fn agreeing_observations_win() {
        let matrix = RepeatCountMatrix::error_model(10);
        let obs = vec![(4, true, 1.0), (4, false, 1.0), (4, true, 1.0)];
        assert_eq!(matrix.most_likely_run_length(b'A', &obs), Some(4));
    }

    #[test]
    fn posterior_pulls_toward_the_majority() {
        let matrix = RepeatCountMatrix::error_model(10);
        let obs = vec![(3, true, 1.0), (3, false, 1.0), (3, true, 1.0), (5, true, 1.0)];
        assert_eq!(matrix.most_likely_run_length(b'C', &obs), Some(3));
    }

    #[test]
    fn no_observations_gives_none() {
        let matrix = RepeatCountMatrix::error_model(10);
        assert_eq!(matrix.most_likely_run_length(b'G', &[]), None);
        assert_eq!(matrix.most_likely_run_length(b'N', &[(3, true, 1.0)]), None);
    }

    #[test]
    fn estimator_rewrites_the_consensus() {
        // reference has AAA but every read saw AAAA
        let reference = RleString::compress(b"AAACGT");
        let reads: Vec<ChunkRead> = (0..4)
            .map(|i| ChunkRead {
                id: format!("r{i}"),
                seq: RleString::compress(b"AAAACGT"),
                qualities: None,
                forward_strand: i % 2 == 0,
            })
            .collect();
        let alignments: Vec<ReadAlignment> = vec![(0..4).map(|k| (k, k)).collect(); 4];
        let mut poa = Poa::build(&reference, &reads, &alignments);
        estimate_repeat_counts(&mut poa, &RepeatCountMatrix::error_model(10));
        assert_eq!(poa.ref_string.expand(), b"AAAACGT");
    }

    #[test]
    fn phased_lengths_split_by_read_set() {
        let reference = RleString::compress(b"AACG");
        let reads: Vec<ChunkRead> = [b"AACG".as_slice(), b"AACG", b"AAACG", b"AAACG"]
            .iter()
            .enumerate()
            .map(|(i, seq)| ChunkRead {
                id: format!("r{i}"),
                seq: RleString::compress(seq),
                qualities: None,
                forward_strand: true,
            })
            .collect();
        let alignments: Vec<ReadAlignment> = vec![(0..3).map(|k| (k, k)).collect(); 4];
        let poa = Poa::build(&reference, &reads, &alignments);
        let matrix = RepeatCountMatrix::error_model(10);
        let h1 = phased_node_run_lengths(&poa, &matrix, &[true, true, false, false]);
        let h2 = phased_node_run_lengths(&poa, &matrix, &[false, false, true, true]);
        // node 1 is the A run: haplotype 1 saw length 2, haplotype 2 length 3
        assert_eq!(h1[1], 2);
        assert_eq!(h2[1], 3);
    }

    #[test]
    fn inline_matrix_shape_is_validated() {
        let raw = vec![vec![vec![vec![0.0; 3]; 3]; 2]; 4];
        assert!(RepeatCountMatrix::from_nested(&raw, 2).is_ok());
        assert!(RepeatCountMatrix::from_nested(&raw, 5).is_err());
        let bad = vec![vec![vec![vec![0.0; 3]; 3]; 1]; 4];
        assert!(RepeatCountMatrix::from_nested(&bad, 2).is_err());
    }
}
