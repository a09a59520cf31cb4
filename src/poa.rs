//! # Partial-order alignment over a polishing window
//!
//! The graph starts as a straight line over the reference runs (node 0 is a
//! start sentinel). Every read alignment folds evidence into it: aligned
//! pairs add base/run-length observations on nodes, skipped reference runs
//! add delete weight, and unaligned read runs between two anchors attach as
//! insert branches. The consensus is re-derived as the maximum-weight path
//! through that evidence, and reads are realigned against it with the
//! pair-HMM until the consensus stops changing.
use std::collections::HashMap;

use crate::{
    hmm::PairHmm,
    params::PolishParams,
    reads::{ChunkRead, ReadAlignment},
    rle::RleString,
};

/// One read's vote at a node: the base and run length it aligned there.
#[derive(Debug, Clone)]
pub struct BaseObservation {
    pub read_idx: usize,
    pub base: u8,
    pub run_length: u64,
    pub forward_strand: bool,
    pub weight: f64,
}

/// A read subsequence attached between two anchored nodes.
#[derive(Debug, Clone)]
pub struct PoaInsert {
    pub seq: RleString,
    pub weight: f64,
    pub read_idxs: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PoaNode {
    pub base: u8,
    pub run_length: u64,
    pub delete_weight: f64,
    pub observations: Vec<BaseObservation>,
    /// Branches attached after this node.
    pub inserts: Vec<PoaInsert>,
}

impl PoaNode {
    fn new(base: u8, run_length: u64) -> Self {
        PoaNode {
            base,
            run_length,
            delete_weight: 0.0,
            observations: Vec::new(),
            inserts: Vec::new(),
        }
    }

    /// Accumulated weight of observations voting for `base`.
    pub fn base_weight(&self, base: u8) -> f64 {
        self.observations
            .iter()
            .filter(|obs| obs.base == base)
            .map(|obs| obs.weight)
            .sum()
    }

    pub fn total_observation_weight(&self) -> f64 {
        self.observations.iter().map(|obs| obs.weight).sum()
    }

    /// The best-supported base at this node, ties broken toward the current
    /// consensus base.
    pub fn best_base(&self) -> (u8, f64) {
        let mut weights: HashMap<u8, f64> = HashMap::new();
        for obs in &self.observations {
            *weights.entry(obs.base).or_insert(0.0) += obs.weight;
        }
        let current = weights.get(&self.base).copied().unwrap_or(0.0);
        let mut best = (self.base, current);
        let mut candidates: Vec<_> = weights.into_iter().collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        for (base, weight) in candidates {
            if weight > best.1 {
                best = (base, weight);
            }
        }
        best
    }

    /// The heaviest insert branch attached after this node, ties broken by
    /// expanded sequence.
    pub fn best_insert(&self) -> Option<&PoaInsert> {
        self.inserts.iter().min_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.seq.expand().cmp(&b.seq.expand()))
        })
    }
}

#[derive(Debug)]
pub struct Poa {
    /// `nodes[0]` is the start sentinel; `nodes[k]` covers run `k - 1` of
    /// `ref_string`.
    pub nodes: Vec<PoaNode>,
    pub ref_string: RleString,
}

impl Poa {
    /// Straight-line graph over the reference runs, no evidence yet.
    pub fn from_reference(reference: &RleString) -> Self {
        let mut nodes = Vec::with_capacity(reference.len() + 1);
        nodes.push(PoaNode::new(0, 0)); // start sentinel
        for i in 0..reference.len() {
            nodes.push(PoaNode::new(reference.bases[i], reference.run_lengths[i]));
        }
        Poa {
            nodes,
            ref_string: reference.clone(),
        }
    }

    /// Build a graph over `reference` and fold in every read's alignment.
    pub fn build(
        reference: &RleString,
        reads: &[ChunkRead],
        alignments: &[ReadAlignment],
    ) -> Self {
        let mut poa = Poa::from_reference(reference);
        for (read_idx, (read, alignment)) in reads.iter().zip(alignments).enumerate() {
            poa.add_read(read_idx, read, alignment);
        }
        poa
    }

    fn add_read(&mut self, read_idx: usize, read: &ChunkRead, alignment: &ReadAlignment) {
        let weights = read.weights();
        let mut prev: Option<(usize, usize)> = None;
        for &(read_pos, ref_pos) in alignment {
            let weight = weights[read_pos];

            if let Some((prev_read, prev_ref)) = prev {
                // reference runs skipped between anchors were deleted
                for skipped in prev_ref + 1..ref_pos {
                    self.nodes[skipped + 1].delete_weight += weight;
                }
                // read runs skipped between anchors were inserted
                if read_pos > prev_read + 1 {
                    let seq = read.seq.substring(prev_read + 1, read_pos);
                    let insert_weight = (prev_read + 1..read_pos)
                        .map(|i| weights[i])
                        .sum::<f64>()
                        / (read_pos - prev_read - 1) as f64;
                    self.add_insert(prev_ref + 1, seq, insert_weight, read_idx);
                }
            }

            self.nodes[ref_pos + 1].observations.push(BaseObservation {
                read_idx,
                base: read.seq.bases[read_pos],
                run_length: read.seq.run_lengths[read_pos],
                forward_strand: read.forward_strand,
                weight,
            });
            prev = Some((read_pos, ref_pos));
        }
    }

    fn add_insert(&mut self, node_idx: usize, seq: RleString, weight: f64, read_idx: usize) {
        let inserts = &mut self.nodes[node_idx].inserts;
        if let Some(insert) = inserts.iter_mut().find(|insert| insert.seq == seq) {
            insert.weight += weight;
            insert.read_idxs.push(read_idx);
        } else {
            inserts.push(PoaInsert {
                seq,
                weight,
                read_idxs: vec![read_idx],
            });
        }
    }

    /// Re-derive the consensus as the maximum-weight path: keep nodes whose
    /// aligned support beats their delete weight (with the best-supported
    /// base), and splice in insert branches carrying more than half the local
    /// coverage.
    pub fn consensus(&self, use_rle: bool) -> RleString {
        let mut runs: Vec<(u8, u64)> = Vec::with_capacity(self.nodes.len());
        for (idx, node) in self.nodes.iter().enumerate() {
            if idx > 0 {
                let support = node.total_observation_weight();
                if support >= node.delete_weight {
                    let (base, _) = node.best_base();
                    runs.push((base, node.run_length));
                }
            }
            let local_coverage = if idx == 0 {
                self.nodes
                    .get(1)
                    .map_or(0.0, |n| n.total_observation_weight() + n.delete_weight)
            } else {
                node.total_observation_weight() + node.delete_weight
            };
            if let Some(insert) = node.best_insert() {
                if insert.weight * 2.0 > local_coverage {
                    for i in 0..insert.seq.len() {
                        runs.push((insert.seq.bases[i], insert.seq.run_lengths[i]));
                    }
                }
            }
        }
        runs_to_rle(runs, use_rle)
    }

    /// Rebuild `ref_string` from the nodes' current bases and run lengths.
    /// Used after the repeat-count estimator rewrites run lengths.
    pub fn refresh_ref_string(&mut self) {
        let runs = self.nodes[1..]
            .iter()
            .map(|node| (node.base, node.run_length))
            .collect::<Vec<_>>();
        self.ref_string = runs_to_rle(runs, true);
    }
}

fn runs_to_rle(runs: Vec<(u8, u64)>, use_rle: bool) -> RleString {
    if use_rle {
        RleString::from_base_runs(runs)
    } else {
        let expanded: Vec<u8> = runs.iter().map(|&(base, _)| base).collect();
        RleString::without_rle(&expanded)
    }
}

/// Iteratively refine the POA: realign every read to the current consensus
/// with the pair-HMM and rebuild the graph, until the consensus is stable or
/// the pass cap is reached. Returns the final graph together with each read's
/// final alignment to it.
pub fn realign_all(
    reads: &[ChunkRead],
    alignments: Vec<ReadAlignment>,
    reference: &RleString,
    params: &PolishParams,
) -> (Poa, Vec<ReadAlignment>) {
    let use_rle = params.use_run_length_encoding;
    let hmm = PairHmm::new(&params.hmm);
    let band = params.hmm.band_size;

    let mut current = reference.clone();
    let mut current_alignments = alignments;
    let mut poa = Poa::build(&current, reads, &current_alignments);

    for _ in 0..params.max_poa_iterations {
        let consensus = poa.consensus(use_rle);
        if consensus == current {
            break;
        }

        let mut new_alignments = Vec::with_capacity(reads.len());
        for (read, old) in reads.iter().zip(&current_alignments) {
            let pairs = realign_read(&hmm, read, old, &consensus, band);
            new_alignments.push(if pairs.is_empty() { old.clone() } else { pairs });
        }
        poa = Poa::build(&consensus, reads, &new_alignments);
        current_alignments = new_alignments;
        current = consensus;
    }

    (poa, current_alignments)
}

/// Realign one read against the new consensus, anchored on the reference span
/// of its previous alignment widened by the band.
fn realign_read(
    hmm: &PairHmm,
    read: &ChunkRead,
    old: &ReadAlignment,
    consensus: &RleString,
    band: usize,
) -> ReadAlignment {
    let (anchor_lo, anchor_hi) = match (old.first(), old.last()) {
        (Some(&(_, lo)), Some(&(_, hi))) => (lo, hi),
        _ => (0, consensus.len().saturating_sub(1)),
    };
    let lo = anchor_lo.saturating_sub(band);
    let hi = (anchor_hi + 1 + band).min(consensus.len());
    if lo >= hi {
        return Vec::new();
    }
    hmm.posterior_match_pairs(&read.seq.bases, &consensus.bases[lo..hi])
        .into_iter()
        .map(|(read_pos, ref_pos)| (read_pos, ref_pos + lo))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PolishParams;

    fn plain_read(id: &str, seq: &[u8]) -> ChunkRead {
        ChunkRead {
            id: id.into(),
            seq: RleString::without_rle(seq),
            qualities: None,
            forward_strand: true,
        }
    }

    fn diagonal(len: usize) -> ReadAlignment {
        (0..len).map(|i| (i, i)).collect()
    }

    fn params() -> PolishParams {
        PolishParams {
            use_run_length_encoding: false,
            ..PolishParams::default()
        }
    }

    #[test]
    fn consensus_of_agreeing_reads_is_the_reference() {
        let reference = RleString::without_rle(b"ACGTACGTAC");
        let reads: Vec<_> = (0..5)
            .map(|i| plain_read(&format!("r{i}"), b"ACGTACGTAC"))
            .collect();
        let alignments = vec![diagonal(10); 5];
        let (poa, _) = realign_all(&reads, alignments, &reference, &params());
        assert_eq!(poa.ref_string.expand(), b"ACGTACGTAC");
        // consensus length equals the number of non-sentinel nodes
        assert_eq!(poa.ref_string.len(), poa.nodes.len() - 1);
    }

    #[test]
    fn majority_substitution_is_adopted() {
        let reference = RleString::without_rle(b"ACGTACGTAC");
        let mut reads = Vec::new();
        for i in 0..8 {
            // all reads carry T instead of A at position 4
            reads.push(plain_read(&format!("r{i}"), b"ACGTTCGTAC"));
        }
        let alignments = vec![diagonal(10); 8];
        let (poa, _) = realign_all(&reads, alignments, &reference, &params());
        assert_eq!(poa.ref_string.expand(), b"ACGTTCGTAC");
    }

    #[test]
    fn majority_deletion_drops_a_node() {
        let reference = RleString::without_rle(b"ACGTACGTAC");
        let mut alignments = Vec::new();
        let mut reads = Vec::new();
        for i in 0..6 {
            // reads skip reference position 4
            reads.push(plain_read(&format!("r{i}"), b"ACGTCGTAC"));
            let pairs: ReadAlignment = (0..9)
                .map(|k| if k < 4 { (k, k) } else { (k, k + 1) })
                .collect();
            alignments.push(pairs);
        }
        let (poa, _) = realign_all(&reads, alignments, &reference, &params());
        assert_eq!(poa.ref_string.expand(), b"ACGTCGTAC");
    }

    #[test]
    fn majority_insertion_is_spliced_in() {
        let reference = RleString::without_rle(b"ACGTACGTAC");
        let mut alignments = Vec::new();
        let mut reads = Vec::new();
        for i in 0..6 {
            // reads carry an extra G between positions 4 and 5
            reads.push(plain_read(&format!("r{i}"), b"ACGTAGCGTAC"));
            let pairs: ReadAlignment = (0..10)
                .map(|k| if k <= 4 { (k, k) } else { (k + 1, k) })
                .collect();
            alignments.push(pairs);
        }
        let (poa, _) = realign_all(&reads, alignments, &reference, &params());
        assert_eq!(poa.ref_string.expand(), b"ACGTAGCGTAC");
    }

    #[test]
    fn rle_observations_carry_read_run_lengths() {
        let reference = RleString::compress(b"AACCCGT");
        let read = ChunkRead {
            id: "r0".into(),
            seq: RleString::compress(b"AACCGT"),
            qualities: None,
            forward_strand: true,
        };
        // run-level alignment: A<->A, C<->C, G<->G, T<->T
        let alignment: ReadAlignment = (0..4).map(|i| (i, i)).collect();
        let poa = Poa::build(&reference, &[read], &[alignment]);
        // the C node saw a run of length 2 from the read
        assert_eq!(poa.nodes[2].observations[0].run_length, 2);
        assert_eq!(poa.nodes[2].run_length, 3);
    }

    #[test]
    fn no_reads_leaves_reference_untouched() {
        let reference = RleString::compress(b"AAACGT");
        let (poa, _) = realign_all(&[], Vec::new(), &reference, &PolishParams::default());
        assert_eq!(poa.ref_string.expand(), b"AAACGT");
    }
}
