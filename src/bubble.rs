//! # Variant bubbles and two-haplotype phasing
//!
//! A bubble is a maximal span of consensus positions where non-reference
//! evidence in the POA clears the candidate-weight threshold. Its allele set
//! is the reference allele plus every read-realized alternative with enough
//! support. Phasing partitions reads into two haplotypes by alternating
//! maximization of the summed per-site log-likelihoods.
use std::collections::BTreeSet;

use log::debug;

use crate::{
    hmm::PairHmm,
    params::PolishParams,
    poa::Poa,
    reads::{ChunkRead, ReadAlignment},
    rle::RleString,
};

/// A candidate variant site over consensus runs `[run_start, run_end)`.
/// Exactly one allele is the reference allele. `read_likelihoods` holds, for
/// every read anchored on both flanks, its log-likelihood under each allele.
#[derive(Debug)]
pub struct Bubble {
    pub run_start: usize,
    pub run_end: usize,
    pub alleles: Vec<RleString>,
    pub ref_allele: usize,
    pub read_likelihoods: Vec<(usize, Vec<f64>)>,
}

#[derive(Debug)]
pub struct BubbleGraph {
    pub bubbles: Vec<Bubble>,
}

/// Phased per-site allele choices; `hap1[i]`/`hap2[i]` index into
/// `bubbles[ref_start + i].alleles`.
#[derive(Debug)]
pub struct GenomeFragment {
    pub ref_start: usize,
    pub length: usize,
    pub hap1: Vec<usize>,
    pub hap2: Vec<usize>,
}

#[derive(Debug)]
pub struct PhaseResult {
    pub fragment: GenomeFragment,
    pub h1_idxs: Vec<usize>,
    pub h2_idxs: Vec<usize>,
    pub h1_reads: BTreeSet<String>,
    pub h2_reads: BTreeSet<String>,
    pub unphased: BTreeSet<String>,
}

/// Detect bubbles in a finished POA and score every anchored read against
/// every allele.
pub fn bubble_graph_from_poa(
    poa: &Poa,
    reads: &[ChunkRead],
    alignments: &[ReadAlignment],
    params: &PolishParams,
) -> BubbleGraph {
    let hmm = PairHmm::new(&params.hmm);
    let ref_len = poa.ref_string.len();

    // flag runs with candidate evidence above the weight threshold
    let mut is_variant = vec![false; ref_len];
    for run in 0..ref_len {
        let node = &poa.nodes[run + 1];
        let total = node.total_observation_weight() + node.delete_weight;
        if total <= 0.0 {
            continue;
        }
        let (best_base, best_weight) = node.best_base();
        let alt_base = if best_base != node.base {
            best_weight
        } else {
            total - node.delete_weight - node.base_weight(node.base)
        };
        let insert = node.best_insert().map_or(0.0, |i| i.weight);
        let candidate = alt_base.max(node.delete_weight).max(insert);
        is_variant[run] = candidate >= params.min_candidate_weight * total;
    }

    // maximal contiguous variant spans become bubbles
    let mut bubbles = Vec::new();
    let mut run = 0;
    while run < ref_len {
        if !is_variant[run] {
            run += 1;
            continue;
        }
        let start = run;
        while run < ref_len && is_variant[run] {
            run += 1;
        }
        if let Some(bubble) =
            build_bubble(poa, reads, alignments, &hmm, start, run, params)
        {
            bubbles.push(bubble);
        }
    }
    debug!("Found {} bubbles over {} consensus runs", bubbles.len(), ref_len);
    BubbleGraph { bubbles }
}

/// The read subsequence spanning consensus runs `[run_start, run_end)`, if
/// the read is anchored outside the span on both sides.
fn read_allele(
    read: &ChunkRead,
    alignment: &ReadAlignment,
    run_start: usize,
    run_end: usize,
) -> Option<RleString> {
    let left = alignment
        .iter()
        .rev()
        .find(|&&(_, ref_run)| ref_run < run_start)?;
    let right = alignment.iter().find(|&&(_, ref_run)| ref_run >= run_end)?;
    if left.0 + 1 > right.0 {
        return None;
    }
    Some(read.seq.substring(left.0 + 1, right.0))
}

fn build_bubble(
    poa: &Poa,
    reads: &[ChunkRead],
    alignments: &[ReadAlignment],
    hmm: &PairHmm,
    run_start: usize,
    run_end: usize,
    params: &PolishParams,
) -> Option<Bubble> {
    let ref_allele = poa.ref_string.substring(run_start, run_end);

    // enumerate read-realized alleles with their accumulated support
    let mut candidates: Vec<(RleString, f64)> = Vec::new();
    let mut spanning: Vec<(usize, RleString)> = Vec::new();
    for (read_idx, (read, alignment)) in reads.iter().zip(alignments).enumerate() {
        let Some(allele) = read_allele(read, alignment, run_start, run_end) else {
            continue;
        };
        match candidates.iter_mut().find(|(seq, _)| *seq == allele) {
            Some((_, support)) => *support += 1.0,
            None => candidates.push((allele.clone(), 1.0)),
        }
        spanning.push((read_idx, allele));
    }

    let mut alleles = vec![ref_allele.clone()];
    for (seq, support) in candidates {
        if support >= params.min_allele_support && seq != ref_allele {
            alleles.push(seq);
        }
    }
    if alleles.len() < 2 {
        return None;
    }
    // deterministic allele order: reference first, then by expanded sequence
    alleles[1..].sort_by_key(|a| a.expand());

    let read_likelihoods = spanning
        .into_iter()
        .map(|(read_idx, observed)| {
            let lls = alleles
                .iter()
                .map(|allele| hmm.log_likelihood(&observed.bases, &allele.bases))
                .collect();
            (read_idx, lls)
        })
        .collect();

    Some(Bubble {
        run_start,
        run_end,
        alleles,
        ref_allele: 0,
        read_likelihoods,
    })
}

/// Partition reads into two haplotypes by alternating maximization. Reads
/// whose haplotype log-likelihood ratio lies within the configured band are
/// reported unphased; exact ties are broken by read id, so the result does
/// not depend on the order records came out of the alignment file.
pub fn phase_bubble_graph(
    bg: &BubbleGraph,
    reads: &[ChunkRead],
    params: &PolishParams,
) -> PhaseResult {
    let n_bubbles = bg.bubbles.len();
    let mut hap1: Vec<usize> = bg.bubbles.iter().map(|b| b.ref_allele).collect();
    let mut hap2 = hap1.clone();

    if n_bubbles == 0 {
        return collect_result(bg, reads, hap1, hap2, &vec![None; reads.len()], params);
    }

    // rank reads by id once; exact likelihood ties resolve through this rank
    let mut id_order: Vec<usize> = (0..reads.len()).collect();
    id_order.sort_by(|&a, &b| reads[a].id.cmp(&reads[b].id));
    let mut id_rank = vec![0usize; reads.len()];
    for (rank, &read_idx) in id_order.iter().enumerate() {
        id_rank[read_idx] = rank;
    }

    // greedy init at the most bimodal site: split its reads by best allele
    let mut assignment: Vec<Option<bool>> = vec![None; reads.len()];
    if let Some(seed_bubble) = bg
        .bubbles
        .iter()
        .max_by(|a, b| second_allele_support(a).total_cmp(&second_allele_support(b)))
    {
        let mut tallies = vec![0.0; seed_bubble.alleles.len()];
        for (_, lls) in &seed_bubble.read_likelihoods {
            tallies[argmax(lls)] += 1.0;
        }
        let top = argmax(&tallies);
        let second = tallies
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != top)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        for (read_idx, lls) in &seed_bubble.read_likelihoods {
            let best = argmax(lls);
            if best == top {
                assignment[*read_idx] = Some(true);
            } else if Some(best) == second {
                assignment[*read_idx] = Some(false);
            }
        }
    }

    for _ in 0..params.max_phase_rounds {
        // (a) per-site allele pair given read assignments
        let new_hap: Vec<(usize, usize)> = bg
            .bubbles
            .iter()
            .map(|bubble| best_allele_pair(bubble, &assignment))
            .collect();
        let changed_sites = new_hap
            .iter()
            .enumerate()
            .any(|(i, &(a1, a2))| a1 != hap1[i] || a2 != hap2[i]);
        for (i, &(a1, a2)) in new_hap.iter().enumerate() {
            hap1[i] = a1;
            hap2[i] = a2;
        }

        // (b) reassign each read to its better haplotype
        let mut changed_reads = false;
        for read_idx in 0..reads.len() {
            let llr = read_llr(bg, read_idx, &hap1, &hap2);
            let new = match llr {
                Some(llr) if llr > 0.0 => Some(true),
                Some(llr) if llr < 0.0 => Some(false),
                Some(_) => Some(id_rank[read_idx] % 2 == 0),
                None => None,
            };
            if new != assignment[read_idx] {
                assignment[read_idx] = new;
                changed_reads = true;
            }
        }

        if !changed_sites && !changed_reads {
            break;
        }
    }

    collect_result(bg, reads, hap1, hap2, &assignment, params)
}

fn second_allele_support(bubble: &Bubble) -> f64 {
    let mut tallies: Vec<f64> = vec![0.0; bubble.alleles.len()];
    for (_, lls) in &bubble.read_likelihoods {
        tallies[argmax(lls)] += 1.0;
    }
    tallies.sort_by(|a, b| b.total_cmp(a));
    tallies.get(1).copied().unwrap_or(0.0)
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Choose `(hap1 allele, hap2 allele)` maximizing the summed log-likelihood
/// of currently assigned reads. Deterministic: earlier allele indices win
/// ties.
fn best_allele_pair(bubble: &Bubble, assignment: &[Option<bool>]) -> (usize, usize) {
    let n = bubble.alleles.len();
    let mut best = (bubble.ref_allele, bubble.ref_allele);
    let mut best_score = f64::NEG_INFINITY;
    for a1 in 0..n {
        for a2 in 0..n {
            let mut score = 0.0;
            for (read_idx, lls) in &bubble.read_likelihoods {
                match assignment[*read_idx] {
                    Some(true) => score += lls[a1],
                    Some(false) => score += lls[a2],
                    None => {}
                }
            }
            if score > best_score {
                best_score = score;
                best = (a1, a2);
            }
        }
    }
    best
}

/// Total log-likelihood ratio of hap1 over hap2 across every bubble the read
/// spans; `None` when the read spans no bubble.
fn read_llr(bg: &BubbleGraph, read_idx: usize, hap1: &[usize], hap2: &[usize]) -> Option<f64> {
    let mut llr = 0.0;
    let mut seen = false;
    for (i, bubble) in bg.bubbles.iter().enumerate() {
        if let Some((_, lls)) = bubble
            .read_likelihoods
            .iter()
            .find(|(idx, _)| *idx == read_idx)
        {
            llr += lls[hap1[i]] - lls[hap2[i]];
            seen = true;
        }
    }
    seen.then_some(llr)
}

fn collect_result(
    bg: &BubbleGraph,
    reads: &[ChunkRead],
    hap1: Vec<usize>,
    hap2: Vec<usize>,
    assignment: &[Option<bool>],
    params: &PolishParams,
) -> PhaseResult {
    let mut h1_idxs = Vec::new();
    let mut h2_idxs = Vec::new();
    let mut h1_reads = BTreeSet::new();
    let mut h2_reads = BTreeSet::new();
    let mut unphased = BTreeSet::new();

    for (read_idx, read) in reads.iter().enumerate() {
        let llr = read_llr(bg, read_idx, &hap1, &hap2);
        match (assignment[read_idx], llr) {
            (Some(side), Some(llr)) if llr.abs() > params.phase_llr_threshold => {
                if side {
                    h1_idxs.push(read_idx);
                    h1_reads.insert(read.id.clone());
                } else {
                    h2_idxs.push(read_idx);
                    h2_reads.insert(read.id.clone());
                }
            }
            _ => {
                unphased.insert(read.id.clone());
            }
        }
    }

    PhaseResult {
        fragment: GenomeFragment {
            ref_start: 0,
            length: bg.bubbles.len(),
            hap1,
            hap2,
        },
        h1_idxs,
        h2_idxs,
        h1_reads,
        h2_reads,
        unphased,
    }
}

/// Splice a haplotype's chosen alleles into the consensus, using
/// `node_run_lengths` (per POA node, possibly re-estimated per haplotype)
/// outside bubbles.
pub fn haplotype_consensus(
    poa: &Poa,
    bg: &BubbleGraph,
    hap: &[usize],
    node_run_lengths: &[u64],
    use_rle: bool,
) -> RleString {
    let ref_len = poa.ref_string.len();
    let mut runs: Vec<(u8, u64)> = Vec::with_capacity(ref_len);
    let mut run = 0;
    let mut next_bubble = 0;
    while run < ref_len {
        if next_bubble < bg.bubbles.len() && bg.bubbles[next_bubble].run_start == run {
            let bubble = &bg.bubbles[next_bubble];
            let allele = &bubble.alleles[hap[next_bubble]];
            for i in 0..allele.len() {
                runs.push((allele.bases[i], allele.run_lengths[i]));
            }
            run = bubble.run_end;
            next_bubble += 1;
        } else {
            runs.push((poa.ref_string.bases[run], node_run_lengths[run + 1]));
            run += 1;
        }
    }
    if use_rle {
        RleString::from_base_runs(runs)
    } else {
        let expanded: Vec<u8> = runs.iter().map(|&(b, _)| b).collect();
        RleString::without_rle(&expanded)
    }
}
