//! # Converting alignment records into window-local reads
//!
//! For every record that intersects a chunk's boundary window, the adapter
//! walks the CIGAR to collect aligned (read, reference) base pairs inside the
//! window, cuts out the read substring spanning those pairs (soft clips never
//! enter it), and projects both sides into RLE coordinates through the
//! position maps. The downsampler then caps per-window coverage.
use anyhow::Result;
use log::{debug, info};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rust_htslib::bam::{self, record::CigarStringView, Read};

use crate::{
    chunk::Chunk,
    error::PolishError,
    rle::RleString,
    utils::cigar::{consumes_query, consumes_ref, is_aligned_pair},
};

/// A read clipped to one chunk's boundary window.
#[derive(Debug, Clone)]
pub struct ChunkRead {
    pub id: String,
    /// Window-local subsequence, RLE-compressed when RLE is enabled.
    pub seq: RleString,
    /// One quality per run (the run's first base), when the record carries
    /// base qualities.
    pub qualities: Option<Vec<u8>>,
    pub forward_strand: bool,
}

impl ChunkRead {
    /// Per-run weights: probability the base call is correct, from its
    /// quality; 1.0 when qualities are absent.
    pub fn weights(&self) -> Vec<f64> {
        match &self.qualities {
            Some(quals) => quals
                .iter()
                .map(|&q| 1.0 - 10f64.powf(-(q as f64) / 10.0))
                .collect(),
            None => vec![1.0; self.seq.len()],
        }
    }
}

/// Match pairs `(read RLE index, reference RLE index)`, strictly increasing
/// on both axes.
pub type ReadAlignment = Vec<(usize, usize)>;

/// Decode every usable record intersecting the chunk's boundary window into a
/// `(ChunkRead, ReadAlignment)` pair. Records whose CIGAR disagrees with
/// their sequence length are logged and skipped.
pub fn reads_and_alignments_for_chunk(
    bam: &mut bam::IndexedReader,
    chunk: &Chunk,
    ref_rle: &RleString,
    use_rle: bool,
) -> Result<(Vec<ChunkRead>, Vec<ReadAlignment>)> {
    bam.fetch((
        chunk.ref_name.as_str(),
        chunk.boundary_start as i64,
        chunk.boundary_end as i64,
    ))?;

    let mut reads = Vec::new();
    let mut alignments = Vec::new();
    let mut record = bam::Record::new();
    while let Some(result) = bam.read(&mut record) {
        result?;
        if record.is_unmapped()
            || record.is_secondary()
            || record.is_supplementary()
            || record.is_duplicate()
            || record.is_quality_check_failed()
        {
            continue;
        }

        let seq = record.seq().as_bytes();
        let quals = record.qual();
        let quals = if quals.is_empty() || quals.iter().all(|&q| q == 0xff) {
            None
        } else {
            Some(quals)
        };
        let id = String::from_utf8_lossy(record.qname()).into_owned();

        let windowed = match windowed_alignment(
            &id,
            &record.cigar(),
            &seq,
            (chunk.boundary_start, chunk.boundary_end),
        ) {
            Ok(Some(windowed)) => windowed,
            Ok(None) => continue,
            Err(e) => {
                debug!("Skipping read in chunk {}: {e:#}", chunk.fetch_definition());
                continue;
            }
        };

        let sub = &seq[windowed.read_start..windowed.read_end];
        let rle_read = if use_rle {
            RleString::compress(sub)
        } else {
            RleString::without_rle(sub)
        };
        let qualities = quals.map(|quals| {
            (0..rle_read.len())
                .map(|i| quals[windowed.read_start + rle_read.expanded_index(i)])
                .collect()
        });

        // project expanded pairs through both position maps, dropping pairs
        // that collapse into an already-claimed run on either side
        let mut alignment: ReadAlignment = Vec::with_capacity(windowed.pairs.len());
        for (read_idx, ref_idx) in windowed.pairs {
            let pair = (
                rle_read.compressed_index(read_idx - windowed.read_start),
                ref_rle.compressed_index(ref_idx - chunk.boundary_start),
            );
            match alignment.last() {
                Some(&(prev_read, prev_ref)) if pair.0 <= prev_read || pair.1 <= prev_ref => {}
                _ => alignment.push(pair),
            }
        }
        if alignment.is_empty() {
            continue;
        }

        reads.push(ChunkRead {
            id,
            seq: rle_read,
            qualities,
            forward_strand: !record.is_reverse(),
        });
        alignments.push(alignment);
    }

    info!(
        "Decoded {} reads for chunk {}",
        reads.len(),
        chunk.fetch_definition()
    );
    Ok((reads, alignments))
}

#[derive(Debug)]
struct WindowedRead {
    /// Aligned pairs in expanded coordinates: (index into the full read
    /// sequence, absolute reference position).
    pairs: Vec<(usize, usize)>,
    read_start: usize,
    read_end: usize,
}

/// Walk a CIGAR and collect the aligned base pairs falling inside the
/// half-open reference `window`. Returns `None` when no aligned base lands in
/// the window.
fn windowed_alignment(
    id: &str,
    cigar: &CigarStringView,
    seq: &[u8],
    window: (usize, usize),
) -> Result<Option<WindowedRead>> {
    let (window_start, window_end) = window;
    let mut read_idx = 0usize;
    let mut ref_pos = cigar.pos() as usize;
    let mut pairs = Vec::new();

    for op in cigar.iter() {
        let len = op.len() as usize;
        if is_aligned_pair(op) {
            for offset in 0..len {
                let pos = ref_pos + offset;
                if pos >= window_start && pos < window_end {
                    pairs.push((read_idx + offset, pos));
                }
            }
        }
        if consumes_query(op) {
            read_idx += len;
        }
        if consumes_ref(op) {
            ref_pos += len;
        }
    }

    if read_idx != seq.len() {
        return Err(PolishError::MalformedAlignment {
            read: id.to_string(),
            msg: format!("CIGAR consumes {read_idx} query bases, sequence has {}", seq.len()),
        }
        .into());
    }
    if pairs.is_empty() {
        return Ok(None);
    }

    let read_start = pairs[0].0;
    let read_end = pairs[pairs.len() - 1].0 + 1;
    Ok(Some(WindowedRead {
        pairs,
        read_start,
        read_end,
    }))
}

/// Cap per-window coverage at `max_depth`. When total aligned nucleotides
/// exceed `max_depth * window width`, keep a seeded uniform sample of reads
/// (without replacement) whose cumulative aligned nucleotides first reach the
/// budget, preserving relative order. Deterministic for a given
/// `(seed, chunk_idx)`.
pub fn poor_mans_downsample(
    max_depth: u64,
    chunk: &Chunk,
    reads: Vec<ChunkRead>,
    alignments: Vec<ReadAlignment>,
    seed: u64,
    chunk_idx: usize,
) -> (bool, Vec<ChunkRead>, Vec<ReadAlignment>) {
    let budget = max_depth.saturating_mul(chunk.boundary_width() as u64);
    let total: u64 = reads.iter().map(|r| r.seq.expanded_len() as u64).sum();
    if budget == 0 || total <= budget {
        return (false, reads, alignments);
    }

    let mut order: Vec<usize> = (0..reads.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed ^ chunk_idx as u64);
    order.shuffle(&mut rng);

    let mut kept = vec![false; reads.len()];
    let mut covered = 0u64;
    for &idx in &order {
        if covered >= budget {
            break;
        }
        kept[idx] = true;
        covered += reads[idx].seq.expanded_len() as u64;
    }

    let mut kept_reads = Vec::new();
    let mut kept_alignments = Vec::new();
    for (idx, (read, alignment)) in reads.into_iter().zip(alignments).enumerate() {
        if kept[idx] {
            kept_reads.push(read);
            kept_alignments.push(alignment);
        }
    }
    (true, kept_reads, kept_alignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::{Cigar, CigarString};

    fn chunk() -> Chunk {
        Chunk {
            ref_name: "c".into(),
            boundary_start: 0,
            start: 0,
            end: 100,
            boundary_end: 100,
        }
    }

    fn read_of_len(len: usize) -> ChunkRead {
        ChunkRead {
            id: format!("read{len}"),
            seq: RleString::without_rle(&vec![b'A'; len]),
            qualities: None,
            forward_strand: true,
        }
    }

    #[test]
    fn full_match_yields_diagonal_pairs() {
        let cigar = CigarString(vec![Cigar::Match(10)]).into_view(5);
        let windowed = windowed_alignment("r", &cigar, &vec![b'A'; 10], (0, 100))
            .unwrap()
            .unwrap();
        assert_eq!(windowed.pairs.len(), 10);
        assert_eq!(windowed.pairs[0], (0, 5));
        assert_eq!(windowed.pairs[9], (9, 14));
        assert_eq!((windowed.read_start, windowed.read_end), (0, 10));
    }

    #[test]
    fn soft_clips_are_excluded() {
        let cigar = CigarString(vec![
            Cigar::SoftClip(4),
            Cigar::Match(6),
            Cigar::SoftClip(2),
        ])
        .into_view(10);
        let windowed = windowed_alignment("r", &cigar, &vec![b'A'; 12], (0, 100))
            .unwrap()
            .unwrap();
        assert_eq!((windowed.read_start, windowed.read_end), (4, 10));
        assert_eq!(windowed.pairs[0], (4, 10));
    }

    #[test]
    fn window_clipping_drops_outside_pairs() {
        let cigar = CigarString(vec![Cigar::Match(20)]).into_view(0);
        let windowed = windowed_alignment("r", &cigar, &vec![b'A'; 20], (5, 15))
            .unwrap()
            .unwrap();
        assert_eq!(windowed.pairs.first().unwrap(), &(5, 5));
        assert_eq!(windowed.pairs.last().unwrap(), &(14, 14));
    }

    #[test]
    fn indels_shift_coordinates() {
        // 5M 2I 5M 3D 5M
        let cigar = CigarString(vec![
            Cigar::Match(5),
            Cigar::Ins(2),
            Cigar::Match(5),
            Cigar::Del(3),
            Cigar::Match(5),
        ])
        .into_view(0);
        let windowed = windowed_alignment("r", &cigar, &vec![b'A'; 17], (0, 100))
            .unwrap()
            .unwrap();
        assert_eq!(windowed.pairs.len(), 15);
        // after the insertion, read index runs ahead of reference
        assert!(windowed.pairs.contains(&(7, 5)));
        // after the deletion, reference runs ahead of read
        assert!(windowed.pairs.contains(&(12, 13)));
    }

    #[test]
    fn cigar_sequence_disagreement_is_malformed() {
        let cigar = CigarString(vec![Cigar::Match(10)]).into_view(0);
        let err = windowed_alignment("r", &cigar, &vec![b'A'; 8], (0, 100)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolishError>(),
            Some(PolishError::MalformedAlignment { .. })
        ));
    }

    #[test]
    fn no_overlap_returns_none() {
        let cigar = CigarString(vec![Cigar::Match(10)]).into_view(200);
        assert!(windowed_alignment("r", &cigar, &vec![b'A'; 10], (0, 100))
            .unwrap()
            .is_none());
    }

    #[test]
    fn downsample_is_a_noop_under_budget() {
        let reads: Vec<_> = (0..4).map(|_| read_of_len(50)).collect();
        let alignments = vec![Vec::new(); 4];
        let (did, kept, _) = poor_mans_downsample(64, &chunk(), reads, alignments, 7, 0);
        assert!(!did);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn downsample_caps_coverage_and_keeps_order() {
        let reads: Vec<_> = (0..40).map(|_| read_of_len(100)).collect();
        let alignments = vec![Vec::new(); 40];
        let (did, kept, aligns) = poor_mans_downsample(10, &chunk(), reads, alignments, 7, 3);
        assert!(did);
        assert!(kept.len() < 40);
        assert_eq!(kept.len(), aligns.len());
        // budget = 10 * 100, each read covers 100: exactly 10 survive
        assert_eq!(kept.len(), 10);
    }

    #[test]
    fn downsample_is_deterministic_per_seed_and_chunk() {
        let make = || {
            let reads: Vec<_> = (0..40)
                .map(|i| ChunkRead {
                    id: format!("r{i}"),
                    ..read_of_len(100)
                })
                .collect();
            (reads, vec![Vec::new(); 40])
        };
        let (reads_a, aligns_a) = make();
        let (reads_b, aligns_b) = make();
        let (_, kept_a, _) = poor_mans_downsample(10, &chunk(), reads_a, aligns_a, 7, 3);
        let (_, kept_b, _) = poor_mans_downsample(10, &chunk(), reads_b, aligns_b, 7, 3);
        let ids = |reads: &[ChunkRead]| reads.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&kept_a), ids(&kept_b));

        let (reads_c, aligns_c) = make();
        let (_, kept_c, _) = poor_mans_downsample(10, &chunk(), reads_c, aligns_c, 8, 3);
        // different seed gives a different (but still deterministic) sample
        assert_eq!(kept_c.len(), 10);
    }
}
