//! # Stitching per-chunk consensus strings into contigs
//!
//! Adjacent chunks polish overlapping windows, so their consensus strings
//! share a (possibly drifted) overlap. The merger globally aligns the two
//! overlap substrings under edit distance, picks the splice anchor whose
//! surrounding alignment window has the fewest mismatches (ties toward the
//! alignment midpoint), and joins the strings there.
use bio::alignment::pairwise::Aligner;
use bio::alignment::AlignmentOperation;
use log::warn;

/// Half-width (in alignment columns) of the window scored around each
/// candidate splice anchor.
const ANCHOR_WINDOW: usize = 25;

/// Merge the ordered per-chunk consensus strings of one contig.
/// `nominal_overlaps[i]` is the reference-space overlap between chunk `i` and
/// chunk `i + 1`.
pub fn merge_chunk_sequences(sequences: &[String], nominal_overlaps: &[usize]) -> String {
    debug_assert_eq!(nominal_overlaps.len() + 1, sequences.len().max(1));
    let mut merged = match sequences.first() {
        Some(first) => first.clone(),
        None => return String::new(),
    };
    for (sequence, &overlap) in sequences[1..].iter().zip(nominal_overlaps) {
        merged = splice(&merged, sequence, overlap);
    }
    merged
}

/// Join `left` and `right`, which both polished the same trailing/leading
/// `overlap` reference bases.
fn splice(left: &str, right: &str, overlap: usize) -> String {
    let overlap = overlap.min(left.len()).min(right.len());
    if overlap == 0 {
        return format!("{left}{right}");
    }
    let x = &left.as_bytes()[left.len() - overlap..];
    let y = &right.as_bytes()[..overlap];

    let mut aligner =
        Aligner::with_capacity(x.len(), y.len(), -1, -1, |a: u8, b: u8| {
            if a == b {
                0
            } else {
                -1
            }
        });
    let alignment = aligner.global(x, y);

    match best_anchor(&alignment.operations) {
        Some((x_pos, y_pos)) => {
            let mut joined = String::with_capacity(left.len() + right.len() - overlap);
            joined.push_str(&left[..left.len() - overlap + x_pos]);
            joined.push_str(&right[y_pos..]);
            joined
        }
        None => {
            warn!("No matching anchor in a {overlap}-base chunk overlap, splicing at the midpoint");
            let mid = overlap / 2;
            format!(
                "{}{}",
                &left[..left.len() - overlap + mid],
                &right[mid..]
            )
        }
    }
}

/// The `(x, y)` coordinates of the match column whose centered window has the
/// fewest non-match columns; ties prefer the column closest to the alignment
/// midpoint.
fn best_anchor(operations: &[AlignmentOperation]) -> Option<(usize, usize)> {
    // prefix sums of non-match columns for O(1) window scores
    let mut mismatch_prefix = vec![0usize; operations.len() + 1];
    for (i, op) in operations.iter().enumerate() {
        let is_mismatch = !matches!(op, AlignmentOperation::Match);
        mismatch_prefix[i + 1] = mismatch_prefix[i] + usize::from(is_mismatch);
    }

    let mid = operations.len() / 2;
    let mut best: Option<(usize, usize, usize, usize)> = None; // (mismatches, dist, x, y)
    let (mut x_pos, mut y_pos) = (0usize, 0usize);
    for (i, op) in operations.iter().enumerate() {
        if matches!(op, AlignmentOperation::Match) {
            let lo = i.saturating_sub(ANCHOR_WINDOW);
            let hi = (i + ANCHOR_WINDOW + 1).min(operations.len());
            let mismatches = mismatch_prefix[hi] - mismatch_prefix[lo];
            let dist = i.abs_diff(mid);
            let candidate = (mismatches, dist, x_pos, y_pos);
            if best.map_or(true, |b| (candidate.0, candidate.1) < (b.0, b.1)) {
                best = Some(candidate);
            }
        }
        match op {
            AlignmentOperation::Match | AlignmentOperation::Subst => {
                x_pos += 1;
                y_pos += 1;
            }
            AlignmentOperation::Ins => x_pos += 1,
            AlignmentOperation::Del => y_pos += 1,
            AlignmentOperation::Xclip(n) => x_pos += n,
            AlignmentOperation::Yclip(n) => y_pos += n,
        }
    }
    best.map(|(_, _, x, y)| (x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "ACGTACGTGGTTACAGTTTACCAGTAGACCATTAAGGCCTTACGATCAGGACTGACCTGAGGTTCAC";

    #[test]
    fn identical_overlap_reproduces_the_contig() {
        let left = FULL[..45].to_string();
        let right = FULL[25..].to_string();
        let merged = merge_chunk_sequences(&[left, right], &[20]);
        assert_eq!(merged, FULL);
    }

    #[test]
    fn three_chunks_fold_left_to_right() {
        let chunks = vec![
            FULL[..30].to_string(),
            FULL[20..50].to_string(),
            FULL[40..].to_string(),
        ];
        let merged = merge_chunk_sequences(&chunks, &[10, 10]);
        assert_eq!(merged, FULL);
    }

    #[test]
    fn divergent_overlap_keeps_the_length() {
        let left = FULL[..45].to_string();
        // one substitution inside the right copy of the overlap
        let mut right: Vec<u8> = FULL[25..].bytes().collect();
        right[10] = if right[10] == b'A' { b'C' } else { b'A' };
        let merged = merge_chunk_sequences(&[left, String::from_utf8(right).unwrap()], &[20]);
        assert_eq!(merged.len(), FULL.len());
    }

    #[test]
    fn merged_length_is_at_least_widths_minus_overlaps() {
        let chunks = vec![
            FULL[..30].to_string(),
            FULL[20..50].to_string(),
            FULL[40..].to_string(),
        ];
        let total: usize = chunks.iter().map(String::len).sum();
        let merged = merge_chunk_sequences(&chunks, &[10, 10]);
        assert!(merged.len() >= total - 2 * 10);
    }

    #[test]
    fn single_chunk_passes_through() {
        let merged = merge_chunk_sequences(&[FULL.to_string()], &[]);
        assert_eq!(merged, FULL);
    }

    #[test]
    fn empty_contig_is_empty() {
        assert_eq!(merge_chunk_sequences(&[], &[]), "");
    }

    #[test]
    fn zero_overlap_concatenates() {
        let merged = merge_chunk_sequences(&["ACGT".to_string(), "TTGG".to_string()], &[0]);
        assert_eq!(merged, "ACGTTTGG");
    }
}
