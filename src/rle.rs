//! # Run-length encoding of nucleotide strings
//!
//! Homopolymer runs are the dominant error mode of long reads, so most of the
//! pipeline operates on run-length encoded sequences: each run of identical
//! bases collapses to a single symbol plus a count. An [`RleString`] also
//! carries the bidirectional position map between expanded and compressed
//! coordinates, which all downstream alignment arithmetic relies on.

/// A run-length encoded nucleotide string.
///
/// Invariants: `bases` never contains two adjacent equal symbols (except for
/// strings built with [`RleString::without_rle`], where every run has length 1
/// and the invariant is vacuous), and every run length is at least 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RleString {
    pub bases: Vec<u8>,
    pub run_lengths: Vec<u64>,
    expanded_to_compressed: Vec<usize>,
    compressed_to_expanded: Vec<usize>,
}

impl RleString {
    /// Compress a raw nucleotide string, collapsing each homopolymer run to
    /// one symbol with its length.
    pub fn compress(raw: &[u8]) -> Self {
        let mut bases = Vec::new();
        let mut run_lengths: Vec<u64> = Vec::new();
        for &b in raw {
            if bases.last() == Some(&b) {
                // unwrap: a last base implies a last run length
                *run_lengths.last_mut().unwrap() += 1;
            } else {
                bases.push(b);
                run_lengths.push(1);
            }
        }
        Self::from_runs(bases, run_lengths)
    }

    /// Wrap a raw string without collapsing runs: every run has length 1.
    /// Lets downstream code stay agnostic to whether RLE is enabled.
    pub fn without_rle(raw: &[u8]) -> Self {
        let run_lengths = vec![1; raw.len()];
        Self::from_runs(raw.to_vec(), run_lengths)
    }

    /// Build from an explicit run list, merging any adjacent equal bases so
    /// the no-adjacent-duplicates invariant holds.
    pub fn from_base_runs(runs: impl IntoIterator<Item = (u8, u64)>) -> Self {
        let mut bases: Vec<u8> = Vec::new();
        let mut run_lengths: Vec<u64> = Vec::new();
        for (b, len) in runs {
            if len == 0 {
                continue;
            }
            if bases.last() == Some(&b) {
                *run_lengths.last_mut().unwrap() += len;
            } else {
                bases.push(b);
                run_lengths.push(len);
            }
        }
        Self::from_runs(bases, run_lengths)
    }

    fn from_runs(bases: Vec<u8>, run_lengths: Vec<u64>) -> Self {
        debug_assert_eq!(bases.len(), run_lengths.len());
        let mut expanded_to_compressed = Vec::new();
        let mut compressed_to_expanded = Vec::with_capacity(bases.len());
        for (i, &len) in run_lengths.iter().enumerate() {
            compressed_to_expanded.push(expanded_to_compressed.len());
            for _ in 0..len {
                expanded_to_compressed.push(i);
            }
        }
        RleString {
            bases,
            run_lengths,
            expanded_to_compressed,
            compressed_to_expanded,
        }
    }

    /// Expand back to the raw nucleotide string.
    pub fn expand(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.expanded_len());
        for (&b, &len) in self.bases.iter().zip(self.run_lengths.iter()) {
            for _ in 0..len {
                out.push(b);
            }
        }
        out
    }

    /// Number of runs (compressed length).
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Length of the expanded string.
    pub fn expanded_len(&self) -> usize {
        self.expanded_to_compressed.len()
    }

    /// Map an expanded position to the index of the run containing it.
    pub fn compressed_index(&self, expanded: usize) -> usize {
        self.expanded_to_compressed[expanded]
    }

    /// Map a run index to the expanded position of the run's first base.
    pub fn expanded_index(&self, compressed: usize) -> usize {
        self.compressed_to_expanded[compressed]
    }

    /// Sub-string over run indices `[start, end)`, keeping run lengths.
    pub fn substring(&self, start: usize, end: usize) -> RleString {
        Self::from_runs(
            self.bases[start..end].to_vec(),
            self.run_lengths[start..end].to_vec(),
        )
    }
}
