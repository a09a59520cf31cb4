//! # Banded pair-HMM over read and consensus sequences
//!
//! A three-state (match / insert / delete) pair-HMM computed with
//! forward-backward in log space, restricted to a diagonal band anchored on
//! the read's previous alignment. The POA engine extracts aligned pairs whose
//! posterior match probability clears a threshold; the phaser reuses the
//! forward pass as a per-allele read likelihood.
use crate::params::HmmParams;

const LN_BASE_EMIT: f64 = -1.3862943611198906; // ln(1/4)

/// Numerically stable log(exp(a) + exp(b)).
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        hi
    } else {
        hi + (lo - hi).exp().ln_1p()
    }
}

/// Pair-HMM with all transitions and emissions pre-converted to log space.
pub struct PairHmm {
    ln_match_emit: f64,
    ln_subst_emit: f64,
    ln_mm: f64,
    ln_mi: f64,
    ln_md: f64,
    ln_ii: f64,
    ln_im: f64,
    ln_dd: f64,
    ln_dm: f64,
    min_posterior_match: f64,
    band: usize,
}

impl PairHmm {
    pub fn new(params: &HmmParams) -> Self {
        PairHmm {
            ln_match_emit: (1.0 - params.substitution).ln(),
            ln_subst_emit: (params.substitution / 3.0).ln(),
            ln_mm: (1.0 - params.insert_open - params.delete_open).ln(),
            ln_mi: params.insert_open.ln(),
            ln_md: params.delete_open.ln(),
            ln_ii: params.insert_extend.ln(),
            ln_im: (1.0 - params.insert_extend).ln(),
            ln_dd: params.delete_extend.ln(),
            ln_dm: (1.0 - params.delete_extend).ln(),
            min_posterior_match: params.min_posterior_match,
            band: params.band_size.max(1),
        }
    }

    fn emit_pair(&self, a: u8, b: u8) -> f64 {
        if a == b {
            self.ln_match_emit
        } else {
            self.ln_subst_emit
        }
    }

    /// Aligned `(read, reference)` pairs whose posterior match probability
    /// exceeds the configured threshold, strictly increasing on both axes.
    pub fn posterior_match_pairs(&self, read: &[u8], reference: &[u8]) -> Vec<(usize, usize)> {
        let n = read.len();
        let m = reference.len();
        if n == 0 || m == 0 {
            return Vec::new();
        }

        let fwd = self.forward(read, reference);
        let bwd = self.backward(read, reference);
        let total = log_add_exp(
            log_add_exp(fwd.m.get(n, m), fwd.i.get(n, m)),
            fwd.d.get(n, m),
        );
        if total == f64::NEG_INFINITY {
            return Vec::new();
        }

        // best in-band reference partner per read base, then a monotone scan
        let mut pairs = Vec::new();
        let mut last_ref = None;
        for i in 1..=n {
            let (lo, hi) = fwd.m.band_range(i);
            let mut best: Option<(usize, f64)> = None;
            for j in lo.max(1)..=hi {
                let posterior = (fwd.m.get(i, j) + bwd.m.get(i, j) - total).exp();
                if posterior >= self.min_posterior_match
                    && best.map_or(true, |(_, p)| posterior > p)
                {
                    best = Some((j, posterior));
                }
            }
            if let Some((j, _)) = best {
                if last_ref.map_or(true, |last| j > last) {
                    pairs.push((i - 1, j - 1));
                    last_ref = Some(j);
                }
            }
        }
        pairs
    }

    /// Log-likelihood of the read given the reference (forward total). Empty
    /// inputs degrade to pure gap chains.
    pub fn log_likelihood(&self, read: &[u8], reference: &[u8]) -> f64 {
        let n = read.len();
        let m = reference.len();
        if n == 0 && m == 0 {
            return 0.0;
        }
        if m == 0 {
            return self.ln_mi + (n as f64 - 1.0) * self.ln_ii + n as f64 * LN_BASE_EMIT;
        }
        if n == 0 {
            return self.ln_md + (m as f64 - 1.0) * self.ln_dd + m as f64 * LN_BASE_EMIT;
        }
        let fwd = self.forward(read, reference);
        log_add_exp(
            log_add_exp(fwd.m.get(n, m), fwd.i.get(n, m)),
            fwd.d.get(n, m),
        )
    }

    fn forward(&self, read: &[u8], reference: &[u8]) -> Dp {
        let n = read.len();
        let m = reference.len();
        let mut dp = Dp::new(n, m, self.band);
        dp.m.set(0, 0, 0.0);
        for i in 0..=n {
            let (lo, hi) = dp.m.band_range(i);
            for j in lo..=hi {
                if i > 0 {
                    let e = LN_BASE_EMIT;
                    let v = log_add_exp(
                        dp.m.get(i - 1, j) + self.ln_mi,
                        dp.i.get(i - 1, j) + self.ln_ii,
                    ) + e;
                    dp.i.set(i, j, v);
                }
                if j > 0 {
                    let e = LN_BASE_EMIT;
                    let v = log_add_exp(
                        dp.m.get(i, j - 1) + self.ln_md,
                        dp.d.get(i, j - 1) + self.ln_dd,
                    ) + e;
                    dp.d.set(i, j, v);
                }
                if i > 0 && j > 0 {
                    let e = self.emit_pair(read[i - 1], reference[j - 1]);
                    let v = log_add_exp(
                        log_add_exp(
                            dp.m.get(i - 1, j - 1) + self.ln_mm,
                            dp.i.get(i - 1, j - 1) + self.ln_im,
                        ),
                        dp.d.get(i - 1, j - 1) + self.ln_dm,
                    ) + e;
                    dp.m.set(i, j, v);
                }
            }
        }
        dp
    }

    fn backward(&self, read: &[u8], reference: &[u8]) -> Dp {
        let n = read.len();
        let m = reference.len();
        let mut dp = Dp::new(n, m, self.band);
        dp.m.set(n, m, 0.0);
        dp.i.set(n, m, 0.0);
        dp.d.set(n, m, 0.0);
        for i in (0..=n).rev() {
            let (lo, hi) = dp.m.band_range(i);
            for j in (lo..=hi).rev() {
                if i == n && j == m {
                    continue;
                }
                let pair = if i < n && j < m {
                    self.emit_pair(read[i], reference[j]) + dp.m.get(i + 1, j + 1)
                } else {
                    f64::NEG_INFINITY
                };
                let ins = if i < n {
                    LN_BASE_EMIT + dp.i.get(i + 1, j)
                } else {
                    f64::NEG_INFINITY
                };
                let del = if j < m {
                    LN_BASE_EMIT + dp.d.get(i, j + 1)
                } else {
                    f64::NEG_INFINITY
                };
                dp.m.set(
                    i,
                    j,
                    log_add_exp(
                        log_add_exp(pair + self.ln_mm, ins + self.ln_mi),
                        del + self.ln_md,
                    ),
                );
                dp.i.set(
                    i,
                    j,
                    log_add_exp(pair + self.ln_im, ins + self.ln_ii),
                );
                dp.d.set(
                    i,
                    j,
                    log_add_exp(pair + self.ln_dm, del + self.ln_dd),
                );
            }
        }
        dp
    }
}

struct Dp {
    m: Banded,
    i: Banded,
    d: Banded,
}

impl Dp {
    fn new(n: usize, m: usize, band: usize) -> Self {
        Dp {
            m: Banded::new(n, m, band),
            i: Banded::new(n, m, band),
            d: Banded::new(n, m, band),
        }
    }
}

/// Row-banded matrix over the (read+1) x (ref+1) grid. Cells outside the band
/// read as -inf.
struct Banded {
    offsets: Vec<usize>,
    ends: Vec<usize>,
    width: usize,
    data: Vec<f64>,
}

impl Banded {
    fn new(n: usize, m: usize, band: usize) -> Self {
        let mut offsets = Vec::with_capacity(n + 1);
        let mut ends = Vec::with_capacity(n + 1);
        for i in 0..=n {
            // diagonal through (i, i*m/n), clipped to the grid
            let center = if n == 0 { 0 } else { i * m / n };
            offsets.push(center.saturating_sub(band));
            ends.push((center + band).min(m));
        }
        let width = 2 * band + 1;
        Banded {
            offsets,
            ends,
            width,
            data: vec![f64::NEG_INFINITY; (n + 1) * width],
        }
    }

    fn band_range(&self, i: usize) -> (usize, usize) {
        (self.offsets[i], self.ends[i])
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        let off = self.offsets[i];
        if j < off || j > self.ends[i] {
            return f64::NEG_INFINITY;
        }
        self.data[i * self.width + (j - off)]
    }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        let off = self.offsets[i];
        debug_assert!(j >= off && j <= self.ends[i]);
        self.data[i * self.width + (j - off)] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::HmmParams;

    fn hmm() -> PairHmm {
        PairHmm::new(&HmmParams::default())
    }

    #[test]
    fn log_add_exp_basics() {
        assert!((log_add_exp(0.0, 0.0) - 2f64.ln()).abs() < 1e-12);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, -1.0), -1.0);
        assert_eq!(log_add_exp(-1.0, f64::NEG_INFINITY), -1.0);
    }

    #[test]
    fn identical_sequences_align_on_the_diagonal() {
        let seq = b"ACGTACGTACGTACGTACGT";
        let pairs = hmm().posterior_match_pairs(seq, seq);
        assert!(pairs.len() >= seq.len() - 2, "got {} pairs", pairs.len());
        for &(i, j) in &pairs {
            assert_eq!(i, j);
        }
    }

    #[test]
    fn pairs_are_strictly_monotone() {
        let read = b"ACGTTACGTACGGACGT";
        let reference = b"ACGTACGTACGTACGT";
        let pairs = hmm().posterior_match_pairs(read, reference);
        for window in pairs.windows(2) {
            assert!(window[1].0 > window[0].0);
            assert!(window[1].1 > window[0].1);
        }
    }

    #[test]
    fn insertion_skips_a_read_base() {
        let reference = b"ACGTACGTACGTACGT";
        // same sequence with one extra base in the middle
        let read = b"ACGTACGTTACGTACGT";
        let pairs = hmm().posterior_match_pairs(read, reference);
        // every reference partner is hit at most once, read runs one ahead
        // after the insertion
        assert!(pairs.iter().any(|&(i, j)| i == j + 1));
    }

    #[test]
    fn likelihood_prefers_the_matching_haplotype() {
        let read = b"ACGTACGTAAGTACGT";
        let hap_match = b"ACGTACGTAAGTACGT";
        let hap_other = b"ACGTACGTACGTACGT";
        let h = hmm();
        assert!(h.log_likelihood(read, hap_match) > h.log_likelihood(read, hap_other));
    }

    #[test]
    fn empty_inputs_are_pure_gap_chains() {
        let h = hmm();
        assert_eq!(h.log_likelihood(b"", b""), 0.0);
        assert!(h.log_likelihood(b"ACG", b"").is_finite());
        assert!(h.log_likelihood(b"", b"ACG").is_finite());
        assert!(h.posterior_match_pairs(b"", b"ACG").is_empty());
    }
}
