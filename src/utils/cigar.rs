//! # CIGAR Utils
//!
//! Functions to check which category CIGAR operations fall into,
//! which informs how aligned read coordinates advance while the
//! read adapter walks an alignment record.
use rust_htslib::bam::record::Cigar;

/// Check if the provided cigar operation `cigar` advances the
/// position in the reference sequence.
pub fn consumes_ref(cigar: &Cigar) -> bool {
    matches!(
        cigar,
        Cigar::Match(_) | Cigar::Del(_) | Cigar::RefSkip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// Check if the provided cigar operation `cigar` advances the
/// position in the query sequence.
pub fn consumes_query(cigar: &Cigar) -> bool {
    matches!(
        cigar,
        Cigar::Match(_) | Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// Check if the provided cigar operation aligns a query base against a
/// reference base (the only operations that yield match pairs).
pub fn is_aligned_pair(cigar: &Cigar) -> bool {
    matches!(cigar, Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_))
}
