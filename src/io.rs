//! # Input/output for `burnish`
//!
//! `fasta` reads the draft assembly and writes the polished output;
//! `dumps` writes the optional per-chunk ancillary files (POA tables,
//! repeat counts, phased read sets).
pub mod dumps;
pub mod fasta;
