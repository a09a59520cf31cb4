//! # Miscellaneous utilities
//!
//! Region-string parsing and small shared helpers; the `cigar` submodule
//! classifies CIGAR operations for the read adapter.
use anyhow::{bail, Context, Result};

pub mod cigar;

/// A half-open genomic interval restriction, parsed from `name[:start-end]`.
/// Coordinates are zero-based, `end` exclusive; an omitted interval means the
/// whole contig.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub contig: String,
    pub interval: Option<(usize, usize)>,
}

/// Parse a region restriction of the form `name` or `name:start-end`.
///
/// # Examples
///
/// ```
/// let region = burnish::utils::parse_region("contig_1:200-600").unwrap();
/// assert_eq!(region.contig, "contig_1");
/// assert_eq!(region.interval, Some((200, 600)));
/// ```
pub fn parse_region(spec: &str) -> Result<Region> {
    match spec.split_once(':') {
        None => {
            if spec.is_empty() {
                bail!("empty region string");
            }
            Ok(Region {
                contig: spec.to_string(),
                interval: None,
            })
        }
        Some((name, range)) => {
            let (start, end) = range
                .split_once('-')
                .with_context(|| format!("region range '{range}' is not of the form start-end"))?;
            let start: usize = start
                .parse()
                .with_context(|| format!("could not parse region start '{start}'"))?;
            let end: usize = end
                .parse()
                .with_context(|| format!("could not parse region end '{end}'"))?;
            if name.is_empty() {
                bail!("region '{spec}' has an empty contig name");
            }
            if start >= end {
                bail!("region '{spec}' has start >= end");
            }
            Ok(Region {
                contig: name.to_string(),
                interval: Some((start, end)),
            })
        }
    }
}

/// Normalize a contig name by dropping everything after the first whitespace.
/// Assembly FASTA headers routinely carry metadata after the name.
pub fn normalize_contig_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}
