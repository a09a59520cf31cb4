//! # Partitioning contigs into overlapping polishing windows
//!
//! Contig lengths come from the alignment file header; contigs without any
//! mapped reads are skipped entirely (a run over an empty alignment yields an
//! empty workset). Each remaining contig is cut into windows of `chunk_size`
//! bases whose boundary intervals extend `chunk_boundary` bases on both
//! sides, so adjacent windows share `2 * chunk_boundary` bases of context for
//! the merger to splice over. Windows are emitted in (header contig order) x
//! (ascending coordinate).
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use rust_htslib::bam::{self, Read};

use crate::{
    error::PolishError,
    utils::{normalize_contig_name, Region},
};

/// One polishing window over a contig.
///
/// Invariant: `boundary_start <= start < end <= boundary_end`, all within the
/// contig (or the region restriction, when one was given).
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub ref_name: String,
    pub boundary_start: usize,
    pub start: usize,
    pub end: usize,
    pub boundary_end: usize,
}

impl Chunk {
    /// Width of the core window, excluding boundary context.
    pub fn width(&self) -> usize {
        self.end - self.start
    }

    /// Width of the full window including boundary context.
    pub fn boundary_width(&self) -> usize {
        self.boundary_end - self.boundary_start
    }

    pub fn fetch_definition(&self) -> String {
        format!(
            "{}:{}-{}",
            self.ref_name, self.boundary_start, self.boundary_end
        )
    }
}

/// The ordered set of windows to polish, plus the window geometry used to
/// build it.
#[derive(Debug)]
pub struct Chunker {
    pub chunks: Vec<Chunk>,
    pub chunk_size: usize,
    pub chunk_boundary: usize,
}

impl Chunker {
    /// Scan the alignment header for contig lengths and emit windows over
    /// every contig with mapped reads, or over the intersection with
    /// `region` if one is given.
    pub fn from_alignment<P: AsRef<Path>>(
        alignment: P,
        region: Option<&Region>,
        chunk_size: usize,
        chunk_boundary: usize,
    ) -> Result<Chunker> {
        if !alignment.as_ref().is_file() {
            return Err(PolishError::InputUnavailable {
                path: alignment.as_ref().to_path_buf(),
            }
            .into());
        }
        let mut reader = bam::IndexedReader::from_path(&alignment).map_err(|_| {
            PolishError::MissingIndex {
                path: alignment.as_ref().to_path_buf(),
            }
        })?;
        // (tid, length, mapped, unmapped) per target
        let stats = reader.index_stats().context("could not read index stats")?;
        let header = reader.header();

        let mut chunks = Vec::new();
        for (tid, name) in header.target_names().iter().enumerate() {
            let name = std::str::from_utf8(name).context("contig name is not valid UTF-8")?;
            let name = normalize_contig_name(name).to_string();
            let contig_len = header
                .target_len(tid as u32)
                .context("could not get target length from header")?
                as usize;
            let mapped = stats
                .iter()
                .find(|&&(stat_tid, ..)| stat_tid == tid as i64)
                .map_or(0, |&(_, _, mapped, _)| mapped);
            if mapped == 0 {
                debug!("Contig {name} has no mapped reads, skipping");
                continue;
            }

            let (lo, hi) = match region {
                None => (0, contig_len),
                Some(region) if region.contig != name => continue,
                Some(region) => match region.interval {
                    None => (0, contig_len),
                    Some((start, end)) => (start.min(contig_len), end.min(contig_len)),
                },
            };
            if lo >= hi {
                debug!("Region does not intersect contig {name}, skipping");
                continue;
            }
            chunks.extend(windows_for_interval(
                &name,
                lo,
                hi,
                chunk_size,
                chunk_boundary,
            ));
        }

        if let Some(region) = region {
            if chunks.is_empty() {
                return Err(PolishError::MalformedInput {
                    msg: format!(
                        "region contig '{}' not found in the alignment header (or it has no mapped reads)",
                        region.contig
                    ),
                }
                .into());
            }
        }

        Ok(Chunker {
            chunks,
            chunk_size,
            chunk_boundary,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Emit the windows covering `[lo, hi)` of a contig. Boundary context is
/// clipped to the same interval so no window reaches outside the universe it
/// was built over.
fn windows_for_interval(
    ref_name: &str,
    lo: usize,
    hi: usize,
    chunk_size: usize,
    chunk_boundary: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start = lo;
    while start < hi {
        let end = (start + chunk_size).min(hi);
        chunks.push(Chunk {
            ref_name: ref_name.to_string(),
            boundary_start: start.saturating_sub(chunk_boundary).max(lo),
            start,
            end,
            boundary_end: (end + chunk_boundary).min(hi),
        });
        start = end;
    }
    chunks
}
