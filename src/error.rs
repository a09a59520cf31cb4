//! # Error kinds for `burnish`
//!
//! Fatal error categories surfaced at startup or worker-task entry.
//! Per-read problems inside a chunk are logged and skipped instead of
//! being raised through these variants.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolishError {
    #[error("could not read input file {path}")]
    InputUnavailable { path: PathBuf },
    #[error("alignment file {path} has no index (expected sibling .bai)")]
    MissingIndex { path: PathBuf },
    #[error("malformed input: {msg}")]
    MalformedInput { msg: String },
    #[error("read {read} has a CIGAR that disagrees with its sequence length ({msg})")]
    MalformedAlignment { read: String, msg: String },
    #[error("contradictory configuration: {msg}")]
    Configuration { msg: String },
    #[error("no chunks to polish (empty workset)")]
    EmptyWorkset,
    #[error("internal invariant violated: {msg}")]
    Internal { msg: String },
}
