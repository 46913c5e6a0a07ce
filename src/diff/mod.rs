//! Unified-diff handling: parsing, serialization, position mapping, and
//! chunking.

pub mod chunker;
pub mod parser;
pub mod position;

use thiserror::Error;

pub use chunker::chunk_document;
pub use parser::{parse_unified_diff, to_unified};
pub use position::map_position;

/// Errors from diff parsing.
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("malformed diff at line {line_no}: {reason}")]
    Malformed { line_no: usize, reason: String },
}

impl DiffError {
    pub(crate) fn at(line_no: usize, reason: impl Into<String>) -> Self {
        DiffError::Malformed {
            line_no,
            reason: reason.into(),
        }
    }
}
