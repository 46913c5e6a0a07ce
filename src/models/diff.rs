//! Diff-related types: documents, file modifications, hunks, and lines.

use serde::{Deserialize, Serialize};

/// The marker of a line in a diff hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineMarker {
    /// Line exists only in the new version (`+`).
    Added,
    /// Line exists only in the old version (`-`).
    Removed,
    /// Line is unchanged (space).
    Context,
    /// A `\`-prefixed metadata line (`\ No newline at end of file`).
    Meta,
}

impl LineMarker {
    /// The single-character prefix used in unified-diff text.
    pub fn prefix(self) -> char {
        match self {
            LineMarker::Added => '+',
            LineMarker::Removed => '-',
            LineMarker::Context => ' ',
            LineMarker::Meta => '\\',
        }
    }

    /// Whether the line exists on the new side of the diff.
    pub fn counts_as_new(self) -> bool {
        matches!(self, LineMarker::Added | LineMarker::Context)
    }

    /// Whether the line exists on the old side of the diff.
    pub fn counts_as_old(self) -> bool {
        matches!(self, LineMarker::Removed | LineMarker::Context)
    }
}

/// A single line in a diff hunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    /// The line marker.
    pub marker: LineMarker,
    /// The content of the line (without the leading marker character).
    pub content: String,
    /// Line number in the new file (None for removed and meta lines).
    pub new_line_no: Option<u32>,
}

/// A contiguous hunk within a file modification.
///
/// Invariant: the number of added-or-context lines equals `new_count`
/// and the number of removed-or-context lines equals `old_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunk {
    /// Starting line in the old file.
    pub old_start: u32,
    /// Number of lines in the old file.
    pub old_count: u32,
    /// Starting line in the new file.
    pub new_start: u32,
    /// Number of lines in the new file.
    pub new_count: u32,
    /// Raw header remainder after the closing `@@` (verbatim, including
    /// any leading space), kept so serialization is byte-exact.
    pub header: Option<String>,
    /// Whether the header omitted the old count (`-s` instead of `-s,c`).
    pub old_count_omitted: bool,
    /// Whether the header omitted the new count.
    pub new_count_omitted: bool,
    /// The lines in this hunk.
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// Total number of unified-diff text lines this hunk occupies,
    /// including its `@@` header.
    pub fn rendered_lines(&self) -> usize {
        1 + self.lines.len()
    }

    /// Check the old/new line-count invariant against the header counts.
    pub fn counts_consistent(&self) -> bool {
        let new = self
            .lines
            .iter()
            .filter(|l| l.marker.counts_as_new())
            .count() as u32;
        let old = self
            .lines
            .iter()
            .filter(|l| l.marker.counts_as_old())
            .count() as u32;
        new == self.new_count && old == self.old_count
    }
}

/// A modification to a single file.
///
/// Invariant: at least one of the paths is set. `/dev/null` on either
/// side marks a creation or deletion and maps to `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileModification {
    /// Path of the old file (`None` for new files).
    pub old_path: Option<String>,
    /// Path of the new file (`None` for deleted files).
    pub new_path: Option<String>,
    /// Raw `--- ` header line, verbatim (for byte-exact serialization).
    pub old_header: String,
    /// Raw `+++ ` header line, verbatim.
    pub new_header: String,
    /// Metadata lines preceding the `---` header (`diff --git`, `index`,
    /// mode lines, …), verbatim and in order.
    pub preamble: Vec<String>,
    /// The hunks in this modification.
    pub hunks: Vec<Hunk>,
}

impl FileModification {
    /// Returns the most relevant path (new path when present, else old).
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    /// Whether this modification creates the file.
    pub fn is_new(&self) -> bool {
        self.old_path.is_none()
    }

    /// Whether this modification deletes the file.
    pub fn is_deleted(&self) -> bool {
        self.new_path.is_none()
    }

    /// Total unified-diff lines across all hunks, headers included.
    pub fn rendered_lines(&self) -> usize {
        self.hunks.iter().map(Hunk::rendered_lines).sum()
    }
}

/// An ordered parsed unified diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffDocument {
    pub files: Vec<FileModification>,
}

impl DiffDocument {
    /// Look up a file modification by its relevant path.
    pub fn file(&self, path: &str) -> Option<&FileModification> {
        self.files.iter().find(|f| f.path() == path)
    }

    /// Total content lines (hunk lines, headers excluded) in the document.
    pub fn total_hunk_lines(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.hunks)
            .map(|h| h.lines.len())
            .sum()
    }
}
