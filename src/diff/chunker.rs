//! Chunk splitter for large diffs.
//!
//! Splits a [`DiffDocument`] into an ordered lazy sequence of
//! sub-documents by greedily packing whole files, then hunks, until the
//! line cap is reached. Hunks are never split: a single hunk larger than
//! the cap is emitted alone so the LLM always sees hunks intact.

use crate::models::diff::{DiffDocument, FileModification, Hunk};

/// Split a document into chunks of at most `max_lines` hunk-content
/// lines each (a lone oversized hunk may exceed the cap).
///
/// The returned iterator is lazy; chunks are assembled on demand.
pub fn chunk_document(doc: &DiffDocument, max_lines: usize) -> Chunks<'_> {
    Chunks {
        doc,
        file_idx: 0,
        hunk_idx: 0,
        max_lines: max_lines.max(1),
    }
}

/// Lazy iterator over packed sub-documents.
pub struct Chunks<'a> {
    doc: &'a DiffDocument,
    file_idx: usize,
    hunk_idx: usize,
    max_lines: usize,
}

impl Chunks<'_> {
    /// Hunk line count used for packing decisions.
    fn hunk_lines(hunk: &Hunk) -> usize {
        hunk.lines.len()
    }

    /// Clone file `idx` with only the given hunk range.
    fn file_slice(&self, idx: usize, hunks: Vec<Hunk>) -> FileModification {
        let file = &self.doc.files[idx];
        FileModification {
            old_path: file.old_path.clone(),
            new_path: file.new_path.clone(),
            old_header: file.old_header.clone(),
            new_header: file.new_header.clone(),
            preamble: file.preamble.clone(),
            hunks,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = DiffDocument;

    fn next(&mut self) -> Option<DiffDocument> {
        if self.file_idx >= self.doc.files.len() {
            return None;
        }

        let mut files: Vec<FileModification> = Vec::new();
        let mut used = 0usize;

        while self.file_idx < self.doc.files.len() {
            let file = &self.doc.files[self.file_idx];
            let mut taken: Vec<Hunk> = Vec::new();

            while self.hunk_idx < file.hunks.len() {
                let hunk = &file.hunks[self.hunk_idx];
                let cost = Self::hunk_lines(hunk);

                // An oversized hunk travels alone; anything else stops
                // at the cap and waits for the next chunk.
                if used + cost > self.max_lines && used > 0 {
                    break;
                }
                taken.push(hunk.clone());
                used += cost;
                self.hunk_idx += 1;

                if used >= self.max_lines {
                    break;
                }
            }

            let file_done = self.hunk_idx >= file.hunks.len();
            if !taken.is_empty() || (file_done && file.hunks.is_empty()) {
                // Hunkless files (pure metadata) ride along with whatever
                // chunk reaches them.
                files.push(self.file_slice(self.file_idx, taken));
            }

            if file_done {
                self.file_idx += 1;
                self.hunk_idx = 0;
            }

            if used >= self.max_lines {
                break;
            }
            if !file_done {
                // Stopped mid-file because the cap is reached.
                break;
            }
        }

        if files.is_empty() {
            None
        } else {
            Some(DiffDocument { files })
        }
    }
}
