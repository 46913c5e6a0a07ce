//! Position mapping between new-file line numbers and diff positions.
//!
//! Providers that anchor inline comments by *diff position* (a 1-based
//! line index into the unified-diff text, scoped to one file) need a
//! mapping from `(path, new-line)` to that index. The index counts each
//! hunk's `@@` header and every hunk line, in order.

use crate::models::diff::DiffDocument;

/// Map `(path, line)` to the file-scoped diff position.
///
/// Walks files in order and skips every non-matching file. Within the
/// matching file the running position advances by one for each hunk
/// header and each hunk line; the position is returned when an added or
/// context line lands on `line`. Returns `None` when the file is absent
/// or the target line is not represented on the new side of the diff.
pub fn map_position(doc: &DiffDocument, path: &str, line: u32) -> Option<u32> {
    let file = doc.files.iter().find(|f| f.path() == path)?;

    let mut position: u32 = 0;
    for hunk in &file.hunks {
        position += 1; // hunk header
        let mut new_line = hunk.new_start.saturating_sub(1);
        for l in &hunk.lines {
            position += 1;
            if l.marker.counts_as_new() {
                new_line += 1;
                if new_line == line {
                    return Some(position);
                }
            }
        }
    }

    None
}
