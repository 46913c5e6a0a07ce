//! Unified diff format parser and serializer.
//!
//! Parses the `--- / +++ / @@` line-oriented format into a
//! [`DiffDocument`]. Header lines (`diff --git`, `index`, mode changes,
//! `Binary files …`) are tolerated and preserved verbatim so that
//! [`to_unified`] reproduces well-formed LF input byte for byte.

use crate::models::diff::{DiffDocument, DiffLine, FileModification, Hunk, LineMarker};

use super::DiffError;

/// Parse a unified diff string into a document.
///
/// A file opens on a `--- ` header immediately followed by a `+++ `
/// header; everything between the previous file and the `---` line is
/// kept as that file's preamble. Hunks consume exactly the line counts
/// their `@@` header declares; a shortfall or a malformed header fails
/// with [`DiffError::Malformed`].
pub fn parse_unified_diff(input: &str) -> Result<DiffDocument, DiffError> {
    let lines: Vec<&str> = input.lines().collect();
    let mut files: Vec<FileModification> = Vec::new();
    let mut preamble: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(old_rest) = line.strip_prefix("--- ") {
            let old_header = line.to_string();
            let new_line = *lines
                .get(i + 1)
                .ok_or_else(|| DiffError::at(i + 2, "expected '+++' header after '---'"))?;
            let new_rest = new_line
                .strip_prefix("+++ ")
                .ok_or_else(|| DiffError::at(i + 2, "expected '+++' header after '---'"))?;

            let mut file = FileModification {
                old_path: parse_header_path(old_rest),
                new_path: parse_header_path(new_rest),
                old_header,
                new_header: new_line.to_string(),
                preamble: std::mem::take(&mut preamble),
                hunks: Vec::new(),
            };
            i += 2;

            // Hunks follow until the next header or metadata line.
            while i < lines.len() && lines[i].starts_with("@@") {
                let (hunk, consumed) = parse_hunk(&lines, i)?;
                file.hunks.push(hunk);
                i += consumed;
            }

            files.push(file);
        } else if line.starts_with("@@") {
            return Err(DiffError::at(i + 1, "hunk header outside of a file"));
        } else {
            // Unknown metadata; belongs to the next file that opens.
            preamble.push(line.to_string());
            i += 1;
        }
    }

    // Trailing metadata with no following file is tolerated and dropped.
    Ok(DiffDocument { files })
}

/// Extract the path from a `---`/`+++` header remainder.
///
/// Strips the conventional single-character prefixes (`a/`, `b/`, plus
/// the mnemonic `c/ w/ i/ o/` set) and cuts at a tab (git appends
/// timestamps after a tab in some configurations). `/dev/null` maps to
/// `None`.
fn parse_header_path(rest: &str) -> Option<String> {
    let path = rest.split('\t').next().unwrap_or(rest);
    if path == "/dev/null" {
        return None;
    }
    Some(strip_diff_prefix(path).to_string())
}

/// Strip a single-character git diff prefix (`a/`, `b/`, `c/`, `w/`, `i/`, `o/`).
fn strip_diff_prefix(path: &str) -> &str {
    if path.len() >= 2 {
        let bytes = path.as_bytes();
        if bytes[1] == b'/' && matches!(bytes[0], b'a' | b'b' | b'c' | b'w' | b'i' | b'o') {
            return &path[2..];
        }
    }
    path
}

/// Parse one hunk starting at `lines[start]`. Returns the hunk and the
/// number of input lines consumed (header included).
fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), DiffError> {
    let header_line = lines[start];
    let (old_start, old_count, old_omitted, new_start, new_count, new_omitted, header) =
        parse_hunk_header(header_line)
            .ok_or_else(|| DiffError::at(start + 1, format!("malformed hunk header: {header_line}")))?;

    let mut hunk_lines: Vec<DiffLine> = Vec::new();
    let mut old_remaining = old_count;
    let mut new_remaining = new_count;
    let mut new_line = new_start.saturating_sub(1);
    let mut i = start + 1;

    while old_remaining > 0 || new_remaining > 0 {
        let Some(&line) = lines.get(i) else {
            return Err(DiffError::at(
                i,
                format!("hunk truncated: {old_remaining} old / {new_remaining} new lines missing"),
            ));
        };

        let (marker, content) = classify_content_line(line).ok_or_else(|| {
            DiffError::at(i + 1, format!("expected hunk content, found: {line}"))
        })?;

        match marker {
            LineMarker::Added => {
                if new_remaining == 0 {
                    return Err(DiffError::at(i + 1, "more added lines than header declares"));
                }
                new_remaining -= 1;
                new_line += 1;
                hunk_lines.push(DiffLine {
                    marker,
                    content,
                    new_line_no: Some(new_line),
                });
            }
            LineMarker::Removed => {
                if old_remaining == 0 {
                    return Err(DiffError::at(i + 1, "more removed lines than header declares"));
                }
                old_remaining -= 1;
                hunk_lines.push(DiffLine {
                    marker,
                    content,
                    new_line_no: None,
                });
            }
            LineMarker::Context => {
                if old_remaining == 0 || new_remaining == 0 {
                    return Err(DiffError::at(i + 1, "more context lines than header declares"));
                }
                old_remaining -= 1;
                new_remaining -= 1;
                new_line += 1;
                hunk_lines.push(DiffLine {
                    marker,
                    content,
                    new_line_no: Some(new_line),
                });
            }
            LineMarker::Meta => {
                hunk_lines.push(DiffLine {
                    marker,
                    content,
                    new_line_no: None,
                });
            }
        }
        i += 1;
    }

    // A trailing "\ No newline at end of file" after the counted lines.
    if let Some(&line) = lines.get(i) {
        if let Some(content) = line.strip_prefix('\\') {
            hunk_lines.push(DiffLine {
                marker: LineMarker::Meta,
                content: content.to_string(),
                new_line_no: None,
            });
            i += 1;
        }
    }

    Ok((
        Hunk {
            old_start,
            old_count,
            new_start,
            new_count,
            header,
            old_count_omitted: old_omitted,
            new_count_omitted: new_omitted,
            lines: hunk_lines,
        },
        i - start,
    ))
}

/// Classify a hunk content line into its marker and content.
///
/// An entirely empty line is tolerated as empty context (some tools trim
/// the trailing space from blank context lines).
fn classify_content_line(line: &str) -> Option<(LineMarker, String)> {
    if line.is_empty() {
        return Some((LineMarker::Context, String::new()));
    }
    let mut chars = line.chars();
    let marker = match chars.next() {
        Some('+') => LineMarker::Added,
        Some('-') => LineMarker::Removed,
        Some(' ') => LineMarker::Context,
        Some('\\') => LineMarker::Meta,
        _ => return None,
    };
    Some((marker, chars.as_str().to_string()))
}

/// Parse a `@@ -old_start[,old_count] +new_start[,new_count] @@ header` line.
#[allow(clippy::type_complexity)]
fn parse_hunk_header(line: &str) -> Option<(u32, u32, bool, u32, u32, bool, Option<String>)> {
    let line = line.strip_prefix("@@ ")?;
    let end = line.find(" @@")?;
    let range_part = &line[..end];
    let header = {
        let rest = &line[end + 3..];
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    };

    let (old_part, new_part) = range_part.split_once(' ')?;
    let (old_start, old_count, old_omitted) = parse_range(old_part.strip_prefix('-')?)?;
    let (new_start, new_count, new_omitted) = parse_range(new_part.strip_prefix('+')?)?;

    Some((
        old_start,
        old_count,
        old_omitted,
        new_start,
        new_count,
        new_omitted,
        header,
    ))
}

/// Parse "start,count" or "start" (count defaults to 1 when omitted).
fn parse_range(s: &str) -> Option<(u32, u32, bool)> {
    if let Some((start, count)) = s.split_once(',') {
        Some((start.parse().ok()?, count.parse().ok()?, false))
    } else {
        Some((s.parse().ok()?, 1, true))
    }
}

/// Serialize a document back to unified-diff text.
///
/// Byte-exact for well-formed LF-terminated input: preamble and header
/// lines are stored verbatim, and hunk headers are rebuilt honouring the
/// original count omissions.
pub fn to_unified(doc: &DiffDocument) -> String {
    let mut out = String::new();
    for file in &doc.files {
        for meta in &file.preamble {
            out.push_str(meta);
            out.push('\n');
        }
        out.push_str(&file.old_header);
        out.push('\n');
        out.push_str(&file.new_header);
        out.push('\n');
        for hunk in &file.hunks {
            out.push_str("@@ -");
            push_range(&mut out, hunk.old_start, hunk.old_count, hunk.old_count_omitted);
            out.push_str(" +");
            push_range(&mut out, hunk.new_start, hunk.new_count, hunk.new_count_omitted);
            out.push_str(" @@");
            if let Some(ref header) = hunk.header {
                out.push_str(header);
            }
            out.push('\n');
            for line in &hunk.lines {
                out.push(line.marker.prefix());
                out.push_str(&line.content);
                out.push('\n');
            }
        }
    }
    out
}

fn push_range(out: &mut String, start: u32, count: u32, omitted: bool) {
    out.push_str(&start.to_string());
    if !omitted {
        out.push(',');
        out.push_str(&count.to_string());
    }
}
