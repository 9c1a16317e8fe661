//! Source map rewriting around a single-line text splice.
//!
//! Only the generated-column field of the spliced line is touched. Every
//! other line, and every other field of the affected segments, is copied
//! through as-is.

use serde_json::Value;
use sourcemap::vlq::{generate_vlq_segment, parse_vlq_segment};
use thiserror::Error;

use crate::utils::utf16_len;

#[derive(Debug, Error)]
pub enum SourceMapError {
    #[error("invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("indexed source maps with \"sections\" are not supported")]
    Indexed,

    #[error("the source map has no \"mappings\" string")]
    MissingMappings,

    #[error("invalid VLQ segment `{segment}` on generated line {line}")]
    Vlq { line: u32, segment: String },

    #[error("the spliced text spans more than one line")]
    Multiline,
}

/// A replacement of `[start, end)` on one generated line. Columns are in
/// UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    /// Zero-based generated line.
    pub line: u32,
    pub start: u32,
    pub end: u32,
    pub replacement_len: u32,
}

impl Splice {
    /// Describe replacing `source[offset..offset + original.len()]` with
    /// `replacement`.
    pub fn locate(
        source: &str,
        offset: usize,
        original: &str,
        replacement: &str,
    ) -> Result<Self, SourceMapError> {
        if original.contains('\n') || replacement.contains('\n') {
            return Err(SourceMapError::Multiline);
        }
        let before = &source[..offset];
        let line = before.matches('\n').count() as u32;
        let line_start = before.rfind('\n').map_or(0, |idx| idx + 1);
        let start = utf16_len(&before[line_start..]);
        Ok(Self {
            line,
            start,
            end: start + utf16_len(original),
            replacement_len: utf16_len(replacement),
        })
    }

    fn shift(&self, column: i64) -> i64 {
        let start = i64::from(self.start);
        let end = i64::from(self.end);
        if column <= start {
            column
        } else if column >= end {
            column + i64::from(self.replacement_len) - (end - start)
        } else {
            start
        }
    }
}

/// Rewrite a JSON source map for `splice` and point its `file` at `file`.
pub fn rewrite(map_json: &str, splice: &Splice, file: &str) -> Result<String, SourceMapError> {
    let mut map: Value = serde_json::from_str(map_json)?;
    let object = map.as_object_mut().ok_or(SourceMapError::MissingMappings)?;
    if object.contains_key("sections") {
        return Err(SourceMapError::Indexed);
    }

    let mappings = object
        .get("mappings")
        .and_then(Value::as_str)
        .ok_or(SourceMapError::MissingMappings)?;
    let rewritten = rewrite_mappings(mappings, splice)?;

    object.insert("mappings".into(), Value::String(rewritten));
    object.insert("file".into(), Value::String(file.to_string()));
    Ok(serde_json::to_string(&map)?)
}

/// Rewrite the `mappings` string for `splice`.
pub fn rewrite_mappings(mappings: &str, splice: &Splice) -> Result<String, SourceMapError> {
    let mut lines: Vec<String> = mappings.split(';').map(str::to_string).collect();
    if let Some(line) = lines.get_mut(splice.line as usize) {
        *line = rewrite_line(line, splice)?;
    }
    Ok(lines.join(";"))
}

fn rewrite_line(line: &str, splice: &Splice) -> Result<String, SourceMapError> {
    let mut column = 0i64;
    let mut previous = 0i64;
    let mut segments = Vec::new();

    for segment in line.split(',') {
        if segment.is_empty() {
            segments.push(String::new());
            continue;
        }
        let invalid = || SourceMapError::Vlq {
            line: splice.line,
            segment: segment.to_string(),
        };
        let mut fields = decode_segment(segment).ok_or_else(invalid)?;
        let delta = &mut fields[0];

        column += *delta;
        let shifted = splice.shift(column);
        *delta = shifted - previous;
        previous = shifted;

        segments.push(generate_vlq_segment(&fields).map_err(|_| invalid())?);
    }
    Ok(segments.join(","))
}

/// Decode one segment, accepting only base64 digits and the 1-, 4- or
/// 5-field shapes a v3 map allows.
fn decode_segment(segment: &str) -> Option<Vec<i64>> {
    if !segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return None;
    }
    let fields = parse_vlq_segment(segment).ok()?;
    matches!(fields.len(), 1 | 4 | 5).then_some(fields)
}
