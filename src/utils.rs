//! Utility functions shared by the plugins.
//!
//! - Single-quote rewriting for the serialized manifest
//! - Human-readable sizes
//! - Output-path and URL helpers

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::compilation::PublicPath;

// ---------------------------------------------------------------------------
// JS String Quoting
// ---------------------------------------------------------------------------

/// Re-quote every string literal of compact JSON text with single quotes.
///
/// Escapes inside each literal are kept, except `\"`, which becomes a bare
/// `"`; bare `'` gains a backslash. Everything outside literals is copied.
pub fn requote_single(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut chars = json.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if !in_string {
            if c == '"' {
                in_string = true;
                out.push('\'');
            } else {
                out.push(c);
            }
            continue;
        }
        match c {
            '"' => {
                in_string = false;
                out.push('\'');
            }
            '\'' => out.push_str("\\'"),
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

/// Format a byte count with base-1000 units, e.g. `2.1 MB`.
pub fn pretty_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];

    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        // Pick the unit on the value as printed.
        if round2(value) < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, unit)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Paths and URLs
// ---------------------------------------------------------------------------

/// Normalize path separators to `/`.
pub fn to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Make an absolute `swDest` relative to the compiler output path. Relative
/// names are only normalized.
pub fn relative_to_output_path(output_path: &Path, sw_dest: &str) -> String {
    let dest = Path::new(sw_dest);
    if dest.is_absolute() {
        if let Some(relative) = pathdiff::diff_paths(dest, output_path) {
            return to_posix(&relative.to_string_lossy());
        }
    }
    to_posix(sw_dest).trim_start_matches("./").to_string()
}

/// Public URL of an emitted asset.
pub fn resolve_url(public_path: &PublicPath, asset_name: &str) -> String {
    let name = to_posix(asset_name);
    match public_path {
        PublicPath::Auto => name,
        PublicPath::Path(prefix) => format!("{}{}", prefix, name),
    }
}

fn source_mapping_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*//[#@][ \t]+sourceMappingURL=([^\s'\x22]+)[ \t]*$").unwrap()
    })
}

/// The last `//# sourceMappingURL=` value in a script, if any.
pub fn source_mapping_url(source: &str) -> Option<&str> {
    source_mapping_url_re()
        .captures_iter(source)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Join a reference found in `asset_name` onto that asset's directory,
/// resolving `.` and `..` segments. `None` for URLs with a scheme and for
/// references escaping the output root.
pub fn resolve_sibling(asset_name: &str, reference: &str) -> Option<String> {
    if reference.contains("://") || reference.starts_with("data:") {
        return None;
    }
    let asset_name = to_posix(asset_name);
    let mut segments: Vec<&str> = match asset_name.rfind('/') {
        Some(idx) => asset_name[..idx].split('/').collect(),
        None => Vec::new(),
    };
    for part in reference.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            part => segments.push(part),
        }
    }
    Some(segments.join("/"))
}

/// Length of a string in UTF-16 code units, the unit of source-map columns.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_requote_single() {
        assert_eq!(
            requote_single(r#"[{"revision":null,"url":"a.js"}]"#),
            "[{'revision':null,'url':'a.js'}]"
        );
        assert_eq!(requote_single(r#"["say \"hi\""]"#), r#"['say "hi"']"#);
        assert_eq!(requote_single(r#"["it's"]"#), r#"['it\'s']"#);
        assert_eq!(requote_single(r#"["a\\b"]"#), r#"['a\\b']"#);
    }

    #[test]
    fn test_pretty_bytes() {
        assert_eq!(pretty_bytes(0), "0 B");
        assert_eq!(pretty_bytes(999), "999 B");
        assert_eq!(pretty_bytes(1000), "1 kB");
        assert_eq!(pretty_bytes(1500), "1.5 kB");
        assert_eq!(pretty_bytes(2_097_152), "2.1 MB");
        assert_eq!(pretty_bytes(3_000_000_000), "3 GB");
        assert_eq!(pretty_bytes(999_999), "1 MB");
        assert_eq!(pretty_bytes(999_994), "999.99 kB");
    }

    #[test]
    fn test_relative_to_output_path() {
        let out = PathBuf::from("/project/dist");
        assert_eq!(relative_to_output_path(&out, "/project/dist/sw.js"), "sw.js");
        assert_eq!(
            relative_to_output_path(&out, "/project/dist/workers/sw.js"),
            "workers/sw.js"
        );
        assert_eq!(relative_to_output_path(&out, "./sw.js"), "sw.js");
        assert_eq!(relative_to_output_path(&out, "sub\\sw.js"), "sub/sw.js");
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url(&PublicPath::Auto, "main.js"), "main.js");
        assert_eq!(
            resolve_url(&PublicPath::Path("/static/".into()), "js\\main.js"),
            "/static/js/main.js"
        );
        assert_eq!(resolve_url(&PublicPath::default(), "main.js"), "main.js");
    }

    #[test]
    fn test_source_mapping_url() {
        let src = "console.log(1);\n//# sourceMappingURL=sw.js.map\n";
        assert_eq!(source_mapping_url(src), Some("sw.js.map"));
        assert_eq!(source_mapping_url("console.log(1);"), None);
    }

    #[test]
    fn test_resolve_sibling() {
        assert_eq!(resolve_sibling("sw.js", "sw.js.map").as_deref(), Some("sw.js.map"));
        assert_eq!(
            resolve_sibling("workers/sw.js", "sw.js.map").as_deref(),
            Some("workers/sw.js.map")
        );
        assert_eq!(
            resolve_sibling("workers/sw.js", "../maps/sw.js.map").as_deref(),
            Some("maps/sw.js.map")
        );
        assert_eq!(resolve_sibling("sw.js", "../sw.js.map"), None);
        assert_eq!(resolve_sibling("sw.js", "https://cdn/sw.js.map"), None);
    }

    #[test]
    fn test_utf16_len() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("é"), 1);
        assert_eq!(utf16_len("😀"), 2);
    }
}
