//! Splicing a serialized manifest into service-worker source.

use regex::Regex;
use tracing::debug;

use crate::compilation::CompilerOptions;
use crate::source_map::{self, Splice};
use crate::utils::requote_single;
use crate::{PluginError, PrecacheEntry};

/// How string literals in the injected manifest are quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteStyle {
    /// Plain JSON.
    #[default]
    Double,
    /// Every JSON string re-quoted as a JS single-quoted literal.
    Single,
}

impl QuoteStyle {
    /// Single quotes for compiled sources, except under
    /// `eval-cheap-source-map` with minimization, where the manifest ends
    /// up inside an eval'd string.
    pub fn for_compilation(compile_src: bool, options: &CompilerOptions) -> Self {
        let eval_minified =
            options.devtool.as_deref() == Some("eval-cheap-source-map") && options.minimize;
        if compile_src && !eval_minified {
            Self::Single
        } else {
            Self::Double
        }
    }
}

/// The text a manifest is injected into.
#[derive(Debug, Clone, Copy)]
pub struct InjectionTarget<'a> {
    /// Asset name, recorded as the rewritten map's `file`.
    pub name: &'a str,
    pub source: &'a str,
    /// `(asset name, JSON)` of the source map describing `source`.
    pub source_map: Option<(&'a str, &'a str)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub source: String,
    pub source_map: Option<String>,
}

/// Compact JSON array with keys in sorted order.
pub fn serialize_manifest(entries: &[PrecacheEntry], style: QuoteStyle) -> Result<String, PluginError> {
    let json = serde_json::to_string(entries)
        .map_err(|e| PluginError::Generation(format!("failed to serialize the manifest: {}", e)))?;
    Ok(match style {
        QuoteStyle::Double => json,
        QuoteStyle::Single => requote_single(&json),
    })
}

/// Byte offset of the only occurrence of `marker` in `source`.
pub fn find_injection_point(source: &str, marker: &str) -> Result<usize, PluginError> {
    let re = Regex::new(&regex::escape(marker)).map_err(|e| PluginError::Configuration {
        plugin: "InjectManifest",
        message: format!("invalid injectionPoint: {}", e),
    })?;
    let mut matches = re.find_iter(source);
    let first = matches.next().ok_or_else(|| PluginError::MissingInjectionPoint {
        marker: marker.to_string(),
    })?;
    let count = 1 + matches.count();
    if count > 1 {
        return Err(PluginError::MultipleInjectionPoints {
            marker: marker.to_string(),
            count,
        });
    }
    Ok(first.start())
}

/// Replace `marker` in the target with the serialized `entries` and keep
/// the target's source map, if any, in step.
pub fn inject_manifest(
    target: &InjectionTarget<'_>,
    marker: &str,
    entries: &[PrecacheEntry],
    style: QuoteStyle,
) -> Result<Injection, PluginError> {
    let manifest = serialize_manifest(entries, style)?;
    splice_manifest(target, marker, &manifest)
}

/// [`inject_manifest`] for an already serialized manifest.
pub fn splice_manifest(
    target: &InjectionTarget<'_>,
    marker: &str,
    manifest: &str,
) -> Result<Injection, PluginError> {
    let offset = find_injection_point(target.source, marker)?;

    let mut source = String::with_capacity(target.source.len() - marker.len() + manifest.len());
    source.push_str(&target.source[..offset]);
    source.push_str(manifest);
    source.push_str(&target.source[offset + marker.len()..]);

    let source_map = match target.source_map {
        Some((map_name, map_json)) => {
            let as_error = |source| PluginError::SourceMap {
                asset: map_name.to_string(),
                source,
            };
            let splice = Splice::locate(target.source, offset, marker, manifest).map_err(as_error)?;
            let rewritten = source_map::rewrite(map_json, &splice, target.name).map_err(as_error)?;
            debug!(source_map = map_name, line = splice.line, "rewrote source map");
            Some(rewritten)
        }
        None => None,
    };

    Ok(Injection { source, source_map })
}
