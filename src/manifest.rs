//! Precache manifest extraction.
//!
//! [`extract`] turns the assets of a finished compilation into sorted,
//! de-duplicated precache entries. [`build_manifest`] runs the transform
//! pipeline on top and returns the final manifest.

pub mod transform;

use std::collections::{HashMap, HashSet};

use arcstr::ArcStr;
use tracing::debug;

use crate::compilation::Compilation;
use crate::config::{AdditionalEntry, FilterContext, ManifestOptions};
use crate::plugin::registry::GeneratedAssetRegistry;
use crate::utils::{pretty_bytes, resolve_url};
use crate::{
    Diagnostic, DiagnosticCode, DiagnosticLevel, EntrySource, ManifestResult, PluginError,
    PrecacheEntry,
};

/// Content fingerprint used as an entry's revision: MD5, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Compute the precache entries for `compilation` before any transform runs.
///
/// Assets the registry knows about are never listed. An empty compilation
/// yields an empty manifest.
pub fn extract(
    compilation: &dyn Compilation,
    options: &ManifestOptions,
    registry: &GeneratedAssetRegistry,
) -> Result<ManifestResult, PluginError> {
    let sw_dest = options
        .sw_dest
        .as_deref()
        .ok_or_else(|| PluginError::Configuration {
            plugin: "precache manifest",
            message: "'swDest' is required".to_string(),
        })?;

    let mut warnings = Vec::new();
    let allowed = options
        .chunks
        .as_ref()
        .map(|names| chunk_file_set(compilation, names, "chunks", sw_dest, &mut warnings));
    let denied = chunk_file_set(
        compilation,
        &options.exclude_chunks,
        "excludeChunks",
        sw_dest,
        &mut warnings,
    );

    let public_path = &compilation.options().output.public_path;
    let mut entries = Vec::new();

    for asset in compilation.assets() {
        if registry.contains(&asset.name) {
            continue;
        }
        let ctx = FilterContext { asset, compilation };
        if options.exclude.iter().any(|f| f.matches(&ctx)) {
            continue;
        }
        if let Some(include) = &options.include {
            if !include.iter().any(|f| f.matches(&ctx)) {
                continue;
            }
        }
        if let Some(allowed) = &allowed {
            if !allowed.contains(&asset.name) {
                continue;
            }
        }
        if denied.contains(&asset.name) {
            continue;
        }

        let url = resolve_url(public_path, &asset.name);
        let size = asset.size();
        if size > options.maximum_file_size_to_cache_in_bytes {
            warnings.push(
                Diagnostic::warning(
                    DiagnosticCode::FileTooLarge,
                    format!(
                        "{} is {}, and won't be precached. Configure \
                         maximumFileSizeToCacheInBytes to change this limit.",
                        url,
                        pretty_bytes(size)
                    ),
                )
                .with_context(sw_dest),
            );
            continue;
        }

        let revision = if asset.info.is_content_addressed() {
            None
        } else {
            Some(fingerprint(&asset.source))
        };
        entries.push(PrecacheEntry {
            integrity: None,
            revision,
            url,
            size,
            source: EntrySource::Asset(asset.name.clone()),
        });
    }

    let unrevisioned: Vec<&str> = options
        .additional_manifest_entries
        .iter()
        .filter_map(|entry| match entry {
            AdditionalEntry::Url(url) => Some(url.as_str()),
            AdditionalEntry::Entry { .. } => None,
        })
        .collect();
    if !unrevisioned.is_empty() {
        warnings.push(
            Diagnostic::warning(
                DiagnosticCode::UnrevisionedEntry,
                format!(
                    "The following URLs were passed to additionalManifestEntries without \
                     revisioning info and will not be updated when their content changes: {}",
                    unrevisioned.join(", ")
                ),
            )
            .with_context(sw_dest),
        );
    }
    entries.extend(
        options
            .additional_manifest_entries
            .iter()
            .map(AdditionalEntry::to_entry),
    );

    let mut entries = dedupe(entries, sw_dest, &mut warnings);
    sort_entries(&mut entries);

    debug!(sw_dest, entries = entries.len(), "extracted precache entries");

    Ok(ManifestResult {
        total_size: total_size(&entries),
        entries,
        warnings,
    })
}

/// [`extract`] followed by the built-in and user transforms.
pub fn build_manifest(
    compilation: &dyn Compilation,
    options: &ManifestOptions,
    registry: &GeneratedAssetRegistry,
) -> Result<ManifestResult, PluginError> {
    let extracted = extract(compilation, options, registry)?;
    let mut warnings = extracted.warnings;

    let builtin = transform::builtin_transforms(options);
    let output = transform::apply_transforms(extracted.entries, &builtin, compilation)?;
    let output = transform::apply_transforms(output.entries, &options.manifest_transforms, compilation)?;

    let context = options.sw_dest.clone();
    warnings.extend(output.warnings.into_iter().map(|message| Diagnostic {
        level: DiagnosticLevel::Warning,
        message,
        code: None,
        context: context.clone(),
    }));

    let entries = finalize(output.entries)?;
    Ok(ManifestResult {
        total_size: total_size(&entries),
        entries,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

fn chunk_file_set(
    compilation: &dyn Compilation,
    names: &[String],
    option: &str,
    sw_dest: &str,
    warnings: &mut Vec<Diagnostic>,
) -> HashSet<ArcStr> {
    let mut files = HashSet::new();
    for name in names {
        match compilation.chunk_files(name) {
            Some(chunk_files) => files.extend(chunk_files),
            None => warnings.push(
                Diagnostic::warning(
                    DiagnosticCode::ChunkNotFound,
                    format!(
                        "The chunk '{}' was provided for your {} config, but was not found in \
                         the compilation.",
                        name, option
                    ),
                )
                .with_context(sw_dest),
            ),
        }
    }
    files
}

// ---------------------------------------------------------------------------
// Ordering and uniqueness
// ---------------------------------------------------------------------------

/// One entry per URL, the last one inserted winning. Exact repeats vanish
/// silently; a repeat with another revision replaces the earlier entry and
/// is reported.
fn dedupe(
    entries: Vec<PrecacheEntry>,
    sw_dest: &str,
    warnings: &mut Vec<Diagnostic>,
) -> Vec<PrecacheEntry> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<PrecacheEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some(&at) = index.get(&entry.url) else {
            index.insert(entry.url.clone(), kept.len());
            kept.push(entry);
            continue;
        };
        if kept[at].revision != entry.revision {
            warnings.push(
                Diagnostic::warning(
                    DiagnosticCode::DuplicateEntry,
                    format!(
                        "The URL '{}' is listed more than once with different revisions; \
                         only the last entry will be precached.",
                        entry.url
                    ),
                )
                .with_context(sw_dest),
            );
        }
        kept[at] = entry;
    }
    kept
}

/// Ascending by URL, then by revision with `None` first.
pub fn sort_entries(entries: &mut [PrecacheEntry]) {
    entries.sort_by(|a, b| {
        a.url
            .cmp(&b.url)
            .then_with(|| a.revision.cmp(&b.revision))
    });
}

/// Sort and reject conflicting URLs introduced by transforms.
fn finalize(mut entries: Vec<PrecacheEntry>) -> Result<Vec<PrecacheEntry>, PluginError> {
    sort_entries(&mut entries);
    for pair in entries.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.url == b.url && (a.revision != b.revision || a.integrity != b.integrity) {
            return Err(PluginError::DuplicateUrl { url: a.url.clone() });
        }
    }
    entries.dedup_by(|b, a| a.url == b.url);
    Ok(entries)
}

fn total_size(entries: &[PrecacheEntry]) -> u64 {
    entries.iter().map(|e| e.size).sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
