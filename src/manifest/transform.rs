//! Manifest transform pipeline.
//!
//! A transform takes the full entry list and returns a replacement list plus
//! optional warnings. Transforms run strictly in order; the first failure
//! aborts the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::compilation::Compilation;
use crate::config::{ManifestOptions, Pattern};
use crate::{PluginError, PrecacheEntry};

/// What a transform hands to the next stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    pub entries: Vec<PrecacheEntry>,
    pub warnings: Vec<String>,
}

impl TransformOutput {
    pub fn new(entries: Vec<PrecacheEntry>) -> Self {
        Self {
            entries,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub trait ManifestTransform: Send + Sync {
    fn transform(
        &self,
        entries: Vec<PrecacheEntry>,
        compilation: &dyn Compilation,
    ) -> anyhow::Result<TransformOutput>;
}

impl<F> ManifestTransform for F
where
    F: Fn(Vec<PrecacheEntry>, &dyn Compilation) -> anyhow::Result<TransformOutput> + Send + Sync,
{
    fn transform(
        &self,
        entries: Vec<PrecacheEntry>,
        compilation: &dyn Compilation,
    ) -> anyhow::Result<TransformOutput> {
        self(entries, compilation)
    }
}

impl fmt::Debug for dyn ManifestTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ManifestTransform")
    }
}

/// Run `transforms` in order over `entries`, collecting warnings.
pub fn apply_transforms(
    entries: Vec<PrecacheEntry>,
    transforms: &[Arc<dyn ManifestTransform>],
    compilation: &dyn Compilation,
) -> Result<TransformOutput, PluginError> {
    let mut output = TransformOutput::new(entries);
    for (index, transform) in transforms.iter().enumerate() {
        let step = transform
            .transform(output.entries, compilation)
            .map_err(|source| PluginError::Transform { index, source })?;
        debug!(index, entries = step.entries.len(), "applied manifest transform");
        output.entries = step.entries;
        output.warnings.extend(step.warnings);
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// Built-in transforms
// ---------------------------------------------------------------------------

/// The transforms implied by `modifyURLPrefix` and
/// `dontCacheBustURLsMatching`, in that order.
pub fn builtin_transforms(options: &ManifestOptions) -> Vec<Arc<dyn ManifestTransform>> {
    let mut transforms: Vec<Arc<dyn ManifestTransform>> = Vec::new();
    if !options.modify_url_prefix.is_empty() {
        transforms.push(Arc::new(ModifyUrlPrefix(options.modify_url_prefix.clone())));
    }
    if let Some(pattern) = &options.dont_cache_bust_urls_matching {
        transforms.push(Arc::new(DontCacheBust(pattern.clone())));
    }
    transforms
}

/// Rewrites the longest matching URL prefix. Only asset-derived entries are
/// touched.
#[derive(Debug, Clone)]
pub struct ModifyUrlPrefix(pub BTreeMap<String, String>);

impl ModifyUrlPrefix {
    fn rewrite(&self, url: &str) -> Option<String> {
        self.0
            .iter()
            .filter(|(from, _)| url.starts_with(from.as_str()))
            .max_by_key(|(from, _)| from.len())
            .map(|(from, to)| format!("{}{}", to, &url[from.len()..]))
    }
}

impl ManifestTransform for ModifyUrlPrefix {
    fn transform(
        &self,
        entries: Vec<PrecacheEntry>,
        _compilation: &dyn Compilation,
    ) -> anyhow::Result<TransformOutput> {
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                if entry.is_from_asset() {
                    if let Some(url) = self.rewrite(&entry.url) {
                        entry.url = url;
                    }
                }
                entry
            })
            .collect();
        Ok(TransformOutput::new(entries))
    }
}

/// Drops the revision of asset-derived entries whose URL already carries a
/// content hash.
#[derive(Debug, Clone)]
pub struct DontCacheBust(pub Pattern);

impl ManifestTransform for DontCacheBust {
    fn transform(
        &self,
        entries: Vec<PrecacheEntry>,
        _compilation: &dyn Compilation,
    ) -> anyhow::Result<TransformOutput> {
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                if entry.is_from_asset() && self.0.is_match(&entry.url) {
                    entry.revision = None;
                }
                entry
            })
            .collect();
        Ok(TransformOutput::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::MemoryCompilation;
    use crate::EntrySource;
    use anyhow::bail;

    struct Suffix(&'static str);

    impl ManifestTransform for Suffix {
        fn transform(
            &self,
            entries: Vec<PrecacheEntry>,
            _compilation: &dyn Compilation,
        ) -> anyhow::Result<TransformOutput> {
            let entries = entries
                .into_iter()
                .map(|mut e| {
                    e.url.push_str(self.0);
                    e
                })
                .collect();
            Ok(TransformOutput::new(entries).with_warning(format!("added {}", self.0)))
        }
    }

    fn failing(_: Vec<PrecacheEntry>, _: &dyn Compilation) -> anyhow::Result<TransformOutput> {
        bail!("boom")
    }

    fn asset_entry(url: &str, revision: Option<&str>) -> PrecacheEntry {
        PrecacheEntry {
            source: EntrySource::Asset(url.into()),
            ..PrecacheEntry::new(url, revision.map(str::to_string))
        }
    }

    #[test]
    fn transforms_run_in_order() {
        let transforms: Vec<Arc<dyn ManifestTransform>> =
            vec![Arc::new(Suffix("-v1")), Arc::new(Suffix("-v2"))];
        let out = apply_transforms(
            vec![asset_entry("a.js", None)],
            &transforms,
            &MemoryCompilation::default(),
        )
        .unwrap();
        assert_eq!(out.entries[0].url, "a.js-v1-v2");
        assert_eq!(out.warnings, vec!["added -v1", "added -v2"]);
    }

    #[test]
    fn failure_names_the_position() {
        let transforms: Vec<Arc<dyn ManifestTransform>> =
            vec![Arc::new(Suffix("-v1")), Arc::new(failing)];
        let err = apply_transforms(vec![], &transforms, &MemoryCompilation::default()).unwrap_err();
        match err {
            PluginError::Transform { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected Transform, got {other:?}"),
        }
    }

    #[test]
    fn modify_url_prefix_prefers_longest_match() {
        let mut map = BTreeMap::new();
        map.insert("".to_string(), "/root/".to_string());
        map.insert("static/".to_string(), "https://cdn.example.com/".to_string());
        let out = ModifyUrlPrefix(map)
            .transform(
                vec![
                    asset_entry("static/a.js", None),
                    asset_entry("b.js", None),
                    PrecacheEntry::new("static/extra.js", None),
                ],
                &MemoryCompilation::default(),
            )
            .unwrap();
        let urls: Vec<_> = out.entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://cdn.example.com/a.js", "/root/b.js", "static/extra.js"]
        );
    }

    #[test]
    fn dont_cache_bust_clears_revision() {
        let pattern = Pattern::new(r"\.[0-9a-f]{8}\.").unwrap();
        let out = DontCacheBust(pattern)
            .transform(
                vec![
                    asset_entry("app.1234abcd.js", Some("r1")),
                    asset_entry("app.js", Some("r2")),
                ],
                &MemoryCompilation::default(),
            )
            .unwrap();
        assert_eq!(out.entries[0].revision, None);
        assert_eq!(out.entries[1].revision.as_deref(), Some("r2"));
    }
}
