//! In-memory compilation and a copy-through child compiler.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use arcstr::ArcStr;
use serde::Deserialize;
use tracing::debug;

use super::{
    Asset, AssetInfo, ChildCompilation, ChildCompileRequest, ChildCompiler, Chunk, ChunkGroup,
    Compilation, CompilerOptions,
};
use crate::{Diagnostic, DiagnosticLevel, PluginError};

/// A self-contained [`Compilation`]. Assets iterate in name order.
#[derive(Debug, Clone, Default)]
pub struct MemoryCompilation {
    options: CompilerOptions,
    assets: BTreeMap<String, Asset>,
    chunks: BTreeMap<String, Chunk>,
    chunk_groups: BTreeMap<String, ChunkGroup>,
    file_dependencies: BTreeSet<PathBuf>,
    diagnostics: Vec<Diagnostic>,
}

impl MemoryCompilation {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.insert_asset(asset);
        self
    }

    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.insert_chunk(chunk);
        self
    }

    pub fn with_chunk_group(mut self, group: ChunkGroup) -> Self {
        self.insert_chunk_group(group);
        self
    }

    pub fn insert_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.name.to_string(), asset);
    }

    pub fn insert_chunk(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.id.to_string(), chunk);
    }

    pub fn insert_chunk_group(&mut self, group: ChunkGroup) {
        self.chunk_groups.insert(group.name.to_string(), group);
    }

    /// Adds an entry point made of a single chunk that owns `files`.
    pub fn with_entry(self, name: &str, files: &[&str]) -> Self {
        let chunk = Chunk {
            id: ArcStr::from(name),
            name: Some(ArcStr::from(name)),
            files: files.iter().map(|f| ArcStr::from(*f)).collect(),
            auxiliary_files: Vec::new(),
        };
        let group = ChunkGroup {
            name: ArcStr::from(name),
            chunks: vec![ArcStr::from(name)],
        };
        self.with_chunk(chunk).with_chunk_group(group)
    }

    pub fn options_mut(&mut self) -> &mut CompilerOptions {
        &mut self.options
    }

    pub fn file_dependencies(&self) -> &BTreeSet<PathBuf> {
        &self.file_dependencies
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.by_level(DiagnosticLevel::Warning)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.by_level(DiagnosticLevel::Error)
    }

    fn by_level(&self, level: DiagnosticLevel) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.level == level).collect()
    }

    pub fn into_assets(self) -> Vec<Asset> {
        self.assets.into_values().collect()
    }
}

impl Compilation for MemoryCompilation {
    fn options(&self) -> &CompilerOptions {
        &self.options
    }

    fn assets(&self) -> Vec<&Asset> {
        self.assets.values().collect()
    }

    fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.get(name)
    }

    fn named_chunk_group(&self, name: &str) -> Option<&ChunkGroup> {
        self.chunk_groups.get(name)
    }

    fn named_chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks
            .values()
            .find(|chunk| chunk.name.as_deref() == Some(name))
    }

    fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    fn emit_asset(&mut self, asset: Asset) {
        debug!(asset = %asset.name, size = asset.source.len(), "emit asset");
        self.insert_asset(asset);
    }

    fn update_asset(
        &mut self,
        name: &str,
        source: Vec<u8>,
        info: Option<AssetInfo>,
    ) -> Result<(), PluginError> {
        let asset = self
            .assets
            .get_mut(name)
            .ok_or_else(|| PluginError::MissingAsset(name.to_string()))?;
        asset.source = source;
        if let Some(info) = info {
            asset.info = info;
        }
        Ok(())
    }

    fn add_file_dependency(&mut self, path: PathBuf) {
        self.file_dependencies.insert(path);
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// JSON description of a finished compilation, as handed over by the CLI
/// and the Node binding.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompilationSnapshot {
    #[serde(default)]
    pub options: CompilerOptions,
    #[serde(default)]
    pub assets: Vec<AssetSnapshot>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub chunk_groups: Vec<ChunkGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssetSnapshot {
    pub name: String,
    /// UTF-8 contents.
    #[serde(default)]
    pub source: Option<String>,
    /// File holding the contents, relative to `options.context`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub info: AssetInfo,
}

impl CompilationSnapshot {
    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        serde_json::from_str(json).map_err(|e| PluginError::Configuration {
            plugin: "compilation",
            message: e.to_string(),
        })
    }

    /// Build the compilation, reading `path`-backed assets from disk.
    pub async fn load(self) -> Result<MemoryCompilation, PluginError> {
        let mut compilation = MemoryCompilation::new(self.options);
        for asset in self.assets {
            let source = match (asset.source, asset.path) {
                (Some(source), _) => source.into_bytes(),
                (None, Some(path)) => {
                    let path = if path.is_absolute() {
                        path
                    } else {
                        compilation.options.context.join(path)
                    };
                    tokio::fs::read(&path).await?
                }
                (None, None) => {
                    return Err(PluginError::Configuration {
                        plugin: "compilation",
                        message: format!("asset `{}` needs either `source` or `path`", asset.name),
                    })
                }
            };
            compilation.insert_asset(Asset::new(asset.name, source).with_info(asset.info));
        }
        for chunk in self.chunks {
            compilation.insert_chunk(chunk);
        }
        for group in self.chunk_groups {
            compilation.insert_chunk_group(group);
        }
        Ok(compilation)
    }
}

/// Child compiler that emits `swSrc` unchanged under `swDest`.
///
/// Stands in for a real sub-build when the host has no loader pipeline to
/// offer; compilation plugins are accepted and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyChildCompiler;

impl ChildCompiler for CopyChildCompiler {
    async fn compile(&self, request: ChildCompileRequest) -> Result<ChildCompilation, PluginError> {
        let path = if request.sw_src.is_absolute() {
            request.sw_src.clone()
        } else {
            request.context.join(&request.sw_src)
        };
        let source = tokio::fs::read(&path)
            .await
            .map_err(|e| PluginError::ChildCompilation {
                sw_src: path.display().to_string(),
                message: e.to_string(),
            })?;

        debug!(
            sw_src = %path.display(),
            sw_dest = %request.sw_dest,
            ignored_plugins = request.plugins.len(),
            "copied service worker source"
        );

        Ok(ChildCompilation {
            assets: vec![Asset::new(request.sw_dest.as_str(), source)],
            diagnostics: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_snapshot_with_inline_and_file_assets() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("app.css"), "body{}").await.unwrap();

        let json = serde_json::json!({
            "options": {
                "mode": "development",
                "context": dir.path(),
                "output": { "publicPath": "/static/" }
            },
            "assets": [
                { "name": "main.js", "source": "main", "info": { "immutable": true } },
                { "name": "app.css", "path": "app.css" }
            ],
            "chunks": [{ "id": "1", "name": "main", "files": ["main.js"] }],
            "chunkGroups": [{ "name": "main", "chunks": ["1"] }]
        });
        let compilation = CompilationSnapshot::from_json(&json.to_string())
            .unwrap()
            .load()
            .await
            .unwrap();

        assert_eq!(compilation.options().mode, crate::Mode::Development);
        assert!(compilation.asset("main.js").unwrap().info.immutable);
        assert_eq!(compilation.asset("app.css").unwrap().source, b"body{}");
        assert_eq!(
            compilation.chunk_files("main").unwrap(),
            vec![ArcStr::from("main.js")]
        );
    }

    #[tokio::test]
    async fn asset_without_contents_is_rejected() {
        let snapshot = CompilationSnapshot::from_json(r#"{"assets":[{"name":"a.js"}]}"#).unwrap();
        let err = snapshot.load().await.unwrap_err();
        assert!(err.to_string().contains("`a.js` needs either `source` or `path`"));
    }

    #[test]
    fn unknown_snapshot_keys_are_rejected() {
        assert!(CompilationSnapshot::from_json(r#"{"modules":[]}"#).is_err());
    }

    #[test]
    fn update_asset_keeps_info_unless_replaced() {
        let mut compilation = MemoryCompilation::default().with_asset(
            Asset::new("a.js", "a").with_info(AssetInfo {
                minimized: true,
                ..Default::default()
            }),
        );
        compilation.update_asset("a.js", b"b".to_vec(), None).unwrap();
        let asset = compilation.asset("a.js").unwrap();
        assert_eq!(asset.source, b"b");
        assert!(asset.info.minimized);
        assert!(compilation.update_asset("missing.js", Vec::new(), None).is_err());
    }
}
