//! The host-bundler seam.
//!
//! The plugins never talk to a concrete bundler. Everything they need from
//! the in-progress build goes through [`Compilation`] (assets, the chunk
//! graph, compiler options, the diagnostics sink) and, for InjectManifest's
//! `compileSrc` mode, through [`ChildCompiler`].
//!
//! [`MemoryCompilation`] and [`CopyChildCompiler`] are complete in-process
//! implementations used by the CLI, the Node binding and the tests.

mod memory;

pub use memory::{AssetSnapshot, CompilationSnapshot, CopyChildCompiler, MemoryCompilation};

use std::future::Future;
use std::path::PathBuf;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::{Diagnostic, DiagnosticCode, DiagnosticLevel, Mode, PluginError};

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Metadata the bundler attaches to an emitted asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetInfo {
    /// The file name already encodes the content (e.g. `[contenthash]`).
    pub immutable: bool,
    pub minimized: bool,
    pub development: bool,
    pub hot_module_replacement: bool,
    /// Content hashes embedded in the file name.
    pub content_hash: Vec<String>,
    pub source_filename: Option<String>,
}

impl AssetInfo {
    /// Whether the URL alone is enough to bust caches.
    pub fn is_content_addressed(&self) -> bool {
        self.immutable || !self.content_hash.is_empty()
    }
}

/// An emitted output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: ArcStr,
    pub source: Vec<u8>,
    pub info: AssetInfo,
}

impl Asset {
    pub fn new(name: impl Into<ArcStr>, source: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            info: AssetInfo::default(),
        }
    }

    pub fn with_info(mut self, info: AssetInfo) -> Self {
        self.info = info;
        self
    }

    pub fn size(&self) -> u64 {
        self.source.len() as u64
    }

    pub fn text(&self) -> Result<&str, PluginError> {
        std::str::from_utf8(&self.source).map_err(|_| PluginError::NonUtf8Asset(self.name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Chunk graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Chunk {
    pub id: ArcStr,
    pub name: Option<ArcStr>,
    pub files: Vec<ArcStr>,
    /// Files the chunk references without owning them (source maps, media).
    pub auxiliary_files: Vec<ArcStr>,
}

impl Chunk {
    pub fn all_files(&self) -> impl Iterator<Item = &ArcStr> {
        self.files.iter().chain(self.auxiliary_files.iter())
    }
}

/// A named group of chunks, e.g. an entry point together with the chunks
/// split off it synchronously.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkGroup {
    pub name: ArcStr,
    /// Chunk ids, see [`Chunk::id`].
    pub chunks: Vec<ArcStr>,
}

// ---------------------------------------------------------------------------
// Compiler options
// ---------------------------------------------------------------------------

/// `output.publicPath`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PublicPath {
    /// Resolved at runtime; URLs stay relative to the service worker.
    Auto,
    Path(String),
}

impl Default for PublicPath {
    fn default() -> Self {
        Self::Path(String::new())
    }
}

impl From<String> for PublicPath {
    fn from(value: String) -> Self {
        if value == "auto" {
            Self::Auto
        } else {
            Self::Path(value)
        }
    }
}

impl From<PublicPath> for String {
    fn from(value: PublicPath) -> Self {
        match value {
            PublicPath::Auto => "auto".to_string(),
            PublicPath::Path(path) => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputOptions {
    pub path: PathBuf,
    pub public_path: PublicPath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerOptions {
    pub mode: Mode,
    /// `devtool`; `None` when source maps are disabled.
    pub devtool: Option<String>,
    /// `optimization.minimize`.
    pub minimize: bool,
    /// Directory relative `swSrc` paths are resolved against.
    pub context: PathBuf,
    pub output: OutputOptions,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Read/write view of an in-progress compilation.
pub trait Compilation {
    fn options(&self) -> &CompilerOptions;

    /// All emitted assets.
    fn assets(&self) -> Vec<&Asset>;

    fn asset(&self, name: &str) -> Option<&Asset>;

    fn named_chunk_group(&self, name: &str) -> Option<&ChunkGroup>;

    fn named_chunk(&self, name: &str) -> Option<&Chunk>;

    fn chunk(&self, id: &str) -> Option<&Chunk>;

    /// Emits a new asset, replacing any asset of the same name.
    fn emit_asset(&mut self, asset: Asset);

    /// Replaces the content of an emitted asset. `info` of `None` keeps the
    /// existing metadata.
    fn update_asset(
        &mut self,
        name: &str,
        source: Vec<u8>,
        info: Option<AssetInfo>,
    ) -> Result<(), PluginError>;

    /// Registers a file the next watch-mode rebuild should react to.
    fn add_file_dependency(&mut self, path: PathBuf);

    fn diagnostics(&self) -> &[Diagnostic];

    fn push_diagnostic(&mut self, diagnostic: Diagnostic);

    fn push_warning(&mut self, diagnostic: Diagnostic) {
        self.push_diagnostic(Diagnostic {
            level: DiagnosticLevel::Warning,
            ..diagnostic
        });
    }

    fn push_error(&mut self, diagnostic: Diagnostic) {
        self.push_diagnostic(Diagnostic {
            level: DiagnosticLevel::Error,
            ..diagnostic
        });
    }

    /// Whether a diagnostic with this code and context was already recorded.
    fn has_diagnostic(&self, code: DiagnosticCode, context: Option<&str>) -> bool {
        self.diagnostics()
            .iter()
            .any(|d| d.code == Some(code) && d.context.as_deref() == context)
    }

    /// Files of a chunk group, or of a single named chunk when no group has
    /// that name. `None` when neither exists.
    fn chunk_files(&self, name: &str) -> Option<Vec<ArcStr>> {
        if let Some(group) = self.named_chunk_group(name) {
            let files = group
                .chunks
                .iter()
                .filter_map(|id| self.chunk(id))
                .flat_map(|chunk| chunk.all_files().cloned())
                .collect();
            return Some(files);
        }
        self.named_chunk(name)
            .map(|chunk| chunk.all_files().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Child compilation
// ---------------------------------------------------------------------------

/// Request to build `swSrc` as an extra entry with the host's loaders.
#[derive(Debug, Clone)]
pub struct ChildCompileRequest {
    /// Name of the requesting plugin.
    pub name: &'static str,
    pub context: PathBuf,
    pub sw_src: PathBuf,
    /// Output file name of the compiled entry.
    pub sw_dest: String,
    pub mode: Mode,
    /// Opaque plugin descriptors applied to the child compiler only.
    pub plugins: Vec<serde_json::Value>,
}

/// Result of a child compilation. Assets are emitted into the parent and
/// diagnostics are forwarded to it.
#[derive(Debug, Clone, Default)]
pub struct ChildCompilation {
    pub assets: Vec<Asset>,
    pub diagnostics: Vec<Diagnostic>,
}

pub trait ChildCompiler: Send + Sync {
    fn compile(
        &self,
        request: ChildCompileRequest,
    ) -> impl Future<Output = Result<ChildCompilation, PluginError>> + Send;
}
