//! # sw-precache
//!
//! Bundler plugins that compute a precache manifest from a finished
//! compilation and either generate a service worker around it
//! ([`GenerateSw`]) or splice it into a developer-supplied one
//! ([`InjectManifest`]).
//!
//! The host bundler is reached only through the [`Compilation`] and
//! [`ChildCompiler`] traits. Manifest data is recomputed from scratch on
//! every invocation; the only state carried between builds is the
//! repeated-invocation bookkeeping and the shared
//! [`GeneratedAssetRegistry`].

pub mod compilation;
pub mod config;
pub mod generate;
pub mod inject;
pub mod manifest;
pub mod plugin;
pub mod source_map;
pub mod utils;

#[cfg(feature = "napi")]
pub mod binding;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use compilation::{
    Asset, AssetInfo, AssetSnapshot, ChildCompilation, ChildCompileRequest, ChildCompiler, Chunk,
    ChunkGroup, Compilation, CompilationSnapshot, CompilerOptions, CopyChildCompiler,
    MemoryCompilation, PublicPath,
};
pub use config::{
    AdditionalEntry, AssetFilter, AssetFlag, FilterContext, GenerateSwConfig,
    InjectManifestConfig, ManifestOptions, Pattern,
};
pub use generate::{
    BundleRequest, GeneratedFile, RenderConfig, RuntimeLibrary, ServiceWorkerBuilder,
    TemplateBuilder,
};
pub use inject::{
    find_injection_point, inject_manifest, serialize_manifest, splice_manifest, Injection,
    InjectionTarget, QuoteStyle,
};
pub use manifest::transform::{ManifestTransform, TransformOutput};
pub use manifest::{build_manifest, extract};
pub use plugin::generate_sw::GenerateSw;
pub use plugin::inject_manifest::InjectManifest;
pub use plugin::registry::GeneratedAssetRegistry;
pub use plugin::InvocationState;
pub use source_map::SourceMapError;

// ---------------------------------------------------------------------------
// Build Mode
// ---------------------------------------------------------------------------

/// The compiler mode. Decides whether generated assets are flagged as
/// minimized and is forwarded to the service-worker builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
    None,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic recorded on a compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    /// Stable key for deduplication and filtering. Diagnostics coming from
    /// user transforms or child compilations carry no code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<DiagnosticCode>,
    /// Which plugin instance raised it, usually the `swDest`.
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    Configuration,
    MissingInjectionPoint,
    MultipleInjectionPoints,
    ChunkNotFound,
    NoChunkScripts,
    FileTooLarge,
    UnrevisionedEntry,
    DuplicateEntry,
    RepeatedInvocation,
    IgnoredCompilationPlugins,
    Transform,
    MissingAsset,
    SourceMap,
    Generation,
    ChildCompilation,
    Io,
    Summary,
}

impl Diagnostic {
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            code: Some(code),
            context: None,
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            code: Some(code),
            context: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            message: message.into(),
            code: Some(DiagnosticCode::Summary),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Precache entries
// ---------------------------------------------------------------------------

/// Where a precache entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntrySource {
    /// Derived from the named compilation asset.
    Asset(ArcStr),
    /// Supplied verbatim through `additionalManifestEntries`.
    #[default]
    Additional,
}

/// One precache manifest entry.
///
/// Serializes with its keys in sorted order (`integrity`, `revision`,
/// `url`); `size` and `source` never reach the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    pub revision: Option<String>,
    pub url: String,
    #[serde(skip)]
    pub size: u64,
    #[serde(skip)]
    pub source: EntrySource,
}

impl PrecacheEntry {
    pub fn new(url: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            integrity: None,
            revision,
            url: url.into(),
            size: 0,
            source: EntrySource::Additional,
        }
    }

    pub fn is_from_asset(&self) -> bool {
        matches!(self.source, EntrySource::Asset(_))
    }
}

/// The manifest computed for one compilation.
#[derive(Debug, Clone, Default)]
pub struct ManifestResult {
    /// Sorted by `url`, ties broken by `revision`.
    pub entries: Vec<PrecacheEntry>,
    pub total_size: u64,
    pub warnings: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// PluginError
// ---------------------------------------------------------------------------

/// Errors that abort a plugin invocation. Hook-level entry points record
/// these on the compilation instead of returning them.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Please check your {plugin} plugin configuration:\n{message}")]
    Configuration { plugin: &'static str, message: String },

    #[error("Can't find {marker} in your SW source.")]
    MissingInjectionPoint { marker: String },

    #[error(
        "Multiple instances of {marker} were found in your SW source ({count} matches). Include it only once."
    )]
    MultipleInjectionPoints { marker: String, count: usize },

    #[error("Manifest transform at index {index} failed: {source}")]
    Transform {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Manifest transforms produced the URL `{url}` more than once with different revisions")]
    DuplicateUrl { url: String },

    #[error("Asset `{0}` was not found in the compilation")]
    MissingAsset(String),

    #[error("Asset `{0}` is not valid UTF-8 and cannot receive a manifest")]
    NonUtf8Asset(String),

    #[error("Failed to update the source map `{asset}`: {source}")]
    SourceMap {
        asset: String,
        #[source]
        source: SourceMapError,
    },

    #[error("Service worker generation failed: {0}")]
    Generation(String),

    #[error("Child compilation of `{sw_src}` failed: {message}")]
    ChildCompilation { sw_src: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::Configuration { .. } => DiagnosticCode::Configuration,
            Self::MissingInjectionPoint { .. } => DiagnosticCode::MissingInjectionPoint,
            Self::MultipleInjectionPoints { .. } => DiagnosticCode::MultipleInjectionPoints,
            Self::Transform { .. } | Self::DuplicateUrl { .. } => DiagnosticCode::Transform,
            Self::MissingAsset(_) | Self::NonUtf8Asset(_) => DiagnosticCode::MissingAsset,
            Self::SourceMap { .. } => DiagnosticCode::SourceMap,
            Self::Generation(_) => DiagnosticCode::Generation,
            Self::ChildCompilation { .. } => DiagnosticCode::ChildCompilation,
            Self::Io(_) => DiagnosticCode::Io,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code(), self.to_string())
    }
}
