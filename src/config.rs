//! Plugin configuration.
//!
//! Both plugin configs deserialize from the same camelCase JSON surface the
//! JavaScript plugins accept. Unknown keys and type mismatches are
//! configuration errors. Options that can only be code (custom predicates,
//! manifest transforms) are set through builder methods.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::compilation::{Asset, Compilation};
use crate::manifest::transform::ManifestTransform;
use crate::{Mode, PluginError, PrecacheEntry};

pub const DEFAULT_INJECTION_POINT: &str = "self.__WB_MANIFEST";
pub const DEFAULT_GENERATE_SW_DEST: &str = "service-worker.js";
pub const DEFAULT_MAXIMUM_FILE_SIZE: u64 = 2 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// A regular expression option.
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.0.as_str())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

// ---------------------------------------------------------------------------
// Asset filters
// ---------------------------------------------------------------------------

/// Metadata flags an [`AssetFilter::Flag`] can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetFlag {
    Immutable,
    Minimized,
    Development,
    HotModuleReplacement,
}

/// What a custom predicate gets to look at.
pub struct FilterContext<'a> {
    pub asset: &'a Asset,
    pub compilation: &'a dyn Compilation,
}

pub type AssetPredicate = dyn Fn(&FilterContext<'_>) -> bool + Send + Sync;

/// One `include`/`exclude` condition.
#[derive(Clone, Deserialize)]
#[serde(try_from = "RawFilter")]
pub enum AssetFilter {
    /// Asset name starts with the literal.
    Prefix(String),
    /// Asset name matches the expression.
    Pattern(Pattern),
    Flag(AssetFlag),
    Custom(Arc<AssetPredicate>),
}

impl AssetFilter {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Pattern::new(pattern).map(Self::Pattern)
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&FilterContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, ctx: &FilterContext<'_>) -> bool {
        match self {
            Self::Prefix(prefix) => ctx.asset.name.starts_with(prefix.as_str()),
            Self::Pattern(pattern) => pattern.is_match(&ctx.asset.name),
            Self::Flag(flag) => {
                let info = &ctx.asset.info;
                match flag {
                    AssetFlag::Immutable => info.immutable,
                    AssetFlag::Minimized => info.minimized,
                    AssetFlag::Development => info.development,
                    AssetFlag::HotModuleReplacement => info.hot_module_replacement,
                }
            }
            Self::Custom(predicate) => predicate(ctx),
        }
    }
}

impl fmt::Debug for AssetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(pattern).finish(),
            Self::Flag(flag) => f.debug_tuple("Flag").field(flag).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFilter {
    Prefix(String),
    Regex { regex: String },
    Flag { flag: AssetFlag },
}

impl TryFrom<RawFilter> for AssetFilter {
    type Error = regex::Error;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawFilter::Prefix(prefix) => Self::Prefix(prefix),
            RawFilter::Regex { regex } => Self::Pattern(Pattern::new(&regex)?),
            RawFilter::Flag { flag } => Self::Flag(flag),
        })
    }
}

/// `[/\.map$/, /^manifest.*\.js$/]`
pub fn default_exclude() -> Vec<AssetFilter> {
    [r"\.map$", r"^manifest.*\.js$"]
        .into_iter()
        .map(|p| AssetFilter::pattern(p).expect("default exclude patterns are valid"))
        .collect()
}

// ---------------------------------------------------------------------------
// Additional entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AdditionalEntry {
    /// A bare URL; precached without revision info.
    Url(String),
    Entry {
        url: String,
        #[serde(default)]
        revision: Option<String>,
        #[serde(default)]
        integrity: Option<String>,
    },
}

impl AdditionalEntry {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Entry { url, .. } => url,
        }
    }

    pub fn to_entry(&self) -> PrecacheEntry {
        match self {
            Self::Url(url) => PrecacheEntry::new(url.clone(), None),
            Self::Entry {
                url,
                revision,
                integrity,
            } => PrecacheEntry {
                integrity: integrity.clone(),
                ..PrecacheEntry::new(url.clone(), revision.clone())
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ManifestOptions
// ---------------------------------------------------------------------------

/// The manifest-related subset of either plugin's config.
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub sw_dest: Option<String>,
    /// `None` includes everything that survives `exclude`.
    pub include: Option<Vec<AssetFilter>>,
    pub exclude: Vec<AssetFilter>,
    /// `None` disables the chunk allowlist.
    pub chunks: Option<Vec<String>>,
    pub exclude_chunks: Vec<String>,
    pub additional_manifest_entries: Vec<AdditionalEntry>,
    pub maximum_file_size_to_cache_in_bytes: u64,
    pub dont_cache_bust_urls_matching: Option<Pattern>,
    pub modify_url_prefix: BTreeMap<String, String>,
    pub manifest_transforms: Vec<Arc<dyn ManifestTransform>>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            sw_dest: None,
            include: None,
            exclude: default_exclude(),
            chunks: None,
            exclude_chunks: Vec::new(),
            additional_manifest_entries: Vec::new(),
            maximum_file_size_to_cache_in_bytes: DEFAULT_MAXIMUM_FILE_SIZE,
            dont_cache_bust_urls_matching: None,
            modify_url_prefix: BTreeMap::new(),
            manifest_transforms: Vec::new(),
        }
    }
}

impl ManifestOptions {
    pub fn new(sw_dest: impl Into<String>) -> Self {
        Self {
            sw_dest: Some(sw_dest.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Shared builder methods
// ---------------------------------------------------------------------------

macro_rules! manifest_builders {
    ($ty:ty) => {
        impl $ty {
            pub fn with_include(mut self, include: Vec<AssetFilter>) -> Self {
                self.include = Some(include);
                self
            }

            pub fn with_exclude(mut self, exclude: Vec<AssetFilter>) -> Self {
                self.exclude = exclude;
                self
            }

            pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
                self.chunks = Some(chunks.iter().map(|c| c.to_string()).collect());
                self
            }

            pub fn with_exclude_chunks(mut self, chunks: &[&str]) -> Self {
                self.exclude_chunks = chunks.iter().map(|c| c.to_string()).collect();
                self
            }

            pub fn with_additional_entry(mut self, entry: AdditionalEntry) -> Self {
                self.additional_manifest_entries.push(entry);
                self
            }

            pub fn with_maximum_file_size(mut self, bytes: u64) -> Self {
                self.maximum_file_size_to_cache_in_bytes = bytes;
                self
            }

            pub fn with_transform(mut self, transform: impl ManifestTransform + 'static) -> Self {
                self.manifest_transforms.push(Arc::new(transform));
                self
            }

            fn manifest_options(&self, sw_dest: &str) -> ManifestOptions {
                ManifestOptions {
                    sw_dest: Some(sw_dest.to_string()),
                    include: self.include.clone(),
                    exclude: self.exclude.clone(),
                    chunks: self.chunks.clone(),
                    exclude_chunks: self.exclude_chunks.clone(),
                    additional_manifest_entries: self.additional_manifest_entries.clone(),
                    maximum_file_size_to_cache_in_bytes: self.maximum_file_size_to_cache_in_bytes,
                    dont_cache_bust_urls_matching: self.dont_cache_bust_urls_matching.clone(),
                    modify_url_prefix: self.modify_url_prefix.clone(),
                    manifest_transforms: self.manifest_transforms.clone(),
                }
            }

            fn validate_manifest_options(&self) -> Result<(), String> {
                let named = self.chunks.iter().flatten().chain(self.exclude_chunks.iter());
                if named.clone().any(|c| c.trim().is_empty()) {
                    return Err("chunk names in 'chunks' and 'excludeChunks' must not be empty".into());
                }
                if self.maximum_file_size_to_cache_in_bytes == 0 {
                    return Err("'maximumFileSizeToCacheInBytes' must be greater than 0".into());
                }
                if self.additional_manifest_entries.iter().any(|e| e.url().is_empty()) {
                    return Err("'additionalManifestEntries' must not contain empty URLs".into());
                }
                Ok(())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// InjectManifestConfig
// ---------------------------------------------------------------------------

fn default_injection_point() -> String {
    DEFAULT_INJECTION_POINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_maximum_file_size() -> u64 {
    DEFAULT_MAXIMUM_FILE_SIZE
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InjectManifestConfig {
    /// Service worker source. Required.
    #[serde(default)]
    pub sw_src: Option<PathBuf>,
    /// Defaults to the `swSrc` file stem with a `.js` extension.
    #[serde(default)]
    pub sw_dest: Option<String>,
    #[serde(default = "default_injection_point")]
    pub injection_point: String,
    /// Build `swSrc` through a child compilation instead of copying it.
    #[serde(default = "default_true")]
    pub compile_src: bool,
    #[serde(default)]
    pub webpack_compilation_plugins: Vec<serde_json::Value>,
    #[serde(default)]
    pub mode: Option<Mode>,

    #[serde(default)]
    pub include: Option<Vec<AssetFilter>>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<AssetFilter>,
    #[serde(default)]
    pub chunks: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_chunks: Vec<String>,
    #[serde(default)]
    pub additional_manifest_entries: Vec<AdditionalEntry>,
    #[serde(default = "default_maximum_file_size")]
    pub maximum_file_size_to_cache_in_bytes: u64,
    #[serde(default, rename = "dontCacheBustURLsMatching")]
    pub dont_cache_bust_urls_matching: Option<Pattern>,
    #[serde(default, rename = "modifyURLPrefix")]
    pub modify_url_prefix: BTreeMap<String, String>,
    #[serde(skip)]
    pub manifest_transforms: Vec<Arc<dyn ManifestTransform>>,
}

manifest_builders!(InjectManifestConfig);

impl InjectManifestConfig {
    pub const PLUGIN: &'static str = "InjectManifest";

    pub fn new(sw_src: impl Into<PathBuf>) -> Self {
        Self {
            sw_src: Some(sw_src.into()),
            sw_dest: None,
            injection_point: default_injection_point(),
            compile_src: true,
            webpack_compilation_plugins: Vec::new(),
            mode: None,
            include: None,
            exclude: default_exclude(),
            chunks: None,
            exclude_chunks: Vec::new(),
            additional_manifest_entries: Vec::new(),
            maximum_file_size_to_cache_in_bytes: DEFAULT_MAXIMUM_FILE_SIZE,
            dont_cache_bust_urls_matching: None,
            modify_url_prefix: BTreeMap::new(),
            manifest_transforms: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        serde_json::from_str(json).map_err(|e| configuration_error(Self::PLUGIN, e))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, PluginError> {
        serde_json::from_value(value).map_err(|e| configuration_error(Self::PLUGIN, e))
    }

    pub fn with_sw_dest(mut self, sw_dest: impl Into<String>) -> Self {
        self.sw_dest = Some(sw_dest.into());
        self
    }

    pub fn with_injection_point(mut self, marker: impl Into<String>) -> Self {
        self.injection_point = marker.into();
        self
    }

    pub fn with_compile_src(mut self, compile_src: bool) -> Self {
        self.compile_src = compile_src;
        self
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        let fail = |message: &str| configuration_error(Self::PLUGIN, message);

        match &self.sw_src {
            None => return Err(fail("'swSrc' is required")),
            Some(src) if src.as_os_str().is_empty() => return Err(fail("'swSrc' must not be empty")),
            _ => {}
        }
        if self.sw_dest.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(fail("'swDest' must not be empty"));
        }
        if self.injection_point.is_empty() {
            return Err(fail("'injectionPoint' must not be empty"));
        }
        if self.injection_point.contains(['\n', '\r']) {
            return Err(fail("'injectionPoint' must not contain line breaks"));
        }
        self.validate_manifest_options().map_err(|m| fail(m.as_str()))
    }

    /// `swDest`, or `swSrc`'s stem with a `.js` extension.
    pub fn resolved_sw_dest(&self) -> Option<String> {
        if let Some(dest) = &self.sw_dest {
            return Some(dest.clone());
        }
        let stem = self.sw_src.as_deref().and_then(Path::file_stem)?;
        Some(format!("{}.js", stem.to_string_lossy()))
    }

    pub(crate) fn to_manifest_options(&self, sw_dest: &str) -> ManifestOptions {
        self.manifest_options(sw_dest)
    }
}

// ---------------------------------------------------------------------------
// GenerateSwConfig
// ---------------------------------------------------------------------------

fn default_generate_sw_dest() -> String {
    DEFAULT_GENERATE_SW_DEST.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateSwConfig {
    #[serde(default = "default_generate_sw_dest")]
    pub sw_dest: String,
    #[serde(default)]
    pub import_scripts: Vec<String>,
    /// Chunks whose scripts are loaded with `importScripts()` instead of
    /// being precached.
    #[serde(default)]
    pub import_scripts_via_chunks: Vec<String>,
    #[serde(default)]
    pub skip_waiting: bool,
    #[serde(default)]
    pub clients_claim: bool,
    #[serde(default)]
    pub cache_id: Option<String>,
    #[serde(default)]
    pub cleanup_outdated_caches: bool,
    #[serde(default)]
    pub navigate_fallback: Option<String>,
    #[serde(default)]
    pub navigate_fallback_allowlist: Vec<Pattern>,
    #[serde(default)]
    pub navigate_fallback_denylist: Vec<Pattern>,
    #[serde(default)]
    pub directory_index: Option<String>,
    #[serde(default, rename = "ignoreURLParametersMatching")]
    pub ignore_url_parameters_matching: Option<Vec<Pattern>>,
    #[serde(default)]
    pub inline_workbox_runtime: bool,
    /// Defaults to whether the compiler has a `devtool`.
    #[serde(default)]
    pub sourcemap: Option<bool>,
    #[serde(default)]
    pub mode: Option<Mode>,

    #[serde(default)]
    pub include: Option<Vec<AssetFilter>>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<AssetFilter>,
    #[serde(default)]
    pub chunks: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_chunks: Vec<String>,
    #[serde(default)]
    pub additional_manifest_entries: Vec<AdditionalEntry>,
    #[serde(default = "default_maximum_file_size")]
    pub maximum_file_size_to_cache_in_bytes: u64,
    #[serde(default, rename = "dontCacheBustURLsMatching")]
    pub dont_cache_bust_urls_matching: Option<Pattern>,
    #[serde(default, rename = "modifyURLPrefix")]
    pub modify_url_prefix: BTreeMap<String, String>,
    #[serde(skip)]
    pub manifest_transforms: Vec<Arc<dyn ManifestTransform>>,
}

manifest_builders!(GenerateSwConfig);

impl Default for GenerateSwConfig {
    fn default() -> Self {
        Self {
            sw_dest: default_generate_sw_dest(),
            import_scripts: Vec::new(),
            import_scripts_via_chunks: Vec::new(),
            skip_waiting: false,
            clients_claim: false,
            cache_id: None,
            cleanup_outdated_caches: false,
            navigate_fallback: None,
            navigate_fallback_allowlist: Vec::new(),
            navigate_fallback_denylist: Vec::new(),
            directory_index: None,
            ignore_url_parameters_matching: None,
            inline_workbox_runtime: false,
            sourcemap: None,
            mode: None,
            include: None,
            exclude: default_exclude(),
            chunks: None,
            exclude_chunks: Vec::new(),
            additional_manifest_entries: Vec::new(),
            maximum_file_size_to_cache_in_bytes: DEFAULT_MAXIMUM_FILE_SIZE,
            dont_cache_bust_urls_matching: None,
            modify_url_prefix: BTreeMap::new(),
            manifest_transforms: Vec::new(),
        }
    }
}

impl GenerateSwConfig {
    pub const PLUGIN: &'static str = "GenerateSW";

    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        serde_json::from_str(json).map_err(|e| configuration_error(Self::PLUGIN, e))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, PluginError> {
        serde_json::from_value(value).map_err(|e| configuration_error(Self::PLUGIN, e))
    }

    pub fn with_sw_dest(mut self, sw_dest: impl Into<String>) -> Self {
        self.sw_dest = sw_dest.into();
        self
    }

    pub fn with_import_scripts_via_chunks(mut self, chunks: &[&str]) -> Self {
        self.import_scripts_via_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        let fail = |message: &str| configuration_error(Self::PLUGIN, message);

        if self.sw_dest.trim().is_empty() {
            return Err(fail("'swDest' must not be empty"));
        }
        if !self.sw_dest.ends_with(".js") {
            return Err(fail("'swDest' must end with '.js'"));
        }
        if self.import_scripts_via_chunks.iter().any(|c| c.trim().is_empty()) {
            return Err(fail("chunk names in 'importScriptsViaChunks' must not be empty"));
        }
        self.validate_manifest_options().map_err(|m| fail(m.as_str()))
    }

    pub(crate) fn to_manifest_options(&self, sw_dest: &str) -> ManifestOptions {
        self.manifest_options(sw_dest)
    }
}

fn configuration_error(plugin: &'static str, message: impl fmt::Display) -> PluginError {
    PluginError::Configuration {
        plugin,
        message: message.to_string(),
    }
}
