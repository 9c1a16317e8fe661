//! Service worker generation.
//!
//! Generation is two steps. [`ServiceWorkerBuilder::render`] turns the
//! options and the final manifest into unbundled source, and
//! [`ServiceWorkerBuilder::bundle`] turns that into the files to emit. The
//! default [`TemplateBuilder`] renders an `upon` template and bundles by
//! attaching an optional runtime library and an optional source map.

use std::future::Future;

use serde::Serialize;
use serde_json::json;
use tracing::debug;
use upon::Engine;

use crate::config::Pattern;
use crate::inject::{serialize_manifest, QuoteStyle};
use crate::manifest::fingerprint;
use crate::{Mode, PluginError, PrecacheEntry};

// ---------------------------------------------------------------------------
// Builder seam
// ---------------------------------------------------------------------------

/// Everything the service-worker source depends on.
#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    pub manifest_entries: Vec<PrecacheEntry>,
    pub import_scripts: Vec<String>,
    pub skip_waiting: bool,
    pub clients_claim: bool,
    pub cache_id: Option<String>,
    pub cleanup_outdated_caches: bool,
    pub navigate_fallback: Option<String>,
    pub navigate_fallback_allowlist: Vec<Pattern>,
    pub navigate_fallback_denylist: Vec<Pattern>,
    pub directory_index: Option<String>,
    pub ignore_url_parameters_matching: Option<Vec<Pattern>>,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    /// Output name of the service worker, relative to the output path.
    pub sw_dest: String,
    pub unbundled_code: String,
    pub inline_workbox_runtime: bool,
    pub mode: Mode,
    pub sourcemap: bool,
}

/// One file produced by [`ServiceWorkerBuilder::bundle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub name: String,
    pub contents: Vec<u8>,
}

pub trait ServiceWorkerBuilder: Send + Sync {
    fn render(&self, config: &RenderConfig) -> Result<String, PluginError>;

    fn bundle(
        &self,
        request: BundleRequest,
    ) -> impl Future<Output = Result<Vec<GeneratedFile>, PluginError>> + Send;
}

// ---------------------------------------------------------------------------
// TemplateBuilder
// ---------------------------------------------------------------------------

pub const DEFAULT_TEMPLATE: &str = r#"/**
 * This service worker was generated by sw-precache.
 * Edits will be lost on the next build.
 */
{% if has_import_scripts %}importScripts({{ import_scripts }});
{% endif %}{% if debug %}workbox.setConfig({ debug: true });
{% endif %}{% if skip_waiting %}self.skipWaiting();
{% else %}self.addEventListener('message', (event) => {
  if (event.data && event.data.type === 'SKIP_WAITING') {
    self.skipWaiting();
  }
});
{% endif %}{% if clients_claim %}workbox.core.clientsClaim();
{% endif %}{% if has_cache_id %}workbox.core.setCacheNameDetails({ prefix: {{ cache_id }} });
{% endif %}workbox.precaching.precacheAndRoute({{ manifest }}, {{ precache_options }});
{% if cleanup_outdated_caches %}workbox.precaching.cleanupOutdatedCaches();
{% endif %}{% if has_navigate_fallback %}workbox.routing.registerRoute(new workbox.routing.NavigationRoute(workbox.precaching.createHandlerBoundToURL({{ navigate_fallback }}), {{ navigation_options }}));
{% endif %}"#;

/// Script that defines the `workbox` global the template calls into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLibrary {
    pub source: String,
}

impl RuntimeLibrary {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// `workbox-<first 8 hex of the fingerprint>.js`
    pub fn chunk_name(&self) -> String {
        format!("workbox-{}.js", &fingerprint(self.source.as_bytes())[..8])
    }
}

/// Default [`ServiceWorkerBuilder`].
///
/// Without a [`RuntimeLibrary`] the rendered script expects `workbox` to be
/// provided through `importScripts`.
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    template: String,
    runtime: Option<RuntimeLibrary>,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            runtime: None,
        }
    }
}

#[derive(Serialize)]
struct TemplateContext {
    has_import_scripts: bool,
    import_scripts: String,
    debug: bool,
    skip_waiting: bool,
    clients_claim: bool,
    has_cache_id: bool,
    cache_id: String,
    manifest: String,
    precache_options: String,
    cleanup_outdated_caches: bool,
    has_navigate_fallback: bool,
    navigate_fallback: String,
    navigation_options: String,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeLibrary) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn context(config: &RenderConfig) -> Result<TemplateContext, PluginError> {
        let import_scripts = config
            .import_scripts
            .iter()
            .map(|s| js_string(s))
            .collect::<Vec<_>>()
            .join(", ");

        let mut precache_options = Vec::new();
        if let Some(index) = &config.directory_index {
            precache_options.push(format!("directoryIndex: {}", js_string(index)));
        }
        if let Some(patterns) = &config.ignore_url_parameters_matching {
            precache_options.push(format!(
                "ignoreURLParametersMatching: {}",
                js_regex_array(patterns)
            ));
        }

        let mut navigation_options = Vec::new();
        if !config.navigate_fallback_allowlist.is_empty() {
            navigation_options.push(format!(
                "allowlist: {}",
                js_regex_array(&config.navigate_fallback_allowlist)
            ));
        }
        if !config.navigate_fallback_denylist.is_empty() {
            navigation_options.push(format!(
                "denylist: {}",
                js_regex_array(&config.navigate_fallback_denylist)
            ));
        }

        Ok(TemplateContext {
            has_import_scripts: !config.import_scripts.is_empty(),
            import_scripts,
            debug: config.mode == Mode::Development,
            skip_waiting: config.skip_waiting,
            clients_claim: config.clients_claim,
            has_cache_id: config.cache_id.is_some(),
            cache_id: config.cache_id.as_deref().map(js_string).unwrap_or_default(),
            manifest: serialize_manifest(&config.manifest_entries, QuoteStyle::Double)?,
            precache_options: js_object(&precache_options),
            cleanup_outdated_caches: config.cleanup_outdated_caches,
            has_navigate_fallback: config.navigate_fallback.is_some(),
            navigate_fallback: config
                .navigate_fallback
                .as_deref()
                .map(js_string)
                .unwrap_or_default(),
            navigation_options: js_object(&navigation_options),
        })
    }
}

impl ServiceWorkerBuilder for TemplateBuilder {
    fn render(&self, config: &RenderConfig) -> Result<String, PluginError> {
        let engine = Engine::new();
        let template = engine
            .compile(self.template.as_str())
            .map_err(|e| PluginError::Generation(format!("invalid template: {}", e)))?;
        template
            .render(&engine, Self::context(config)?)
            .to_string()
            .map_err(|e| PluginError::Generation(format!("failed to render template: {}", e)))
    }

    async fn bundle(&self, request: BundleRequest) -> Result<Vec<GeneratedFile>, PluginError> {
        let mut prefix = String::new();
        let mut extra = Vec::new();

        if let Some(runtime) = &self.runtime {
            if request.inline_workbox_runtime {
                prefix.push_str(&runtime.source);
                if !prefix.ends_with('\n') {
                    prefix.push('\n');
                }
            } else {
                let chunk = runtime.chunk_name();
                prefix.push_str(&format!("importScripts('./{}');\n", chunk));
                extra.push(GeneratedFile {
                    name: sibling_path(&request.sw_dest, &chunk),
                    contents: runtime.source.clone().into_bytes(),
                });
            }
        }

        let mut code = format!("{}{}", prefix, request.unbundled_code);
        if request.sourcemap {
            let map_name = format!("{}.map", request.sw_dest);
            let map = identity_source_map(&request.sw_dest, &prefix, &request.unbundled_code);
            if !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str(&format!("//# sourceMappingURL={}\n", file_name(&map_name)));
            extra.push(GeneratedFile {
                name: map_name,
                contents: map.into_bytes(),
            });
        }

        debug!(
            sw_dest = %request.sw_dest,
            files = extra.len() + 1,
            inline_runtime = request.inline_workbox_runtime,
            "bundled service worker"
        );

        let mut files = vec![GeneratedFile {
            name: request.sw_dest,
            contents: code.into_bytes(),
        }];
        files.extend(extra);
        Ok(files)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// `/source/` with unescaped `/` escaped.
fn js_regex(pattern: &Pattern) -> String {
    let mut out = String::from("/");
    let mut escaped = false;
    for c in pattern.as_str().chars() {
        if c == '/' && !escaped {
            out.push('\\');
        }
        escaped = c == '\\' && !escaped;
        out.push(c);
    }
    out.push('/');
    out
}

fn js_regex_array(patterns: &[Pattern]) -> String {
    let items: Vec<String> = patterns.iter().map(js_regex).collect();
    format!("[{}]", items.join(", "))
}

fn js_object(props: &[String]) -> String {
    if props.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", props.join(", "))
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn sibling_path(sw_dest: &str, name: &str) -> String {
    match sw_dest.rfind('/') {
        Some(idx) => format!("{}/{}", &sw_dest[..idx], name),
        None => name.to_string(),
    }
}

/// Maps every line of `code` to the same line of itself. Lines of `prefix`
/// stay unmapped.
fn identity_source_map(sw_dest: &str, prefix: &str, code: &str) -> String {
    let mut mappings = ";".repeat(prefix.matches('\n').count());
    for line in 0..code.lines().count() {
        mappings.push_str(if line == 0 { "AAAA" } else { ";AACA" });
    }
    json!({
        "version": 3,
        "file": file_name(sw_dest),
        "sources": [file_name(sw_dest)],
        "sourcesContent": [code],
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}
