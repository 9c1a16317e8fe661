//! GenerateSW: emits a complete service worker that precaches the
//! compilation's assets.

use std::fmt;

use tracing::{debug, instrument};

use super::registry::GeneratedAssetRegistry;
use super::{note_invocation, report_error, report_manifest, InvocationState, InvocationTracker};
use crate::compilation::{Asset, AssetInfo, Compilation};
use crate::config::GenerateSwConfig;
use crate::generate::{BundleRequest, RenderConfig, ServiceWorkerBuilder, TemplateBuilder};
use crate::manifest::build_manifest;
use crate::utils::{relative_to_output_path, resolve_url};
use crate::{Diagnostic, DiagnosticCode, Mode, PluginError};

pub struct GenerateSw<B = TemplateBuilder> {
    config: GenerateSwConfig,
    registry: GeneratedAssetRegistry,
    builder: B,
    invocation: InvocationTracker,
}

impl<B> fmt::Debug for GenerateSw<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateSw")
            .field("config", &self.config)
            .field("invocation", &self.invocation.state())
            .finish()
    }
}

impl GenerateSw<TemplateBuilder> {
    pub fn new(config: GenerateSwConfig, registry: GeneratedAssetRegistry) -> Self {
        Self::with_builder(config, registry, TemplateBuilder::default())
    }
}

impl<B: ServiceWorkerBuilder> GenerateSw<B> {
    pub const NAME: &'static str = GenerateSwConfig::PLUGIN;

    pub fn with_builder(config: GenerateSwConfig, registry: GeneratedAssetRegistry, builder: B) -> Self {
        Self {
            config,
            registry,
            builder,
            invocation: InvocationTracker::default(),
        }
    }

    pub fn config(&self) -> &GenerateSwConfig {
        &self.config
    }

    pub fn registry(&self) -> &GeneratedAssetRegistry {
        &self.registry
    }

    pub fn invocation_state(&self) -> InvocationState {
        self.invocation.state()
    }

    fn sw_dest(&self, compilation: &dyn Compilation) -> String {
        relative_to_output_path(&compilation.options().output.path, &self.config.sw_dest)
    }

    /// Asset-processing hook. Failures are recorded on the compilation.
    #[instrument(skip_all, fields(plugin = "GenerateSW"))]
    pub async fn process_assets(&self, compilation: &mut dyn Compilation) {
        if let Err(error) = self.generate(compilation).await {
            let sw_dest = self.sw_dest(compilation);
            report_error(compilation, Self::NAME, Some(&sw_dest), error);
        }
    }

    /// Build the manifest, render and bundle the service worker, and emit
    /// every resulting file.
    pub async fn generate(&self, compilation: &mut dyn Compilation) -> Result<(), PluginError> {
        self.config.validate()?;
        let sw_dest = self.sw_dest(compilation);
        note_invocation(&self.invocation, compilation, Self::NAME, &sw_dest);

        let mut options = self.config.to_manifest_options(&sw_dest);
        let mut import_scripts = self.config.import_scripts.clone();
        if !self.config.import_scripts_via_chunks.is_empty() {
            let chunks = &self.config.import_scripts_via_chunks;
            options.exclude_chunks.extend(chunks.iter().cloned());
            for script in script_files_for_chunks(compilation, chunks, &sw_dest) {
                if !import_scripts.contains(&script) {
                    import_scripts.push(script);
                }
            }
        }

        let manifest = build_manifest(&*compilation, &options, &self.registry)?;

        let mode = self.config.mode.unwrap_or(compilation.options().mode);
        let render = RenderConfig {
            manifest_entries: manifest.entries.clone(),
            import_scripts,
            skip_waiting: self.config.skip_waiting,
            clients_claim: self.config.clients_claim,
            cache_id: self.config.cache_id.clone(),
            cleanup_outdated_caches: self.config.cleanup_outdated_caches,
            navigate_fallback: self.config.navigate_fallback.clone(),
            navigate_fallback_allowlist: self.config.navigate_fallback_allowlist.clone(),
            navigate_fallback_denylist: self.config.navigate_fallback_denylist.clone(),
            directory_index: self.config.directory_index.clone(),
            ignore_url_parameters_matching: self.config.ignore_url_parameters_matching.clone(),
            mode,
        };
        let unbundled_code = self.builder.render(&render)?;

        let request = BundleRequest {
            sw_dest: sw_dest.clone(),
            unbundled_code,
            inline_workbox_runtime: self.config.inline_workbox_runtime,
            mode,
            sourcemap: self
                .config
                .sourcemap
                .unwrap_or(compilation.options().devtool.is_some()),
        };
        let files = self.builder.bundle(request).await?;

        for file in files {
            debug!(asset = %file.name, size = file.contents.len(), "emitting generated file");
            self.registry.insert(file.name.as_str());
            let info = AssetInfo {
                minimized: mode == Mode::Production,
                ..Default::default()
            };
            compilation.emit_asset(Asset::new(file.name.as_str(), file.contents).with_info(info));
        }

        report_manifest(compilation, Self::NAME, &sw_dest, manifest);
        Ok(())
    }
}

/// Public URLs of the `.js` files of the named chunks, for `importScripts()`.
fn script_files_for_chunks(
    compilation: &mut dyn Compilation,
    chunk_names: &[String],
    sw_dest: &str,
) -> Vec<String> {
    let public_path = compilation.options().output.public_path.clone();
    let mut scripts: Vec<String> = Vec::new();
    let mut warnings = Vec::new();

    for name in chunk_names {
        match compilation.named_chunk(name) {
            Some(chunk) => {
                for file in chunk.files.iter().filter(|f| f.ends_with(".js")) {
                    let url = resolve_url(&public_path, file);
                    if !scripts.contains(&url) {
                        scripts.push(url);
                    }
                }
            }
            None => warnings.push(Diagnostic::warning(
                DiagnosticCode::ChunkNotFound,
                format!(
                    "{} was provided to importScriptsViaChunks, but didn't match any named chunks.",
                    name
                ),
            )),
        }
    }

    if scripts.is_empty() {
        warnings.push(Diagnostic::warning(
            DiagnosticCode::NoChunkScripts,
            format!(
                "There were no assets matching importScriptsViaChunks: [{}].",
                chunk_names.join(" ")
            ),
        ));
    }

    for warning in warnings {
        compilation.push_warning(warning.with_context(sw_dest));
    }
    scripts
}
