//! InjectManifest: splices the precache manifest into `swSrc`.
//!
//! Runs in two stages:
//! - `make`: registers `swDest`, then child-compiles or copies `swSrc`
//!   into the compilation under that name
//! - `process_assets`: builds the manifest and replaces the injection
//!   point in the `swDest` asset, keeping its source map in step

use std::fmt;

use tracing::{debug, instrument};

use super::registry::GeneratedAssetRegistry;
use super::{absolute, note_invocation, report_error, report_manifest, InvocationState, InvocationTracker};
use crate::compilation::{Asset, ChildCompileRequest, ChildCompiler, Compilation};
use crate::config::InjectManifestConfig;
use crate::inject::{find_injection_point, inject_manifest, InjectionTarget, QuoteStyle};
use crate::manifest::build_manifest;
use crate::utils::{relative_to_output_path, resolve_sibling, source_mapping_url};
use crate::{Diagnostic, DiagnosticCode, PluginError};

pub struct InjectManifest {
    config: InjectManifestConfig,
    registry: GeneratedAssetRegistry,
    invocation: InvocationTracker,
}

impl fmt::Debug for InjectManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectManifest")
            .field("config", &self.config)
            .field("invocation", &self.invocation.state())
            .finish()
    }
}

impl InjectManifest {
    pub const NAME: &'static str = InjectManifestConfig::PLUGIN;

    pub fn new(config: InjectManifestConfig, registry: GeneratedAssetRegistry) -> Self {
        Self {
            config,
            registry,
            invocation: InvocationTracker::default(),
        }
    }

    pub fn config(&self) -> &InjectManifestConfig {
        &self.config
    }

    pub fn registry(&self) -> &GeneratedAssetRegistry {
        &self.registry
    }

    pub fn invocation_state(&self) -> InvocationState {
        self.invocation.state()
    }

    /// `swDest` relative to the output path.
    fn sw_dest(&self, compilation: &dyn Compilation) -> Result<String, PluginError> {
        let dest = self
            .config
            .resolved_sw_dest()
            .ok_or_else(|| PluginError::Configuration {
                plugin: Self::NAME,
                message: "'swSrc' is required".to_string(),
            })?;
        Ok(relative_to_output_path(&compilation.options().output.path, &dest))
    }

    fn error_context(&self, compilation: &dyn Compilation) -> Option<String> {
        self.sw_dest(compilation).ok()
    }

    // -----------------------------------------------------------------------
    // make
    // -----------------------------------------------------------------------

    /// Make-stage hook. Failures are recorded on the compilation.
    #[instrument(skip_all, fields(plugin = "InjectManifest"))]
    pub async fn handle_make<C: ChildCompiler>(&self, compilation: &mut dyn Compilation, child: &C) {
        if let Err(error) = self.make(compilation, child).await {
            let context = self.error_context(compilation);
            report_error(compilation, Self::NAME, context.as_deref(), error);
        }
    }

    /// Put the uninjected service worker into the compilation as `swDest`.
    pub async fn make<C: ChildCompiler>(
        &self,
        compilation: &mut dyn Compilation,
        child: &C,
    ) -> Result<(), PluginError> {
        self.config.validate()?;
        let sw_dest = self.sw_dest(compilation)?;
        self.registry.insert(sw_dest.as_str());

        let sw_src = self
            .config
            .sw_src
            .clone()
            .ok_or_else(|| PluginError::Configuration {
                plugin: Self::NAME,
                message: "'swSrc' is required".to_string(),
            })?;
        let context = compilation.options().context.clone();

        if self.config.compile_src {
            let request = ChildCompileRequest {
                name: Self::NAME,
                context,
                sw_src,
                sw_dest: sw_dest.clone(),
                mode: self.config.mode.unwrap_or(compilation.options().mode),
                plugins: self.config.webpack_compilation_plugins.clone(),
            };
            let child_compilation = child.compile(request).await?;
            debug!(
                sw_dest = %sw_dest,
                assets = child_compilation.assets.len(),
                "child compilation finished"
            );
            for asset in child_compilation.assets {
                compilation.emit_asset(asset);
            }
            for diagnostic in child_compilation.diagnostics {
                compilation.push_diagnostic(diagnostic);
            }
        } else {
            if !self.config.webpack_compilation_plugins.is_empty() {
                compilation.push_warning(
                    Diagnostic::warning(
                        DiagnosticCode::IgnoredCompilationPlugins,
                        "compileSrc is false, so the webpackCompilationPlugins option will be ignored.",
                    )
                    .with_context(sw_dest.as_str()),
                );
            }
            let path = absolute(&context, &sw_src);
            let source = tokio::fs::read(&path).await?;
            debug!(sw_src = %path.display(), sw_dest = %sw_dest, "copied service worker source");
            compilation.emit_asset(Asset::new(sw_dest.as_str(), source));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // processAssets
    // -----------------------------------------------------------------------

    /// Asset-processing hook. Failures are recorded on the compilation and
    /// leave the assets untouched.
    #[instrument(skip_all, fields(plugin = "InjectManifest"))]
    pub fn process_assets(&self, compilation: &mut dyn Compilation) {
        if let Err(error) = self.inject(compilation) {
            let context = self.error_context(compilation);
            report_error(compilation, Self::NAME, context.as_deref(), error);
        }
    }

    /// Build the manifest and inject it into the `swDest` asset.
    pub fn inject(&self, compilation: &mut dyn Compilation) -> Result<(), PluginError> {
        self.config.validate()?;
        let sw_dest = self.sw_dest(compilation)?;
        note_invocation(&self.invocation, compilation, Self::NAME, &sw_dest);

        if let Some(sw_src) = &self.config.sw_src {
            let path = absolute(&compilation.options().context, sw_src);
            compilation.add_file_dependency(path);
        }

        let source = compilation
            .asset(&sw_dest)
            .ok_or_else(|| PluginError::MissingAsset(sw_dest.clone()))?
            .text()?
            .to_string();
        let marker = self.config.injection_point.as_str();
        find_injection_point(&source, marker)?;

        let map_name = source_mapping_url(&source)
            .and_then(|url| resolve_sibling(&sw_dest, url))
            .filter(|name| compilation.asset(name).is_some());
        let map_json = match &map_name {
            Some(name) => {
                self.registry.insert(name.as_str());
                compilation.asset(name).map(Asset::text).transpose()?.map(str::to_string)
            }
            None => None,
        };

        let options = self.config.to_manifest_options(&sw_dest);
        let manifest = build_manifest(&*compilation, &options, &self.registry)?;

        let style = QuoteStyle::for_compilation(self.config.compile_src, compilation.options());
        let target = InjectionTarget {
            name: &sw_dest,
            source: &source,
            source_map: map_name.as_deref().zip(map_json.as_deref()),
        };
        let injection = inject_manifest(&target, marker, &manifest.entries, style)?;

        compilation.update_asset(&sw_dest, injection.source.into_bytes(), None)?;
        if let (Some(name), Some(map)) = (&map_name, injection.source_map) {
            compilation.update_asset(name, map.into_bytes(), None)?;
        }

        report_manifest(compilation, Self::NAME, &sw_dest, manifest);
        Ok(())
    }

    /// Both stages, in order, stopping at the first failure.
    pub async fn run<C: ChildCompiler>(
        &self,
        compilation: &mut dyn Compilation,
        child: &C,
    ) -> Result<(), PluginError> {
        self.make(compilation, child).await?;
        self.inject(compilation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::{CompilerOptions, MemoryCompilation};
    use crate::DiagnosticLevel;

    const SW: &str = "precacheAndRoute(self.__WB_MANIFEST);";

    fn compilation_with_sw(source: &str) -> MemoryCompilation {
        MemoryCompilation::new(CompilerOptions::default())
            .with_asset(Asset::new("sw.js", source))
            .with_asset(Asset::new("main.js", "main"))
    }

    fn plugin() -> InjectManifest {
        InjectManifest::new(InjectManifestConfig::new("src/sw.js"), GeneratedAssetRegistry::new())
    }

    #[test]
    fn injects_and_skips_own_output() {
        let plugin = plugin();
        plugin.registry().insert("sw.js");
        let mut compilation = compilation_with_sw(SW);

        plugin.inject(&mut compilation).unwrap();

        let sw = compilation.asset("sw.js").unwrap().text().unwrap().to_string();
        assert!(sw.starts_with("precacheAndRoute([{'revision':'"));
        assert!(sw.contains("'url':'main.js'"));
        assert!(!sw.contains("'url':'sw.js'"));
        assert_eq!(plugin.invocation_state(), InvocationState::Invoked);
        assert_eq!(compilation.file_dependencies().len(), 1);
    }

    #[test]
    fn missing_marker_is_recorded_and_leaves_asset() {
        let plugin = plugin();
        let mut compilation = compilation_with_sw("precacheAndRoute([]);");

        plugin.process_assets(&mut compilation);

        let errors = compilation.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, Some(DiagnosticCode::MissingInjectionPoint));
        assert_eq!(errors[0].context.as_deref(), Some("sw.js"));
        assert_eq!(
            compilation.asset("sw.js").unwrap().text().unwrap(),
            "precacheAndRoute([]);"
        );
    }

    #[test]
    fn missing_sw_dest_asset_is_an_error() {
        let plugin = plugin();
        let mut compilation = MemoryCompilation::default();
        let err = plugin.inject(&mut compilation).unwrap_err();
        assert!(matches!(err, PluginError::MissingAsset(name) if name == "sw.js"));
    }

    #[test]
    fn double_quotes_when_not_compiling() {
        let plugin = InjectManifest::new(
            InjectManifestConfig::new("sw.js").with_compile_src(false),
            GeneratedAssetRegistry::new(),
        );
        let mut compilation = compilation_with_sw(SW);
        plugin.inject(&mut compilation).unwrap();
        let sw = compilation.asset("sw.js").unwrap().text().unwrap().to_string();
        assert!(sw.contains(r#""url":"main.js""#));
    }

    #[test]
    fn summary_is_recorded() {
        let plugin = plugin();
        let mut compilation = compilation_with_sw(SW);
        plugin.process_assets(&mut compilation);
        let infos: Vec<_> = compilation
            .diagnostics()
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Info)
            .collect();
        assert_eq!(infos.len(), 1);
        assert!(infos[0].message.starts_with("The service worker at sw.js will precache"));
    }
}
