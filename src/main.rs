use std::env;
use std::path::{Path, PathBuf};
use std::process;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use sw_precache::{
    Compilation, CompilationSnapshot, CopyChildCompiler, DiagnosticLevel, GenerateSw,
    GenerateSwConfig, GeneratedAssetRegistry, InjectManifest, InjectManifestConfig,
    MemoryCompilation, RuntimeLibrary, TemplateBuilder,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PrecacheInput {
    plugin: PluginKind,
    #[serde(default)]
    config: serde_json::Value,
    compilation: CompilationSnapshot,
    /// How many consecutive builds to run the same plugin instance over,
    /// as a watch-mode session would.
    #[serde(default = "default_builds")]
    builds: u32,
    /// Workbox runtime bundled next to (or inlined into) a generated
    /// service worker.
    #[serde(default)]
    runtime: Option<PathBuf>,
}

fn default_builds() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum PluginKind {
    #[serde(rename = "injectManifest")]
    InjectManifest,
    #[serde(rename = "generateSW")]
    GenerateSw,
}

enum Plugin {
    Inject(InjectManifest),
    Generate(GenerateSw),
}

impl Plugin {
    async fn apply(&self, compilation: &mut MemoryCompilation) {
        match self {
            Self::Inject(plugin) => {
                plugin.handle_make(compilation, &CopyChildCompiler).await;
                plugin.process_assets(compilation);
            }
            Self::Generate(plugin) => plugin.process_assets(compilation).await,
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = run().await {
        eprintln!("[sw-precache] {}", err);
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SW_PRECACHE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), String> {
    let out_dir = parse_out_dir()?;

    let mut stdin_payload = String::new();
    tokio::io::stdin()
        .read_to_string(&mut stdin_payload)
        .await
        .map_err(|e| format!("failed to read stdin: {e}"))?;

    if stdin_payload.trim().is_empty() {
        return Err("stdin payload is empty".into());
    }

    let mut payload: PrecacheInput =
        serde_json::from_str(&stdin_payload).map_err(|e| format!("invalid input JSON: {e}"))?;
    if payload.builds == 0 {
        return Err("input.builds must be at least 1".into());
    }
    if payload.compilation.options.output.path.as_os_str().is_empty() {
        payload.compilation.options.output.path = out_dir.clone();
    }

    let plugin = build_plugin(&payload).await?;

    let mut last = None;
    for build in 1..=payload.builds {
        let mut compilation = payload
            .compilation
            .clone()
            .load()
            .await
            .map_err(|e| e.to_string())?;
        plugin.apply(&mut compilation).await;
        tracing::debug!(build, diagnostics = compilation.diagnostics().len(), "build finished");
        last = Some(compilation);
    }
    let compilation = last.ok_or_else(|| "no build was run".to_string())?;

    let mut errors = 0;
    for diagnostic in compilation.diagnostics() {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => {
                errors += 1;
                "error"
            }
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };
        match &diagnostic.context {
            Some(context) => eprintln!("[sw-precache] {level} ({context}): {}", diagnostic.message),
            None => eprintln!("[sw-precache] {level}: {}", diagnostic.message),
        }
    }
    if errors > 0 {
        return Err(format!("{errors} error(s) recorded, no assets written"));
    }

    write_assets(&out_dir, compilation).await
}

async fn build_plugin(payload: &PrecacheInput) -> Result<Plugin, String> {
    let registry = GeneratedAssetRegistry::new();
    let config = payload.config.clone();
    match payload.plugin {
        PluginKind::InjectManifest => {
            if payload.runtime.is_some() {
                return Err("input.runtime only applies to generateSW".into());
            }
            let config = InjectManifestConfig::from_value(config).map_err(|e| e.to_string())?;
            Ok(Plugin::Inject(InjectManifest::new(config, registry)))
        }
        PluginKind::GenerateSw => {
            let config = GenerateSwConfig::from_value(config).map_err(|e| e.to_string())?;
            let mut builder = TemplateBuilder::default();
            if let Some(path) = &payload.runtime {
                let source = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| format!("failed to read runtime '{}': {e}", path.display()))?;
                builder = builder.with_runtime(RuntimeLibrary::new(source));
            }
            Ok(Plugin::Generate(GenerateSw::with_builder(config, registry, builder)))
        }
    }
}

async fn write_assets(out_dir: &Path, compilation: MemoryCompilation) -> Result<(), String> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| format!("failed to create output dir '{}': {e}", out_dir.display()))?;

    for asset in compilation.into_assets() {
        let path = out_dir.join(asset.name.as_str());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create '{}': {e}", parent.display()))?;
        }
        tokio::fs::write(&path, &asset.source)
            .await
            .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;
    }
    Ok(())
}

fn parse_out_dir() -> Result<PathBuf, String> {
    let mut out_dir: Option<PathBuf> = None;
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --out-dir".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            _ => {
                return Err(format!(
                    "unknown argument '{arg}'. usage: sw-precache --out-dir <path>"
                ));
            }
        }
    }

    out_dir.ok_or_else(|| "required flag missing: --out-dir <path>".to_string())
}
