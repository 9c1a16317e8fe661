use pretty_assertions::assert_eq;
use sw_precache::{
    Asset, BundleRequest, Compilation, CompilerOptions, CopyChildCompiler, DiagnosticCode,
    GenerateSw, GenerateSwConfig, GeneratedAssetRegistry, GeneratedFile, InjectManifest,
    InjectManifestConfig, MemoryCompilation, PluginError, RenderConfig, RuntimeLibrary,
    ServiceWorkerBuilder, TemplateBuilder,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compilation() -> MemoryCompilation {
    MemoryCompilation::default()
        .with_asset(Asset::new("index.html", "<html></html>"))
        .with_asset(Asset::new("main.js", "console.log('main');"))
        .with_asset(Asset::new("main.js.map", "{}"))
        .with_entry("main", &["main.js"])
}

fn text(compilation: &MemoryCompilation, name: &str) -> String {
    compilation
        .asset(name)
        .unwrap_or_else(|| panic!("missing asset {name}"))
        .text()
        .expect("utf-8 asset")
        .to_string()
}

/// Renders only the manifest URLs, one per line.
#[derive(Debug, Default)]
struct UrlListBuilder;

impl ServiceWorkerBuilder for UrlListBuilder {
    fn render(&self, config: &RenderConfig) -> Result<String, PluginError> {
        Ok(config
            .manifest_entries
            .iter()
            .map(|e| e.url.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn bundle(&self, request: BundleRequest) -> Result<Vec<GeneratedFile>, PluginError> {
        Ok(vec![GeneratedFile {
            name: request.sw_dest,
            contents: request.unbundled_code.into_bytes(),
        }])
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generates_worker_runtime_and_source_map() {
    let mut compilation = compilation();
    compilation.options_mut().devtool = Some("source-map".to_string());
    let builder = TemplateBuilder::new().with_runtime(RuntimeLibrary::new("self.workbox = {};\n"));
    let runtime_chunk = RuntimeLibrary::new("self.workbox = {};\n").chunk_name();
    let config = GenerateSwConfig::from_json(r#"{"swDest":"sw.js","skipWaiting":true}"#).unwrap();
    let plugin = GenerateSw::with_builder(config, GeneratedAssetRegistry::new(), builder);

    plugin.process_assets(&mut compilation).await;
    assert!(compilation.errors().is_empty());

    let sw = text(&compilation, "sw.js");
    assert!(sw.starts_with(&format!("importScripts('./{}');\n", runtime_chunk)));
    assert!(sw.contains(&format!(
        r#"precacheAndRoute([{{"revision":"{}","url":"index.html"}},{{"revision":"{}","url":"main.js"}}], {{}});"#,
        format!("{:x}", md5::compute(b"<html></html>")),
        format!("{:x}", md5::compute(b"console.log('main');")),
    )));
    assert!(sw.contains("self.skipWaiting();"));
    assert!(sw.ends_with("//# sourceMappingURL=sw.js.map\n"));
    assert!(compilation.asset("sw.js.map").is_some());
    assert_eq!(text(&compilation, &runtime_chunk), "self.workbox = {};\n");

    let mut registered: Vec<String> = plugin.registry().names().iter().map(|n| n.to_string()).collect();
    registered.sort();
    let mut expected = vec!["sw.js".to_string(), "sw.js.map".to_string(), runtime_chunk];
    expected.sort();
    assert_eq!(registered, expected);
}

#[tokio::test]
async fn json_config_reaches_the_template() {
    let config = GenerateSwConfig::from_value(serde_json::json!({
        "swDest": "sw.js",
        "clientsClaim": true,
        "cacheId": "shop",
        "navigateFallback": "/index.html",
        "navigateFallbackDenylist": ["^/api/"],
        "modifyURLPrefix": { "": "/static/" },
        "additionalManifestEntries": [{ "url": "/offline.html", "revision": "1" }]
    }))
    .unwrap();
    let plugin = GenerateSw::new(config, GeneratedAssetRegistry::new());
    let mut compilation = compilation();

    plugin.generate(&mut compilation).await.unwrap();

    let sw = text(&compilation, "sw.js");
    assert!(sw.contains("workbox.core.clientsClaim();"));
    assert!(sw.contains(r#"setCacheNameDetails({ prefix: "shop" });"#));
    assert!(sw.contains(r#""url":"/static/main.js""#));
    // Prefix rewriting leaves additional entries alone.
    assert!(sw.contains(r#"{"revision":"1","url":"/offline.html"}"#));
    assert!(sw.contains(r#"createHandlerBoundToURL("/index.html"), { denylist: [/^\/api\//] })"#));
}

#[tokio::test]
async fn custom_builder_sees_final_manifest() {
    let config = GenerateSwConfig::default()
        .with_sw_dest("sw.js")
        .with_exclude_chunks(&["main"]);
    let plugin = GenerateSw::with_builder(config, GeneratedAssetRegistry::new(), UrlListBuilder);
    let mut compilation = compilation();

    plugin.generate(&mut compilation).await.unwrap();

    assert_eq!(text(&compilation, "sw.js"), "index.html");
}

#[tokio::test]
async fn builds_are_repeatable_and_warn_after_the_first() {
    let plugin = GenerateSw::new(GenerateSwConfig::default(), GeneratedAssetRegistry::new());

    let mut first = compilation();
    plugin.process_assets(&mut first).await;
    let mut second = compilation();
    plugin.process_assets(&mut second).await;

    assert_eq!(
        text(&first, "service-worker.js"),
        text(&second, "service-worker.js")
    );
    assert!(!first.has_diagnostic(DiagnosticCode::RepeatedInvocation, Some("service-worker.js")));
    assert!(second.has_diagnostic(DiagnosticCode::RepeatedInvocation, Some("service-worker.js")));
}

#[tokio::test]
async fn file_too_large_is_skipped_with_warning() {
    let config = GenerateSwConfig::default().with_maximum_file_size(10);
    let plugin = GenerateSw::with_builder(config, GeneratedAssetRegistry::new(), UrlListBuilder);
    let mut compilation = compilation();

    plugin.generate(&mut compilation).await.unwrap();

    assert_eq!(text(&compilation, "service-worker.js"), "");
    let too_large: Vec<_> = compilation
        .warnings()
        .into_iter()
        .filter(|w| w.code == Some(DiagnosticCode::FileTooLarge))
        .map(|w| w.message.clone())
        .collect();
    assert_eq!(
        too_large,
        vec![
            "index.html is 13 B, and won't be precached. Configure maximumFileSizeToCacheInBytes to change this limit.",
            "main.js is 20 B, and won't be precached. Configure maximumFileSizeToCacheInBytes to change this limit.",
        ]
    );
}

fn reject_everything(
    _: Vec<sw_precache::PrecacheEntry>,
    _: &dyn Compilation,
) -> anyhow::Result<sw_precache::TransformOutput> {
    anyhow::bail!("cannot precache this build")
}

#[tokio::test]
async fn failing_transform_emits_no_worker() {
    let config = GenerateSwConfig::default().with_transform(reject_everything);
    let registry = GeneratedAssetRegistry::new();
    let plugin = GenerateSw::new(config, registry.clone());
    let mut compilation = compilation();

    plugin.process_assets(&mut compilation).await;

    let codes: Vec<_> = compilation.errors().iter().map(|e| e.code).collect();
    assert_eq!(codes, vec![Some(DiagnosticCode::Transform)]);
    assert_eq!(
        compilation.errors()[0].context.as_deref(),
        Some("service-worker.js")
    );
    assert!(compilation.asset("service-worker.js").is_none());
    assert!(registry.is_empty());
}

// ---------------------------------------------------------------------------
// Both plugins in one build
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_and_inject_share_a_registry() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("push-sw.js"), "precache(self.__WB_MANIFEST);").unwrap();
    let registry = GeneratedAssetRegistry::new();
    let generate = GenerateSw::with_builder(
        GenerateSwConfig::default(),
        registry.clone(),
        UrlListBuilder,
    );
    let inject = InjectManifest::new(
        InjectManifestConfig::new("push-sw.js").with_compile_src(false),
        registry.clone(),
    );
    let mut compilation = MemoryCompilation::new(CompilerOptions {
        context: dir.path().to_path_buf(),
        ..Default::default()
    })
    .with_asset(Asset::new("index.html", "<html></html>"));

    inject.make(&mut compilation, &CopyChildCompiler).await.unwrap();
    generate.generate(&mut compilation).await.unwrap();
    inject.inject(&mut compilation).unwrap();

    assert_eq!(text(&compilation, "service-worker.js"), "index.html");
    let push_sw = text(&compilation, "push-sw.js");
    assert!(push_sw.contains(r#""url":"index.html""#));
    assert!(!push_sw.contains("service-worker.js"));
}
