use pretty_assertions::assert_eq;
use sha2::{Digest, Sha256};
use sw_precache::{
    build_manifest, Asset, AssetInfo, Compilation, CopyChildCompiler, GenerateSw, GenerateSwConfig,
    GeneratedAssetRegistry, InjectManifest, InjectManifestConfig, ManifestOptions,
    MemoryCompilation, CompilerOptions, serialize_manifest, QuoteStyle,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

const ASSETS: &[(&str, &str)] = &[
    ("index.html", "<html><script src=main.js></script></html>"),
    ("main.js", "import('./chunk.js')"),
    ("chunk.js", "export default 1"),
    ("styles/app.css", "body { margin: 0 }"),
    ("img/logo.svg", "<svg/>"),
];

fn compilation(order: &[usize]) -> MemoryCompilation {
    let mut compilation = MemoryCompilation::default();
    for &i in order {
        let (name, source) = ASSETS[i];
        compilation.insert_asset(Asset::new(name, source));
    }
    compilation.insert_asset(
        Asset::new("vendor.abc123.js", "vendor").with_info(AssetInfo {
            content_hash: vec!["abc123".to_string()],
            ..Default::default()
        }),
    );
    compilation
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[test]
fn manifest_bytes_do_not_depend_on_emit_order() {
    let options = ManifestOptions::new("sw.js");
    let forward = compilation(&[0, 1, 2, 3, 4]);
    let backward = compilation(&[4, 3, 2, 1, 0]);

    let a = build_manifest(&forward, &options, &GeneratedAssetRegistry::new()).unwrap();
    let b = build_manifest(&backward, &options, &GeneratedAssetRegistry::new()).unwrap();

    let a = serialize_manifest(&a.entries, QuoteStyle::Double).unwrap();
    let b = serialize_manifest(&b.entries, QuoteStyle::Double).unwrap();
    assert_eq!(sha256(a.as_bytes()), sha256(b.as_bytes()));
}

#[test]
fn manifest_is_sorted_by_url() {
    let options = ManifestOptions::new("sw.js");
    let result = build_manifest(&compilation(&[3, 1, 4, 0, 2]), &options, &GeneratedAssetRegistry::new())
        .unwrap();
    let urls: Vec<&str> = result.entries.iter().map(|e| e.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "chunk.js",
            "img/logo.svg",
            "index.html",
            "main.js",
            "styles/app.css",
            "vendor.abc123.js",
        ]
    );
    assert_eq!(result.entries[5].revision, None);
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generated_worker_is_byte_identical_across_instances() {
    let mut hashes = Vec::new();
    for order in [[0, 1, 2, 3, 4], [2, 4, 0, 3, 1]] {
        let plugin = GenerateSw::new(GenerateSwConfig::default(), GeneratedAssetRegistry::new());
        let mut compilation = compilation(&order);
        plugin.generate(&mut compilation).await.unwrap();
        hashes.push(sha256(&compilation.asset("service-worker.js").unwrap().source));
    }
    assert_eq!(hashes[0], hashes[1]);
}

#[tokio::test]
async fn injected_worker_is_byte_identical_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sw.js"), "precacheAndRoute(self.__WB_MANIFEST);").unwrap();

    let mut hashes = Vec::new();
    for order in [[0, 1, 2, 3, 4], [4, 3, 2, 1, 0]] {
        let plugin = InjectManifest::new(InjectManifestConfig::new("sw.js"), GeneratedAssetRegistry::new());
        let mut compilation = compilation(&order);
        *compilation.options_mut() = CompilerOptions {
            context: dir.path().to_path_buf(),
            ..Default::default()
        };
        plugin.run(&mut compilation, &CopyChildCompiler).await.unwrap();
        hashes.push(sha256(&compilation.asset("sw.js").unwrap().source));
    }
    assert_eq!(hashes[0], hashes[1]);
}
