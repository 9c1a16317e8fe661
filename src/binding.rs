//! Node binding.
//!
//! Exposes the manifest computation and the string-level injection to a
//! JavaScript plugin wrapper that owns the real bundler hooks.

use napi::bindgen_prelude::*;
use napi_derive::napi;

use crate::compilation::{Compilation, CompilationSnapshot};
use crate::config::{GenerateSwConfig, DEFAULT_INJECTION_POINT};
use crate::inject::{serialize_manifest, splice_manifest, InjectionTarget, QuoteStyle};
use crate::manifest::build_manifest;
use crate::plugin::registry::GeneratedAssetRegistry;
use crate::utils::relative_to_output_path;
use crate::{Diagnostic, PluginError, PrecacheEntry};

fn to_napi(error: PluginError) -> napi::Error {
    napi::Error::new(Status::GenericFailure, error.to_string())
}

#[napi(object)]
pub struct JsManifest {
    /// Serialized manifest, ready to be spliced into a service worker.
    pub manifest: String,
    pub count: u32,
    pub total_size: f64,
    pub warnings: Vec<String>,
}

/// Compute the precache manifest of a compilation snapshot.
///
/// `config` takes the GenerateSW option names; only the manifest-related
/// ones have an effect. Assets listed in `excludeAssets` are treated as
/// generated by other plugin instances.
#[napi(ts_return_type = "Promise<JsManifest>")]
pub async fn get_manifest(
    config: serde_json::Value,
    compilation: String,
    exclude_assets: Option<Vec<String>>,
) -> napi::Result<JsManifest> {
    let config = GenerateSwConfig::from_value(config).map_err(to_napi)?;
    config.validate().map_err(to_napi)?;
    let compilation = CompilationSnapshot::from_json(&compilation)
        .map_err(to_napi)?
        .load()
        .await
        .map_err(to_napi)?;

    let registry = GeneratedAssetRegistry::new();
    for name in exclude_assets.unwrap_or_default() {
        registry.insert(name);
    }

    let sw_dest = relative_to_output_path(&compilation.options().output.path, &config.sw_dest);
    let options = config.to_manifest_options(&sw_dest);
    let result = build_manifest(&compilation, &options, &registry).map_err(to_napi)?;

    Ok(JsManifest {
        manifest: serialize_manifest(&result.entries, QuoteStyle::Double).map_err(to_napi)?,
        count: result.entries.len() as u32,
        total_size: result.total_size as f64,
        warnings: result.warnings.into_iter().map(|Diagnostic { message, .. }| message).collect(),
    })
}

/// Replace the injection point in `source` with `entries` (a JSON array of
/// precache entries).
#[napi]
pub fn inject_manifest_string(
    source: String,
    entries: String,
    injection_point: Option<String>,
    single_quotes: Option<bool>,
) -> napi::Result<String> {
    let entries: Vec<PrecacheEntry> = serde_json::from_str(&entries)
        .map_err(|e| napi::Error::new(Status::InvalidArg, format!("invalid manifest entries: {e}")))?;
    let style = if single_quotes.unwrap_or(false) {
        QuoteStyle::Single
    } else {
        QuoteStyle::Double
    };
    let marker = injection_point.unwrap_or_else(|| DEFAULT_INJECTION_POINT.to_string());
    let manifest = serialize_manifest(&entries, style).map_err(to_napi)?;
    let target = InjectionTarget {
        name: "",
        source: &source,
        source_map: None,
    };
    let injection = splice_manifest(&target, &marker, &manifest).map_err(to_napi)?;
    Ok(injection.source)
}
