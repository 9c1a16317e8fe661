//! The two bundler plugins and the bookkeeping they share.
//!
//! - [`inject_manifest::InjectManifest`] splices the manifest into a
//!   developer-supplied service worker.
//! - [`generate_sw::GenerateSw`] generates the whole service worker.
//!
//! Both exclude every asset recorded in the shared
//! [`registry::GeneratedAssetRegistry`] and warn when an instance is driven
//! through more than one compilation.

pub mod generate_sw;
pub mod inject_manifest;
pub mod registry;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

use crate::compilation::Compilation;
use crate::utils::pretty_bytes;
use crate::{Diagnostic, DiagnosticCode, ManifestResult, PluginError};

// ---------------------------------------------------------------------------
// Invocation bookkeeping
// ---------------------------------------------------------------------------

/// Whether a plugin instance has run before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationState {
    #[default]
    Fresh,
    Invoked,
}

#[derive(Debug, Default)]
pub(crate) struct InvocationTracker {
    state: Mutex<InvocationState>,
}

impl InvocationTracker {
    pub(crate) fn state(&self) -> InvocationState {
        *self.state.lock().expect("invocation state poisoned")
    }

    /// Move to `Invoked`, returning the state before the call.
    pub(crate) fn enter(&self) -> InvocationState {
        let mut state = self.state.lock().expect("invocation state poisoned");
        std::mem::replace(&mut *state, InvocationState::Invoked)
    }
}

/// Record the invocation and warn once per compilation and `swDest` when
/// this is not the first.
pub(crate) fn note_invocation(
    tracker: &InvocationTracker,
    compilation: &mut dyn Compilation,
    plugin: &str,
    sw_dest: &str,
) {
    if tracker.enter() == InvocationState::Fresh {
        return;
    }
    if compilation.has_diagnostic(DiagnosticCode::RepeatedInvocation, Some(sw_dest)) {
        return;
    }
    compilation.push_warning(
        Diagnostic::warning(
            DiagnosticCode::RepeatedInvocation,
            format!(
                "{} has been called multiple times, perhaps due to running the bundler in \
                 watch mode. The precache manifest generated after the first call may be \
                 inaccurate! Please see https://github.com/GoogleChrome/workbox/issues/1790 \
                 for more information.",
                plugin
            ),
        )
        .with_context(sw_dest),
    );
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Forward manifest warnings and record the precache summary.
pub(crate) fn report_manifest(
    compilation: &mut dyn Compilation,
    plugin: &str,
    sw_dest: &str,
    manifest: ManifestResult,
) {
    for warning in manifest.warnings {
        compilation.push_warning(warning);
    }
    let message = format!(
        "The service worker at {} will precache {} URLs, totaling {}.",
        sw_dest,
        manifest.entries.len(),
        pretty_bytes(manifest.total_size)
    );
    info!(plugin, sw_dest, entries = manifest.entries.len(), total_size = manifest.total_size, "{}", message);
    compilation.push_diagnostic(Diagnostic::info(message).with_context(sw_dest));
}

/// Record a fatal error on the compilation.
pub(crate) fn report_error(
    compilation: &mut dyn Compilation,
    plugin: &str,
    sw_dest: Option<&str>,
    error: PluginError,
) {
    tracing::error!(plugin, sw_dest, error = %error, "plugin failed");
    let diagnostic = error.to_diagnostic();
    compilation.push_error(match sw_dest {
        Some(dest) => diagnostic.with_context(dest),
        None => diagnostic,
    });
}

pub(crate) fn absolute(context: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        context.join(path)
    }
}
