//! Thread-safe registry of asset names emitted by the plugins themselves.
//!
//! Every plugin instance built from clones of the same registry sees the
//! same set. The manifest extractor skips registered names, so one plugin
//! never precaches a service worker, runtime chunk or source map that any
//! plugin instance produced.

use std::sync::Arc;

use arcstr::ArcStr;
use dashmap::DashSet;

/// Shared set of generated asset names. Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct GeneratedAssetRegistry {
    inner: Arc<DashSet<ArcStr>>,
}

impl GeneratedAssetRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a generated asset. Returns `false` if it was already known.
    pub fn insert(&self, name: impl Into<ArcStr>) -> bool {
        self.inner.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<ArcStr> {
        let mut names: Vec<ArcStr> = self.inner.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }
}
