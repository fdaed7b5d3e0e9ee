//! A single module in the dev-mode module graph.

use rustc_hash::FxHashSet;
use skiff_common::{MetaMap, TransformResult};

/// One module known to the dev server.
///
/// Nodes are keyed by URL in the graph; `importers` and `imported_modules`
/// reference other nodes by their URL so the graph stays cycle-free at the
/// ownership level even when the import relation is circular.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Public URL the module is served under.
    pub url: String,
    /// Resolved id, set once the module went through resolution.
    pub id: Option<String>,
    /// Filesystem path backing the module, when it has one.
    pub file: Option<String>,
    /// Whether the module declares its own HMR boundary.
    pub is_self_accepting: bool,
    /// Timestamp (ms) of the last HMR update applied to this module.
    pub last_hmr_timestamp: u64,
    /// Guards against re-invalidating the same HMR wave twice.
    pub last_hmr_invalidation_received: bool,
    /// URLs of modules importing this one.
    pub importers: FxHashSet<String>,
    /// URLs of modules this one imports.
    pub imported_modules: FxHashSet<String>,
    /// Extra watched files registered by `load` hooks for this module.
    pub added_imports: FxHashSet<String>,
    /// Cached transform pipeline output; cleared on invalidation.
    pub transform_result: Option<TransformResult>,
    /// Plugin-managed metadata, merged across resolve/load/transform.
    pub meta: MetaMap,
    /// Whether the module entered the graph as an entry request.
    pub is_entry: bool,
}

impl ModuleNode {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
            file: None,
            is_self_accepting: false,
            last_hmr_timestamp: 0,
            last_hmr_invalidation_received: false,
            importers: FxHashSet::default(),
            imported_modules: FxHashSet::default(),
            added_imports: FxHashSet::default(),
            transform_result: None,
            meta: MetaMap::new(),
            is_entry: false,
        }
    }

    /// Merge plugin-provided metadata into the node, last write wins per key.
    pub fn merge_meta(&mut self, meta: &MetaMap) {
        for (key, value) in meta {
            self.meta.insert(key.clone(), value.clone());
        }
    }

    /// Drop cached transform state so the next request re-runs the pipeline.
    pub fn invalidate(&mut self, timestamp: u64, is_hmr: bool) {
        self.transform_result = None;
        if is_hmr {
            self.last_hmr_timestamp = timestamp;
        }
    }
}
