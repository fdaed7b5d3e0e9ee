//! The dev-mode module graph.
//!
//! Keyed twice: by public URL (what the browser requests) and by resolved id
//! (what plugins operate on). URL resolution is pluggable so the environment
//! can wire it to its plugin container during `init` without the graph
//! depending on the container.

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use skiff_common::Result;

use crate::node::ModuleNode;

/// Shared handle to a graph node.
pub type SharedModuleNode = Arc<RwLock<ModuleNode>>;

/// Resolves a raw URL to a module id. Returning `Ok(None)` means "no plugin
/// resolved it"; the graph then falls back to the URL itself.
pub type ModuleResolver =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Option<String>>> + Send + Sync>;

/// Strip query string and fragment from a URL.
fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

#[derive(Default)]
pub struct ModuleGraph {
    url_to_module: RwLock<FxHashMap<String, SharedModuleNode>>,
    id_to_module: RwLock<FxHashMap<String, SharedModuleNode>>,
    resolver: OnceLock<ModuleResolver>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the URL resolver. Later calls are ignored; the environment
    /// installs it exactly once during `init`.
    pub fn set_resolver(&self, resolver: ModuleResolver) {
        let _ = self.resolver.set(resolver);
    }

    /// Get-or-create the node for a raw URL, resolving it to an id through
    /// the installed resolver.
    pub async fn ensure_entry_from_url(&self, raw_url: &str) -> Result<SharedModuleNode> {
        if let Some(node) = self.get_module_by_url(raw_url) {
            return Ok(node);
        }

        let resolved_id = match self.resolver.get() {
            Some(resolve) => resolve(raw_url.to_string()).await?,
            None => None,
        };
        let id = resolved_id.unwrap_or_else(|| raw_url.to_string());

        // A concurrent request may have created the node while we resolved.
        let mut by_url = self.url_to_module.write();
        if let Some(node) = by_url.get(raw_url) {
            return Ok(Arc::clone(node));
        }

        let mut node = ModuleNode::new(raw_url);
        node.file = Some(clean_url(&id).to_string());
        node.id = Some(id.clone());
        let node = Arc::new(RwLock::new(node));

        by_url.insert(raw_url.to_string(), Arc::clone(&node));
        self.id_to_module.write().insert(id, Arc::clone(&node));
        Ok(node)
    }

    pub fn get_module_by_url(&self, url: &str) -> Option<SharedModuleNode> {
        self.url_to_module.read().get(url).cloned()
    }

    pub fn get_module_by_id(&self, id: &str) -> Option<SharedModuleNode> {
        self.id_to_module.read().get(id).cloned()
    }

    /// Snapshot of every known module id.
    pub fn module_ids(&self) -> Vec<String> {
        self.id_to_module.read().keys().cloned().collect()
    }

    /// Record that `importer_url` imports `imported_url`, both already in
    /// the graph.
    pub fn add_import_link(&self, importer_url: &str, imported_url: &str) {
        if let Some(importer) = self.get_module_by_url(importer_url) {
            importer
                .write()
                .imported_modules
                .insert(imported_url.to_string());
        }
        if let Some(imported) = self.get_module_by_url(imported_url) {
            imported
                .write()
                .importers
                .insert(importer_url.to_string());
        }
    }

    /// Invalidate a module and walk up through its importers.
    ///
    /// `seen` guards against import cycles. Only the module the invalidation
    /// originated at keeps the HMR timestamp; importers are soft-invalidated
    /// so their next request re-runs the pipeline.
    pub fn invalidate_module(
        &self,
        url: &str,
        seen: &mut FxHashSet<String>,
        timestamp: u64,
        is_hmr: bool,
    ) {
        if !seen.insert(url.to_string()) {
            return;
        }
        let Some(node) = self.get_module_by_url(url) else {
            return;
        };

        let importers: Vec<String> = {
            let mut node = node.write();
            node.invalidate(timestamp, is_hmr);
            node.importers.iter().cloned().collect()
        };

        for importer in importers {
            self.invalidate_module(&importer, seen, timestamp, false);
        }
    }

    /// Invalidate every module in the graph (e.g. on a config-level change).
    pub fn invalidate_all(&self, timestamp: u64) {
        let nodes: Vec<SharedModuleNode> =
            self.url_to_module.read().values().cloned().collect();
        for node in nodes {
            node.write().invalidate(timestamp, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_common::TransformResult;

    fn cached(code: &str) -> Option<TransformResult> {
        Some(TransformResult {
            code: code.into(),
            map: None,
        })
    }

    #[tokio::test]
    async fn test_ensure_entry_without_resolver_falls_back_to_url() {
        let graph = ModuleGraph::new();
        let node = graph.ensure_entry_from_url("/src/a.ts").await.unwrap();
        assert_eq!(node.read().id.as_deref(), Some("/src/a.ts"));
        assert!(graph.get_module_by_id("/src/a.ts").is_some());
    }

    #[tokio::test]
    async fn test_ensure_entry_uses_resolver() {
        let graph = ModuleGraph::new();
        graph.set_resolver(Arc::new(|url: String| {
            Box::pin(async move { Ok(Some(format!("/abs{}", url))) })
        }));

        let node = graph.ensure_entry_from_url("/src/a.ts").await.unwrap();
        assert_eq!(node.read().id.as_deref(), Some("/abs/src/a.ts"));
        assert!(graph.get_module_by_id("/abs/src/a.ts").is_some());
        assert!(graph.get_module_by_url("/src/a.ts").is_some());
    }

    #[tokio::test]
    async fn test_ensure_entry_is_idempotent() {
        let graph = ModuleGraph::new();
        let first = graph.ensure_entry_from_url("/src/a.ts").await.unwrap();
        let second = graph.ensure_entry_from_url("/src/a.ts").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(graph.module_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_entry_strips_query_for_file() {
        let graph = ModuleGraph::new();
        let node = graph
            .ensure_entry_from_url("/src/a.ts?import&t=123")
            .await
            .unwrap();
        assert_eq!(node.read().file.as_deref(), Some("/src/a.ts"));
    }

    #[tokio::test]
    async fn test_invalidation_walks_importers_and_handles_cycles() {
        let graph = ModuleGraph::new();
        graph.ensure_entry_from_url("/a.ts").await.unwrap();
        graph.ensure_entry_from_url("/b.ts").await.unwrap();
        graph.add_import_link("/a.ts", "/b.ts");
        graph.add_import_link("/b.ts", "/a.ts");

        for url in ["/a.ts", "/b.ts"] {
            graph.get_module_by_url(url).unwrap().write().transform_result = cached("x");
        }

        let mut seen = FxHashSet::default();
        graph.invalidate_module("/b.ts", &mut seen, 42, true);

        let b = graph.get_module_by_url("/b.ts").unwrap();
        let a = graph.get_module_by_url("/a.ts").unwrap();
        assert!(b.read().transform_result.is_none());
        assert!(a.read().transform_result.is_none());
        // HMR timestamp only lands on the origin of the wave
        assert_eq!(b.read().last_hmr_timestamp, 42);
        assert_eq!(a.read().last_hmr_timestamp, 0);
    }
}
