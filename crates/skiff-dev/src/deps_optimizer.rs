//! Dependency pre-bundling surface.
//!
//! The optimizer itself (scanning, esbuild-style bundling, cache dirs) lives
//! upstream; environments only need the registration/lookup contract and the
//! selection policy deciding which flavor an environment gets.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::OptimizeDepsOptions;

/// One optimized (or pending) dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedDepInfo {
    /// Bare specifier as imported by user code.
    pub id: String,
    /// Resolved entry the optimizer bundles from.
    pub src: String,
}

/// Contract the environment and resolver plugins consume.
#[async_trait]
pub trait DepsOptimizer: Send + Sync {
    /// Record a bare import discovered during a transform.
    fn register_missing_import(&self, id: &str, resolved: &str);

    /// Lookup a dependency registered earlier.
    fn metadata(&self, id: &str) -> Option<OptimizedDepInfo>;

    fn is_optimized_dep(&self, id: &str) -> bool {
        self.metadata(id).is_some()
    }

    async fn close(&self);
}

/// In-memory optimizer registry.
///
/// In discovery mode every registered import is accepted; in explicit mode
/// only ids listed in `include` are.
pub struct BasicDepsOptimizer {
    discovery: bool,
    include: Vec<String>,
    registry: RwLock<FxHashMap<String, OptimizedDepInfo>>,
}

impl BasicDepsOptimizer {
    pub fn new(discovery: bool, include: Vec<String>) -> Self {
        let optimizer = Self {
            discovery,
            include: include.clone(),
            registry: RwLock::new(FxHashMap::default()),
        };
        // Explicit entries are known up front, before any import is seen.
        for id in include {
            optimizer.registry.write().insert(
                id.clone(),
                OptimizedDepInfo {
                    id: id.clone(),
                    src: id,
                },
            );
        }
        optimizer
    }
}

#[async_trait]
impl DepsOptimizer for BasicDepsOptimizer {
    fn register_missing_import(&self, id: &str, resolved: &str) {
        if !self.discovery && !self.include.iter().any(|inc| inc == id) {
            debug!("skipping non-included dep {}", id);
            return;
        }
        self.registry.write().insert(
            id.to_string(),
            OptimizedDepInfo {
                id: id.to_string(),
                src: resolved.to_string(),
            },
        );
    }

    fn metadata(&self, id: &str) -> Option<OptimizedDepInfo> {
        self.registry.read().get(id).cloned()
    }

    async fn close(&self) {
        self.registry.write().clear();
    }
}

/// Pick the optimizer flavor for an environment.
///
/// | condition                                   | optimizer            |
/// |---------------------------------------------|----------------------|
/// | caller provided one                         | use provided         |
/// | `no_discovery` and empty `include`          | none                 |
/// | environment named `client`, discovery on    | auto-discovery       |
/// | otherwise                                   | explicit-only        |
pub fn create_deps_optimizer(
    environment_name: &str,
    options: &OptimizeDepsOptions,
    provided: Option<Arc<dyn DepsOptimizer>>,
) -> Option<Arc<dyn DepsOptimizer>> {
    if let Some(provided) = provided {
        return Some(provided);
    }
    if options.no_discovery && options.include.is_empty() {
        return None;
    }
    let discovery = environment_name == "client" && !options.no_discovery;
    Some(Arc::new(BasicDepsOptimizer::new(
        discovery,
        options.include.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(no_discovery: bool, include: &[&str]) -> OptimizeDepsOptions {
        OptimizeDepsOptions {
            no_discovery,
            include: include.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_selection_none_when_disabled() {
        assert!(create_deps_optimizer("client", &options(true, &[]), None).is_none());
    }

    #[test]
    fn test_selection_prefers_provided() {
        let provided: Arc<dyn DepsOptimizer> = Arc::new(BasicDepsOptimizer::new(true, vec![]));
        let chosen = create_deps_optimizer("ssr", &options(true, &[]), Some(Arc::clone(&provided)));
        assert!(chosen.is_some());
    }

    #[test]
    fn test_client_gets_discovery() {
        let optimizer = create_deps_optimizer("client", &options(false, &[]), None).unwrap();
        optimizer.register_missing_import("react", "/node_modules/react/index.js");
        assert!(optimizer.is_optimized_dep("react"));
    }

    #[test]
    fn test_non_client_is_explicit_only() {
        let optimizer = create_deps_optimizer("ssr", &options(false, &["lodash"]), None).unwrap();
        optimizer.register_missing_import("react", "/node_modules/react/index.js");
        assert!(!optimizer.is_optimized_dep("react"));

        optimizer.register_missing_import("lodash", "/node_modules/lodash/index.js");
        let info = optimizer.metadata("lodash").unwrap();
        assert_eq!(info.src, "/node_modules/lodash/index.js");
    }
}
