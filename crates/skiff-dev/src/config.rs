//! Resolved configuration consumed by environments and the container.
//!
//! Config discovery and file loading happen upstream; this module only
//! defines the resolved shapes and the per-environment merge.

use std::path::PathBuf;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// Module resolution options shared with resolver plugins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolveOptions {
    pub extensions: Vec<String>,
    /// Bare-specifier prefixes treated as external to the graph.
    pub external: Vec<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            extensions: [".ts", ".tsx", ".js", ".jsx", ".mjs", ".json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            external: Vec::new(),
        }
    }
}

/// Dev-mode behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DevOptions {
    /// When true, requests that were in flight at close time are allowed to
    /// finish instead of failing with `ERR_CLOSED_SERVER`.
    pub recoverable: bool,
    /// URLs pre-transformed at startup.
    pub warmup: Vec<String>,
    pub sourcemap: bool,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            recoverable: false,
            warmup: Vec::new(),
            sourcemap: true,
        }
    }
}

/// Dependency pre-bundling options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizeDepsOptions {
    /// Disables automatic discovery; only `include` entries are optimized.
    pub no_discovery: bool,
    pub include: Vec<String>,
}

/// Options that can differ per environment name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvironmentOptions {
    pub dev: Option<DevOptions>,
    pub optimize_deps: Option<OptimizeDepsOptions>,
}

/// Fully resolved configuration, shared across all environments of a server.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub root: PathBuf,
    pub log_level: LogLevel,
    pub resolve: ResolveOptions,
    pub dev: DevOptions,
    pub optimize_deps: OptimizeDepsOptions,
    /// Per-environment overrides keyed by environment name.
    pub environments: FxHashMap<String, EnvironmentOptions>,
}

impl ResolvedConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            log_level: LogLevel::default(),
            resolve: ResolveOptions::default(),
            dev: DevOptions::default(),
            optimize_deps: OptimizeDepsOptions::default(),
            environments: FxHashMap::default(),
        }
    }

    /// Effective options for an environment: the name's overrides merged
    /// over the shared defaults, then any setup-time override on top.
    pub fn environment_options(
        &self,
        name: &str,
        setup_override: Option<&EnvironmentOptions>,
    ) -> (DevOptions, OptimizeDepsOptions) {
        let mut dev = self.dev.clone();
        let mut optimize_deps = self.optimize_deps.clone();

        for layer in [self.environments.get(name), setup_override] {
            let Some(layer) = layer else { continue };
            if let Some(layer_dev) = &layer.dev {
                dev = layer_dev.clone();
            }
            if let Some(layer_deps) = &layer.optimize_deps {
                optimize_deps = layer_deps.clone();
            }
        }
        (dev, optimize_deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_options_defaults() {
        let config = ResolvedConfig::new("/project");
        let (dev, deps) = config.environment_options("client", None);
        assert!(!dev.recoverable);
        assert!(!deps.no_discovery);
    }

    #[test]
    fn test_named_override_wins_over_shared() {
        let mut config = ResolvedConfig::new("/project");
        config.environments.insert(
            "ssr".into(),
            EnvironmentOptions {
                dev: Some(DevOptions {
                    recoverable: true,
                    ..DevOptions::default()
                }),
                optimize_deps: None,
            },
        );

        let (dev, _) = config.environment_options("ssr", None);
        assert!(dev.recoverable);
        let (dev, _) = config.environment_options("client", None);
        assert!(!dev.recoverable);
    }

    #[test]
    fn test_setup_override_wins_over_named() {
        let mut config = ResolvedConfig::new("/project");
        config.environments.insert(
            "client".into(),
            EnvironmentOptions {
                optimize_deps: Some(OptimizeDepsOptions {
                    no_discovery: false,
                    include: vec!["react".into()],
                }),
                dev: None,
            },
        );
        let setup = EnvironmentOptions {
            optimize_deps: Some(OptimizeDepsOptions {
                no_discovery: true,
                include: Vec::new(),
            }),
            dev: None,
        };

        let (_, deps) = config.environment_options("client", Some(&setup));
        assert!(deps.no_discovery);
        assert!(deps.include.is_empty());
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let options: EnvironmentOptions = serde_json::from_str(
            r#"{"optimizeDeps": {"noDiscovery": true, "include": ["preact"]}}"#,
        )
        .unwrap();
        let deps = options.optimize_deps.unwrap();
        assert!(deps.no_discovery);
        assert_eq!(deps.include, ["preact"]);
    }
}
