//! # skiff-dev
//!
//! The per-environment machinery of the skiff dev server: a plugin container
//! driving the Rollup-compatible hook protocol (`options`, `build_start`,
//! `resolve_id`, `load`, `transform`, `watch_change`, `build_end`,
//! `close_bundle`), per-invocation plugin contexts with source-map chaining
//! and error enrichment, a crawl-idle detector, and the environment object
//! tying it to a module graph, a hot channel, and a deps optimizer.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use skiff_dev::{DevEnvironment, EnvironmentSetup, ResolvedConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(ResolvedConfig::new("/project"));
//! let environment = DevEnvironment::new(
//!     "client",
//!     config,
//!     vec![/* plugins */],
//!     EnvironmentSetup::default(),
//! );
//! environment.init().await?;
//!
//! let result = environment.transform_request("/src/main.ts").await?;
//! println!("{}", result.code);
//! # Ok(()) }
//! ```

pub mod config;
pub mod container;
pub mod crawl;
pub mod deps_optimizer;
pub mod environment;
pub mod hot;
pub mod logging;
pub mod parse;
pub mod plugin;
pub mod utils;
pub mod watch;

mod transform_request;

// Re-export the shared foundation so embedders depend on one crate.
pub use skiff_common::{
    Error, ErrorLoc, MetaMap, PluginError, Result, SourceMapData, SourceMapInput,
    TransformResult,
};
pub use skiff_graph::{ModuleGraph, ModuleInfo, ModuleNode, SharedModuleNode};

pub use config::{
    DevOptions, EnvironmentOptions, OptimizeDepsOptions, ResolveOptions, ResolvedConfig,
};
pub use container::{
    CompatPluginContainer, ContextResolveOptions, LoadOptions, PartialResolvedId,
    PluginContainer, PluginContext, ResolveIdOptions, TransformOptions, TransformPluginContext,
    WeakPluginContainer,
};
pub use crawl::{CrawlEndFinder, CrawlOutcome};
pub use deps_optimizer::{
    create_deps_optimizer, BasicDepsOptimizer, DepsOptimizer, OptimizedDepInfo,
};
pub use environment::{
    DevEnvironment, EnvironmentSetup, FetchedModule, ModuleRunner,
};
pub use hot::{HotChannel, HotListener, HotPayload, HotUpdate, LocalHotChannel, NoopHotChannel};
pub use logging::{init_logging, init_logging_from_env, LogLevel};
pub use parse::{parse_module, ModuleStructure};
pub use plugin::{
    sort_plugins, HookKind, HookLoadArgs, HookLoadOutput, HookLoadReturn, HookMeta,
    HookNoopReturn, HookOrder, HookResolveIdArgs, HookResolveIdOutput, HookResolveIdReturn,
    HookTransformArgs, HookTransformOutput, HookTransformReturn, InputOptions, Plugin,
    SharedPlugin, WatchChangeKind,
};
pub use watch::{FileChange, WatchHandle};
