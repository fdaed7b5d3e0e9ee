//! The `this` object handed to every hook invocation.
//!
//! A fresh context is created per hook chain so concurrent pipelines never
//! alias active-plugin state; within one chain the container switches the
//! active plugin between sequentially-visited handlers. Plugin identity is
//! the plugin's index in the container's registration order, which is what
//! resolve-skip sets carry.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use skiff_common::{MetaMap, PluginError, Result, SourceMapData, SourceMapInput};
use skiff_graph::ModuleInfo;
use tracing::{debug, info, warn};

use crate::container::hook_error::enrich_hook_error;
use crate::container::source_map::{identity_map, SourceMapChain};
use crate::container::{PartialResolvedId, PluginContainer, ResolveIdOptions};
use crate::parse::{parse_module, ModuleStructure};

/// Options for a context-initiated resolve.
#[derive(Debug, Clone)]
pub struct ContextResolveOptions {
    /// Skip the calling plugin's own `resolve_id`, preventing infinite
    /// recursion. On by default.
    pub skip_self: bool,
    pub is_entry: bool,
    pub scan: bool,
    pub custom: Option<MetaMap>,
}

impl Default for ContextResolveOptions {
    fn default() -> Self {
        Self {
            skip_self: true,
            is_entry: false,
            scan: false,
            custom: None,
        }
    }
}

pub struct PluginContext {
    pub(crate) container: PluginContainer,
    pub(crate) active_plugin: Mutex<Option<usize>>,
    pub(crate) active_id: Mutex<Option<String>>,
    pub(crate) active_code: Mutex<Option<String>>,
    /// Plugins already skipped by the resolve chain that spawned this
    /// context; inherited by nested resolves.
    pub(crate) resolve_skips: Option<Arc<FxHashSet<usize>>>,
    /// Watch files added during this chain; flows onto the module node.
    pub(crate) added_imports: Mutex<FxHashSet<String>>,
    pub(crate) ssr: bool,
}

impl PluginContext {
    pub(crate) fn new(
        container: PluginContainer,
        plugin: Option<usize>,
        resolve_skips: Option<Arc<FxHashSet<usize>>>,
        ssr: bool,
    ) -> Self {
        Self {
            container,
            active_plugin: Mutex::new(plugin),
            active_id: Mutex::new(None),
            active_code: Mutex::new(None),
            resolve_skips,
            added_imports: Mutex::new(FxHashSet::default()),
            ssr,
        }
    }

    pub(crate) fn set_active_plugin(&self, plugin: Option<usize>) {
        *self.active_plugin.lock() = plugin;
    }

    pub(crate) fn active_plugin_index(&self) -> Option<usize> {
        *self.active_plugin.lock()
    }

    /// Name of the plugin currently driven through this context.
    pub fn active_plugin_name(&self) -> String {
        self.active_plugin_index()
            .and_then(|index| self.container.plugin_name(index))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Parse code into an owned module-structure summary. Touches no plugin
    /// state.
    pub fn parse(&self, code: &str) -> Result<ModuleStructure> {
        parse_module(code)
    }

    /// Re-enter the container's `resolve_id`, by default skipping the
    /// calling plugin on top of any skips this context inherited.
    pub async fn resolve(
        &self,
        specifier: &str,
        importer: Option<&str>,
        opts: ContextResolveOptions,
    ) -> Result<Option<PartialResolvedId>> {
        let mut skip: FxHashSet<usize> = self
            .resolve_skips
            .as_deref()
            .cloned()
            .unwrap_or_default();
        if opts.skip_self {
            if let Some(active) = self.active_plugin_index() {
                skip.insert(active);
            }
        }

        self.container
            .resolve_id_with(
                specifier,
                importer,
                &ResolveIdOptions {
                    skip: Some(Arc::new(skip)),
                    is_entry: opts.is_entry,
                    scan: opts.scan,
                    custom: opts.custom.clone(),
                    attributes: None,
                    ssr: self.ssr,
                },
            )
            .await
    }

    /// Ensure `id` is in the module graph, run `load` (and `transform` when
    /// the load produced code), and return the module's info view.
    pub async fn load(&self, id: &str, meta: Option<MetaMap>) -> Result<ModuleInfo> {
        let node = self.container.graph().ensure_entry_from_url(id).await?;
        if let Some(meta) = &meta {
            node.write().merge_meta(meta);
        }

        let loaded = self.container.load(id, Default::default()).await?;
        if let Some(output) = loaded {
            self.container
                .transform(output.code, id, crate::container::TransformOptions {
                    in_map: output.map,
                    ssr: self.ssr,
                })
                .await?;
        }

        let info = ModuleInfo::from_node(&node.read())
            .ok_or_else(|| skiff_common::Error::ModuleNotFound(id.to_string()))?;
        Ok(info)
    }

    pub fn get_module_info(&self, id: &str) -> Option<ModuleInfo> {
        let node = self.container.graph().get_module_by_id(id)?;
        let node = node.read();
        ModuleInfo::from_node(&node)
    }

    /// Every module id known to the graph; empty when nothing was requested
    /// yet.
    pub fn get_module_ids(&self) -> Vec<String> {
        self.container.graph().module_ids()
    }

    /// Register `id` with the container-wide watch set and this context's
    /// added imports; a live watcher starts watching immediately.
    pub fn add_watch_file(&self, id: &str) {
        self.added_imports.lock().insert(id.to_string());
        self.container.add_watch_file(id);
    }

    pub fn get_watch_files(&self) -> Vec<String> {
        self.container.watched_files()
    }

    /// Asset emission is a bundle-time feature; in serve mode it degrades to
    /// a warning and a placeholder reference so plugins stay loadable.
    pub fn emit_file(&self, name: &str) -> String {
        warn!(
            "plugin {} tried to emit file '{}'; emitFile is not supported in serve mode",
            self.active_plugin_name(),
            name
        );
        String::new()
    }

    pub fn set_asset_source(&self, reference_id: &str, _source: &[u8]) {
        warn!(
            "plugin {} tried to set the source of asset '{}'; setAssetSource is not supported in serve mode",
            self.active_plugin_name(),
            reference_id
        );
    }

    pub fn get_file_name(&self, reference_id: &str) -> String {
        warn!(
            "plugin {} asked for the file name of '{}'; getFileName is not supported in serve mode",
            self.active_plugin_name(),
            reference_id
        );
        String::new()
    }

    /// Emit an enriched warning attributed to the active plugin.
    pub fn warn(&self, err: impl Into<PluginError>, pos: Option<usize>) {
        let enriched = enrich_hook_error(
            skiff_common::Error::plugin(err.into()),
            pos,
            self,
            None,
        );
        warn!("{}", enriched);
    }

    /// Build the fatal, enriched form of a plugin failure. The hook returns
    /// the result as its error; the container propagates it unchanged.
    pub fn error(&self, err: impl Into<PluginError>, pos: Option<usize>) -> skiff_common::Error {
        enrich_hook_error(skiff_common::Error::plugin(err.into()), pos, self, None)
    }

    pub fn debug(&self, message: &str) {
        debug!("[{}] {}", self.active_plugin_name(), message);
    }

    pub fn info(&self, message: &str) {
        info!("[{}] {}", self.active_plugin_name(), message);
    }
}

/// Context for `transform` hooks: adds the transformed file's identity, the
/// original code, and the source-map chain.
pub struct TransformPluginContext {
    inner: PluginContext,
    pub(crate) filename: String,
    pub(crate) original_code: String,
    pub(crate) chain: Mutex<SourceMapChain>,
}

impl Deref for TransformPluginContext {
    type Target = PluginContext;

    fn deref(&self) -> &PluginContext {
        &self.inner
    }
}

impl TransformPluginContext {
    pub(crate) fn new(
        container: PluginContainer,
        filename: impl Into<String>,
        original_code: impl Into<String>,
        in_map: Option<SourceMapInput>,
        ssr: bool,
    ) -> Self {
        let filename = filename.into();
        let inner = PluginContext::new(container, None, None, ssr);
        *inner.active_id.lock() = Some(filename.clone());

        // A prior `load` on the same module may have added watch files; they
        // carry over so the transform sees the full set.
        if let Some(node) = inner.container.graph().get_module_by_id(&filename) {
            let node = node.read();
            let mut added = inner.added_imports.lock();
            for import in &node.added_imports {
                added.insert(import.clone());
            }
        }

        Self {
            inner,
            original_code: original_code.into(),
            chain: Mutex::new(SourceMapChain::new(in_map)),
            filename,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn original_code(&self) -> &str {
        &self.original_code
    }

    pub(crate) fn push_map(&self, input: SourceMapInput) {
        self.chain.lock().push_input(input);
    }

    /// Collapse the chain; may yield the empty sentinel or nothing at all.
    pub(crate) fn combined_sourcemap(&self) -> Result<Option<SourceMapData>> {
        self.chain
            .lock()
            .collapse(&self.filename, &self.original_code)
    }

    /// The combined map, substituting a high-resolution identity map when
    /// the chain collapsed to nothing meaningful.
    pub fn get_combined_sourcemap(&self) -> Result<SourceMapData> {
        match self.combined_sourcemap()? {
            Some(map) if !map.is_empty_sentinel() => Ok(map),
            _ => identity_map(&self.filename, &self.original_code),
        }
    }

    /// Transform-aware variant of [`PluginContext::error`]: locations remap
    /// through the combined map to the original source.
    pub fn error(&self, err: impl Into<PluginError>, pos: Option<usize>) -> skiff_common::Error {
        enrich_hook_error(
            skiff_common::Error::plugin(err.into()),
            pos,
            &self.inner,
            Some(self),
        )
    }

    pub fn warn(&self, err: impl Into<PluginError>, pos: Option<usize>) {
        let enriched = enrich_hook_error(
            skiff_common::Error::plugin(err.into()),
            pos,
            &self.inner,
            Some(self),
        );
        warn!("{}", enriched);
    }
}
