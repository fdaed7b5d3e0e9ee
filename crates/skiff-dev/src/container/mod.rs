//! The per-environment plugin container: the hook driver.
//!
//! Aggregation rules per hook:
//! - `options` folds sequentially at container creation
//! - `build_start` runs in parallel, with `sequential` barriers
//! - `resolve_id` and `load` are first-non-null in sorted order
//! - `transform` accumulates code through the sorted chain
//! - `watch_change` runs in parallel on one shared context
//! - `close` drains in-flight hooks, then `build_end`, then `close_bundle`
//!
//! Every hook entry is tracked so `close` can wait for outstanding work;
//! after close, request-serving hooks fail with `ERR_CLOSED_SERVER` unless
//! the environment was configured recoverable.

mod context;
mod hook_error;
mod source_map;

pub use context::{ContextResolveOptions, PluginContext, TransformPluginContext};

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{join_all, try_join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use skiff_common::{Error, MetaMap, Result, SourceMapInput, TransformResult};
use skiff_graph::ModuleGraph;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::container::hook_error::enrich_hook_error;
use crate::plugin::{
    sort_plugins, HookKind, HookLoadArgs, HookLoadOutput, HookResolveIdArgs, HookTransformArgs,
    InputOptions, SharedPlugin, WatchChangeKind,
};
use crate::utils::{is_external_url, normalize_id};
use crate::watch::WatchHandle;

/// Options for a container-level resolve.
#[derive(Debug, Clone, Default)]
pub struct ResolveIdOptions {
    /// Plugins (by registration index) excluded from this resolve chain.
    pub skip: Option<Arc<FxHashSet<usize>>>,
    pub is_entry: bool,
    pub scan: bool,
    pub ssr: bool,
    pub custom: Option<MetaMap>,
    pub attributes: Option<MetaMap>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub ssr: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Map produced by the preceding `load`, seeding the chain.
    pub in_map: Option<SourceMapInput>,
    pub ssr: bool,
}

/// Accumulated result of a resolve chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialResolvedId {
    pub id: String,
    pub external: Option<bool>,
    pub meta: Option<MetaMap>,
}

/// Add-on-start / remove-on-settle accounting of hook invocations.
struct HookTracker {
    active: AtomicUsize,
    notify: Notify,
}

impl HookTracker {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    fn start(&self) -> HookGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        HookGuard(self)
    }

    /// Wait until every started hook settled.
    async fn drain(&self) {
        loop {
            let notified = self.notify.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct HookGuard<'a>(&'a HookTracker);

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.notify.notify_waiters();
        }
    }
}

struct ContainerInner {
    plugins: Vec<SharedPlugin>,
    config: Arc<ResolvedConfig>,
    graph: Arc<ModuleGraph>,
    watcher: Option<Arc<WatchHandle>>,
    /// Whether in-flight requests may finish after close.
    recoverable: bool,
    options: RwLock<InputOptions>,
    watch_files: Mutex<FxHashSet<String>>,
    closed: AtomicBool,
    close_done: tokio::sync::Mutex<bool>,
    hooks: HookTracker,
    /// Debug-only cache of resolve outcomes; benign races are fine.
    seen_resolves: Mutex<FxHashMap<String, bool>>,
}

/// Cheap-clone handle to the container; contexts and the environment all
/// share the same inner state.
#[derive(Clone)]
pub struct PluginContainer {
    inner: Arc<ContainerInner>,
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContainer").finish_non_exhaustive()
    }
}

/// Non-owning container handle for long-lived callbacks (the module graph's
/// URL resolver), so the graph never keeps a closed container alive.
#[derive(Clone)]
pub struct WeakPluginContainer {
    inner: Weak<ContainerInner>,
}

impl WeakPluginContainer {
    pub fn upgrade(&self) -> Option<PluginContainer> {
        self.inner.upgrade().map(|inner| PluginContainer { inner })
    }
}

impl PluginContainer {
    /// Build the container and eagerly fold `input` through every `options`
    /// hook in sorted order.
    pub async fn new(
        plugins: Vec<SharedPlugin>,
        config: Arc<ResolvedConfig>,
        graph: Arc<ModuleGraph>,
        watcher: Option<Arc<WatchHandle>>,
        recoverable: bool,
        input: InputOptions,
    ) -> Result<Self> {
        let container = Self {
            inner: Arc::new(ContainerInner {
                plugins,
                config,
                graph,
                watcher,
                recoverable,
                options: RwLock::new(InputOptions::default()),
                watch_files: Mutex::new(FxHashSet::default()),
                closed: AtomicBool::new(false),
                close_done: tokio::sync::Mutex::new(false),
                hooks: HookTracker::new(),
                seen_resolves: Mutex::new(FxHashMap::default()),
            }),
        };

        let folded = container.fold_options(input).await?;
        *container.inner.options.write() = folded;
        Ok(container)
    }

    pub fn downgrade(&self) -> WeakPluginContainer {
        WeakPluginContainer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    async fn fold_options(&self, mut opts: InputOptions) -> Result<InputOptions> {
        for (_, plugin) in sort_plugins(&self.inner.plugins, HookKind::Options) {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::ClosedServer);
            }
            let _guard = self.inner.hooks.start();
            let ctx = PluginContext::new(self.clone(), None, None, false);
            if let Some(next) = plugin.options(&ctx, &opts).await? {
                opts = next;
            }
        }
        Ok(opts)
    }

    /// The folded input options.
    pub fn options(&self) -> InputOptions {
        self.inner.options.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn graph(&self) -> &Arc<ModuleGraph> {
        &self.inner.graph
    }

    pub(crate) fn plugin_name(&self, index: usize) -> Option<String> {
        self.inner
            .plugins
            .get(index)
            .map(|plugin| plugin.name().into_owned())
    }

    pub(crate) fn add_watch_file(&self, id: &str) {
        self.inner.watch_files.lock().insert(id.to_string());
        if let Some(watcher) = &self.inner.watcher {
            watcher.watch_path(Path::new(id));
        }
    }

    pub fn watched_files(&self) -> Vec<String> {
        self.inner.watch_files.lock().iter().cloned().collect()
    }

    fn ensure_serving(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) && !self.inner.recoverable {
            Err(Error::ClosedServer)
        } else {
            Ok(())
        }
    }

    /// Run `build_start` in parallel across all plugins. A `sequential`
    /// handler waits for everything scheduled before it and blocks what
    /// comes after.
    pub async fn build_start(&self) -> Result<()> {
        self.ensure_serving()?;
        let _guard = self.inner.hooks.start();
        let opts = self.options();

        let mut pending: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        for (index, plugin) in sort_plugins(&self.inner.plugins, HookKind::BuildStart) {
            let sequential = plugin.hook_meta(HookKind::BuildStart).sequential;
            let container = self.clone();
            let opts = opts.clone();
            let fut = async move {
                let ctx = PluginContext::new(container, Some(index), None, false);
                plugin.build_start(&ctx, &opts).await
            }
            .boxed();

            if sequential {
                try_join_all(std::mem::take(&mut pending)).await?;
                fut.await?;
            } else {
                pending.push(fut);
            }
        }
        try_join_all(pending).await?;
        Ok(())
    }

    pub async fn resolve_id(
        &self,
        raw_id: &str,
        importer: Option<&str>,
    ) -> Result<Option<PartialResolvedId>> {
        self.resolve_id_with(raw_id, importer, &ResolveIdOptions::default())
            .await
    }

    /// First-non-null resolve across sorted plugins, honoring the skip set.
    pub async fn resolve_id_with(
        &self,
        raw_id: &str,
        importer: Option<&str>,
        opts: &ResolveIdOptions,
    ) -> Result<Option<PartialResolvedId>> {
        self.ensure_serving()?;
        let _guard = self.inner.hooks.start();

        let default_importer = self
            .inner
            .config
            .root
            .join("index.html")
            .to_string_lossy()
            .into_owned();
        let importer = importer.unwrap_or(default_importer.as_str());

        let ctx = PluginContext::new(self.clone(), None, opts.skip.clone(), opts.ssr);
        let mut resolved: Option<PartialResolvedId> = None;

        for (index, plugin) in sort_plugins(&self.inner.plugins, HookKind::ResolveId) {
            if opts.skip.as_ref().is_some_and(|skip| skip.contains(&index)) {
                continue;
            }
            ctx.set_active_plugin(Some(index));

            let args = HookResolveIdArgs {
                specifier: raw_id,
                importer: Some(importer),
                attributes: opts.attributes.as_ref(),
                custom: opts.custom.as_ref(),
                is_entry: opts.is_entry,
                ssr: opts.ssr,
                scan: opts.scan,
            };
            let Some(output) = plugin.resolve_id(&ctx, args).await? else {
                continue;
            };

            debug!("resolved {} -> {} via {}", raw_id, output.id, plugin.name());
            let id = if is_external_url(&output.id) {
                output.id
            } else {
                normalize_id(&output.id)
            };
            resolved = Some(PartialResolvedId {
                id,
                external: output.external,
                meta: output.meta,
            });
            break;
        }

        let key = format!("{} -> {}", importer, raw_id);
        let first_seen = self
            .inner
            .seen_resolves
            .lock()
            .insert(key, resolved.is_some())
            .is_none();
        if first_seen && resolved.is_none() {
            debug!("no plugin resolved {} (importer: {})", raw_id, importer);
        }
        Ok(resolved)
    }

    /// First-non-null load across sorted plugins.
    ///
    /// Watch files added by load hooks land on the module node even when no
    /// plugin handled the load, so the subsequent transform inherits them.
    pub async fn load(&self, id: &str, opts: LoadOptions) -> Result<Option<HookLoadOutput>> {
        self.ensure_serving()?;
        let _guard = self.inner.hooks.start();

        let ctx = PluginContext::new(self.clone(), None, None, opts.ssr);
        *ctx.active_id.lock() = Some(id.to_string());

        let mut result = None;
        for (index, plugin) in sort_plugins(&self.inner.plugins, HookKind::Load) {
            ctx.set_active_plugin(Some(index));
            if let Some(output) = plugin.load(&ctx, HookLoadArgs { id, ssr: opts.ssr }).await? {
                if let Some(meta) = &output.meta {
                    self.update_module_info(id, meta);
                }
                result = Some(output);
                break;
            }
        }

        self.update_module_load_added_imports(id, &ctx);
        Ok(result)
    }

    /// Accumulating transform: each plugin sees its predecessor's output.
    pub async fn transform(
        &self,
        code: String,
        id: &str,
        opts: TransformOptions,
    ) -> Result<TransformResult> {
        self.ensure_serving()?;
        let _guard = self.inner.hooks.start();

        let ctx =
            TransformPluginContext::new(self.clone(), id, code.clone(), opts.in_map, opts.ssr);
        let mut code = code;

        for (index, plugin) in sort_plugins(&self.inner.plugins, HookKind::Transform) {
            // A close racing this chain surfaces at the next hook boundary
            // unless the environment is recoverable.
            self.ensure_serving()?;
            ctx.set_active_plugin(Some(index));
            *ctx.active_code.lock() = Some(code.clone());

            let args = HookTransformArgs {
                code: &code,
                id,
                ssr: opts.ssr,
            };
            let output = match plugin.transform(&ctx, args).await {
                Ok(output) => output,
                Err(err) => return Err(enrich_hook_error(err, None, &ctx, Some(&ctx))),
            };
            let Some(output) = output else { continue };

            if let Some(new_code) = output.code {
                code = new_code;
            }
            if let Some(map) = output.map {
                ctx.push_map(map);
            }
            if let Some(meta) = &output.meta {
                self.update_module_info(id, meta);
            }
        }

        let map = ctx.combined_sourcemap()?;
        Ok(TransformResult { code, map })
    }

    /// Route a file-change notification to every plugin in parallel on one
    /// shared context.
    pub async fn watch_change(&self, path: &str, kind: WatchChangeKind) -> Result<()> {
        let _guard = self.inner.hooks.start();
        let ctx = Arc::new(PluginContext::new(self.clone(), None, None, false));

        let mut pending: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        for (_, plugin) in sort_plugins(&self.inner.plugins, HookKind::WatchChange) {
            let sequential = plugin.hook_meta(HookKind::WatchChange).sequential;
            let ctx = Arc::clone(&ctx);
            let path = path.to_string();
            let fut = async move { plugin.watch_change(&ctx, &path, kind).await }.boxed();

            if sequential {
                try_join_all(std::mem::take(&mut pending)).await?;
                fut.await?;
            } else {
                pending.push(fut);
            }
        }
        try_join_all(pending).await?;
        Ok(())
    }

    /// Idempotent shutdown: drain in-flight hooks, then run the `build_end`
    /// and `close_bundle` phases, each fully settling before the next.
    pub async fn close(&self) -> Result<()> {
        let mut done = self.inner.close_done.lock().await;
        if *done {
            return Ok(());
        }
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.hooks.drain().await;

        let build_end = self.run_close_phase(HookKind::BuildEnd).await;
        let close_bundle = self.run_close_phase(HookKind::CloseBundle).await;
        *done = true;

        match (build_end, close_bundle) {
            (Err(e), _) => Err(e),
            (Ok(()), result) => result,
        }
    }

    /// Parallel phase with settle-all semantics: one plugin's failure never
    /// skips another's finalizer; the first error surfaces afterwards.
    async fn run_close_phase(&self, hook: HookKind) -> Result<()> {
        fn settle(results: Vec<Result<()>>, first_err: &mut Option<Error>) {
            for result in results {
                if let Err(e) = result {
                    if first_err.is_none() {
                        *first_err = Some(e);
                    }
                }
            }
        }

        let mut pending: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        let mut first_err: Option<Error> = None;

        for (index, plugin) in sort_plugins(&self.inner.plugins, hook) {
            let sequential = plugin.hook_meta(hook).sequential;
            let container = self.clone();
            let fut = async move {
                let ctx = PluginContext::new(container, Some(index), None, false);
                match hook {
                    HookKind::BuildEnd => plugin.build_end(&ctx, None).await,
                    HookKind::CloseBundle => plugin.close_bundle(&ctx).await,
                    _ => Ok(()),
                }
            }
            .boxed();

            if sequential {
                settle(join_all(std::mem::take(&mut pending)).await, &mut first_err);
                settle(vec![fut.await], &mut first_err);
            } else {
                pending.push(fut);
            }
        }
        settle(join_all(pending).await, &mut first_err);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn update_module_info(&self, id: &str, meta: &MetaMap) {
        if let Some(node) = self.inner.graph.get_module_by_id(id) {
            node.write().merge_meta(meta);
        }
    }

    fn update_module_load_added_imports(&self, id: &str, ctx: &PluginContext) {
        let added = ctx.added_imports.lock();
        if added.is_empty() {
            return;
        }
        if let Some(node) = self.inner.graph.get_module_by_id(id) {
            let mut node = node.write();
            for import in added.iter() {
                node.added_imports.insert(import.clone());
            }
        }
    }
}

/// Backward-compatibility facade over per-environment containers.
///
/// Legacy callers pass an `ssr` flag instead of an environment; this wrapper
/// dispatches to the right container. New code should hold the environment's
/// container directly.
pub struct CompatPluginContainer {
    client: PluginContainer,
    ssr: Option<PluginContainer>,
}

impl CompatPluginContainer {
    pub fn new(client: PluginContainer, ssr: Option<PluginContainer>) -> Self {
        Self { client, ssr }
    }

    fn pick(&self, ssr: bool) -> &PluginContainer {
        if ssr {
            self.ssr.as_ref().unwrap_or(&self.client)
        } else {
            &self.client
        }
    }

    pub async fn resolve_id(
        &self,
        raw_id: &str,
        importer: Option<&str>,
        ssr: bool,
    ) -> Result<Option<PartialResolvedId>> {
        self.pick(ssr).resolve_id(raw_id, importer).await
    }

    pub async fn load(&self, id: &str, ssr: bool) -> Result<Option<HookLoadOutput>> {
        self.pick(ssr).load(id, LoadOptions { ssr }).await
    }

    pub async fn transform(&self, code: String, id: &str, ssr: bool) -> Result<TransformResult> {
        self.pick(ssr)
            .transform(code, id, TransformOptions { in_map: None, ssr })
            .await
    }
}
