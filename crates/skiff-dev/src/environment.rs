//! A named execution context bundling configuration, a module graph, a hot
//! channel, a deps optimizer, and the plugin container.
//!
//! The container is built lazily in [`DevEnvironment::init`]; everything
//! request-shaped flows through [`DevEnvironment::transform_request`], which
//! dedupes concurrent work per URL and feeds the crawl-end finder.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use skiff_common::{Error, Result, TransformResult};
use skiff_graph::ModuleGraph;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{DevOptions, EnvironmentOptions, OptimizeDepsOptions, ResolvedConfig};
use crate::container::PluginContainer;
use crate::crawl::{CrawlEndFinder, CrawlOutcome};
use crate::deps_optimizer::{create_deps_optimizer, DepsOptimizer};
use crate::hot::{HotChannel, HotPayload, HotUpdate, NoopHotChannel};
use crate::plugin::{InputOptions, SharedPlugin, WatchChangeKind};
use crate::transform_request;
use crate::watch::WatchHandle;

/// A module fetched for an environment's runner.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedModule {
    Inline { id: String, code: String },
    External { url: String },
}

/// Executes modules on behalf of an environment (out of process, in a VM,
/// etc.). Out of scope here beyond this seam.
#[async_trait]
pub trait ModuleRunner: Send + Sync {
    /// Called once during environment init so the runner can attach itself.
    async fn register(&self, _environment: &DevEnvironment) -> Result<()> {
        Ok(())
    }

    async fn fetch_module(
        &self,
        environment: &DevEnvironment,
        id: &str,
        importer: Option<&str>,
    ) -> Result<FetchedModule>;
}

/// Collaborators an environment is constructed with.
#[derive(Default)]
pub struct EnvironmentSetup {
    /// `None` disables hot updates; the environment falls back to a noop
    /// channel.
    pub hot: Option<Arc<dyn HotChannel>>,
    pub watcher: Option<Arc<WatchHandle>>,
    /// Overrides applied on top of the name's configured options.
    pub options: Option<EnvironmentOptions>,
    pub deps_optimizer: Option<Arc<dyn DepsOptimizer>>,
    pub runner: Option<Arc<dyn ModuleRunner>>,
}

/// One in-flight transform request, shared between duplicate callers.
struct PendingRequest {
    rx: watch::Receiver<Option<Result<TransformResult, Arc<Error>>>>,
    started_at: Instant,
    handle: JoinHandle<()>,
}

pub struct DevEnvironment {
    name: String,
    config: Arc<ResolvedConfig>,
    dev_options: DevOptions,
    optimize_deps_options: OptimizeDepsOptions,
    plugins: Vec<SharedPlugin>,
    graph: Arc<ModuleGraph>,
    hot: Arc<dyn HotChannel>,
    watcher: Option<Arc<WatchHandle>>,
    deps_optimizer: Option<Arc<dyn DepsOptimizer>>,
    runner: Option<Arc<dyn ModuleRunner>>,
    container: tokio::sync::OnceCell<PluginContainer>,
    crawl: CrawlEndFinder,
    pending: Mutex<FxHashMap<String, PendingRequest>>,
    closing: AtomicBool,
    /// Legacy flag forwarded to plugins that still dispatch on it.
    legacy_ssr: bool,
    /// Self-handle for the request tasks this environment spawns.
    me: Weak<DevEnvironment>,
}

impl DevEnvironment {
    /// Create an environment named `name`. Names identify environments
    /// within a server and must be unique there.
    pub fn new(
        name: impl Into<String>,
        config: Arc<ResolvedConfig>,
        plugins: Vec<SharedPlugin>,
        setup: EnvironmentSetup,
    ) -> Arc<Self> {
        let name = name.into();
        let (dev_options, optimize_deps_options) =
            config.environment_options(&name, setup.options.as_ref());
        let hot: Arc<dyn HotChannel> = setup.hot.unwrap_or_else(|| Arc::new(NoopHotChannel));
        let deps_optimizer =
            create_deps_optimizer(&name, &optimize_deps_options, setup.deps_optimizer);
        let legacy_ssr = name != "client";

        let environment = Arc::new_cyclic(|me| Self {
            name,
            config,
            dev_options,
            optimize_deps_options,
            plugins,
            graph: Arc::new(ModuleGraph::new()),
            hot,
            watcher: setup.watcher,
            deps_optimizer,
            runner: setup.runner,
            container: tokio::sync::OnceCell::new(),
            crawl: CrawlEndFinder::new(),
            pending: Mutex::new(FxHashMap::default()),
            closing: AtomicBool::new(false),
            legacy_ssr,
            me: me.clone(),
        });

        let weak = Arc::downgrade(&environment);
        environment.hot.on(
            "hmr-invalidate",
            Arc::new(move |data| {
                if let Some(environment) = weak.upgrade() {
                    environment.handle_hmr_invalidate(data);
                }
            }),
        );
        environment
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Environments built here always run in dev mode.
    pub fn mode(&self) -> &'static str {
        "dev"
    }

    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.config
    }

    pub fn module_graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    pub fn hot(&self) -> &Arc<dyn HotChannel> {
        &self.hot
    }

    pub fn deps_optimizer(&self) -> Option<&Arc<dyn DepsOptimizer>> {
        self.deps_optimizer.as_ref()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn legacy_ssr(&self) -> bool {
        self.legacy_ssr
    }

    /// Build the plugin container and wire the graph's URL resolver to it.
    /// Idempotent; concurrent calls share one initialization.
    pub async fn init(&self) -> Result<()> {
        self.container
            .get_or_try_init(|| async {
                let input = InputOptions {
                    entries: Vec::new(),
                    external: self.config.resolve.external.clone(),
                };
                let container = PluginContainer::new(
                    self.plugins.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.graph),
                    self.watcher.clone(),
                    self.dev_options.recoverable,
                    input,
                )
                .await?;

                let weak = container.downgrade();
                self.graph.set_resolver(Arc::new(move |url: String| {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(container) => Ok(container
                                .resolve_id(&url, None)
                                .await?
                                .map(|resolved| resolved.id)),
                            None => Ok(None),
                        }
                    }
                    .boxed()
                }));
                if let Some(runner) = &self.runner {
                    runner.register(self).await?;
                }
                Ok(container)
            })
            .await
            .map(|_| ())
    }

    /// The environment's container. Fails before [`DevEnvironment::init`].
    pub fn plugin_container(&self) -> Result<PluginContainer> {
        self.container.get().cloned().ok_or_else(|| {
            Error::Custom(format!(
                "environment '{}' is not initialized\n\nHint: call init() before serving requests",
                self.name
            ))
        })
    }

    /// Drive a URL through resolve -> load -> transform, deduplicating
    /// concurrent requests for the same URL.
    pub async fn transform_request(&self, url: &str) -> Result<TransformResult> {
        if self.is_closing() && !self.dev_options.recoverable {
            return Err(Error::ClosedServer);
        }
        // The task needs an owned handle; absent one, we are mid-teardown.
        let Some(environment) = self.me.upgrade() else {
            return Err(Error::ClosedServer);
        };

        let rx = {
            let mut pending = self.pending.lock();
            if let Some(request) = pending.get(url) {
                request.rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                let owned_url = url.to_string();
                let handle = tokio::spawn(async move {
                    let result = transform_request::run(&environment, &owned_url)
                        .await
                        .map_err(Arc::new);
                    let _ = tx.send(Some(result));
                    environment.pending.lock().remove(&owned_url);
                });
                pending.insert(
                    url.to_string(),
                    PendingRequest {
                        rx: rx.clone(),
                        started_at: Instant::now(),
                        handle,
                    },
                );

                let crawl_rx = rx.clone();
                self.crawl
                    .register_request_processing(url, settled(crawl_rx));
                rx
            }
        };

        await_request(rx).await
    }

    /// Pre-transform every URL configured under `dev.warmup`.
    pub async fn warmup(&self) {
        for url in self.dev_options.warmup.clone() {
            self.warmup_request(&url).await;
        }
    }

    /// Best-effort pre-transform. Expected shutdown/optimizer races are
    /// swallowed; real failures are logged, never re-thrown.
    pub async fn warmup_request(&self, url: &str) {
        match self.transform_request(url).await {
            Ok(_) => {}
            Err(e) if e.is_closed_server() || e.is_outdated_optimized_dep() => {}
            Err(e) => error!("warmup of '{}' failed: {}", url, e),
        }
    }

    /// Fetch a module through the environment's runner.
    pub async fn fetch_module(
        &self,
        id: &str,
        importer: Option<&str>,
    ) -> Result<FetchedModule> {
        match &self.runner {
            Some(runner) => runner.fetch_module(self, id, importer).await,
            None => Err(Error::Custom(format!(
                "environment '{}' has no module runner registered",
                self.name
            ))),
        }
    }

    /// Route a file change into the container's `watch_change` hook.
    pub async fn watch_change(&self, path: &str, kind: WatchChangeKind) -> Result<()> {
        let container = self.plugin_container()?;
        container.watch_change(path, kind).await
    }

    /// Resolves once the initial crawl quiesces (or the environment shuts
    /// down first; the outcome carries the tag).
    pub async fn wait_for_requests_idle(&self, ignored_id: Option<&str>) -> CrawlOutcome {
        self.crawl.wait_for_requests_idle(ignored_id).await
    }

    /// Track externally-driven request work in the crawl-end accounting.
    pub fn register_request_processing(
        &self,
        id: &str,
        done: impl Future<Output = ()> + Send + 'static,
    ) {
        self.crawl.register_request_processing(id, done);
    }

    /// Append a one-shot callback run when the initial crawl ends.
    pub fn on_crawl_end(&self, callback: impl FnOnce() + Send + 'static) {
        self.crawl.on_crawl_end(callback);
    }

    /// Shut the environment down: stop hot traffic, cancel crawl tracking,
    /// settle in-flight requests, then close the container and optimizer.
    pub async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.hot.close();
        self.crawl.cancel();

        let pending: Vec<(String, PendingRequest)> =
            self.pending.lock().drain().collect();
        for (url, request) in &pending {
            debug!(
                "aborting pending request {} ({}ms old)",
                url,
                request.started_at.elapsed().as_millis()
            );
            request.handle.abort();
        }
        for (_, request) in pending {
            settled(request.rx).await;
        }

        let container_result = match self.container.get() {
            Some(container) => container.close().await,
            None => Ok(()),
        };
        if let Some(optimizer) = &self.deps_optimizer {
            optimizer.close().await;
        }
        container_result
    }

    /// React to a client-sent `hmr-invalidate`: a self-accepting module that
    /// failed to apply an update asks the server to propagate to its
    /// importers instead. Repeat invalidations for the same wave are
    /// ignored.
    fn handle_hmr_invalidate(&self, data: Value) {
        if self.is_closing() {
            return;
        }
        let Some(path) = data.get("path").and_then(Value::as_str) else {
            return;
        };
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(node) = self.graph.get_module_by_url(path) else {
            return;
        };
        let (timestamp, importers) = {
            let mut node = node.write();
            let eligible = node.is_self_accepting
                && node.last_hmr_timestamp > 0
                && !node.last_hmr_invalidation_received;
            if !eligible {
                return;
            }
            node.last_hmr_invalidation_received = true;
            (
                node.last_hmr_timestamp,
                node.importers.iter().cloned().collect::<Vec<_>>(),
            )
        };

        info!(
            "[{}] hmr invalidate {}{}",
            self.name,
            path,
            if message.is_empty() {
                String::new()
            } else {
                format!(": {}", message)
            }
        );
        self.update_modules(path, &importers, timestamp, true);
    }

    /// Invalidate `modules` and notify the hot channel: a self-accepting
    /// boundary gets a targeted update, anything else falls back to a full
    /// reload.
    pub(crate) fn update_modules(
        &self,
        trigger: &str,
        modules: &[String],
        timestamp: u64,
        is_invalidation: bool,
    ) {
        if modules.is_empty() {
            self.hot.send(HotPayload::FullReload {
                path: Some(trigger.to_string()),
            });
            return;
        }

        let mut updates = Vec::new();
        let mut needs_full_reload = false;
        for url in modules {
            let mut seen = FxHashSet::default();
            self.graph
                .invalidate_module(url, &mut seen, timestamp, is_invalidation);

            match self.graph.get_module_by_url(url) {
                Some(node) if node.read().is_self_accepting => updates.push(HotUpdate {
                    path: url.clone(),
                    timestamp,
                }),
                _ => needs_full_reload = true,
            }
        }

        if needs_full_reload {
            self.hot.send(HotPayload::FullReload {
                path: Some(trigger.to_string()),
            });
        } else {
            self.hot.send(HotPayload::Update { updates });
        }
    }

    #[allow(dead_code)]
    pub(crate) fn optimize_deps_options(&self) -> &OptimizeDepsOptions {
        &self.optimize_deps_options
    }
}

/// Future that resolves when a pending request settles, however it settles.
async fn settled(mut rx: watch::Receiver<Option<Result<TransformResult, Arc<Error>>>>) {
    loop {
        if rx.borrow().is_some() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn await_request(
    mut rx: watch::Receiver<Option<Result<TransformResult, Arc<Error>>>>,
) -> Result<TransformResult> {
    loop {
        {
            let value = rx.borrow();
            if let Some(result) = value.as_ref() {
                return match result {
                    Ok(transformed) => Ok(transformed.clone()),
                    Err(shared) => Err(Error::from_shared(shared)),
                };
            }
        }
        // An aborted request drops its sender without publishing a result.
        if rx.changed().await.is_err() {
            return Err(Error::ClosedServer);
        }
    }
}
