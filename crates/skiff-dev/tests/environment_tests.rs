//! Environment-level behavior: the transform-request pipeline, crawl-end
//! accounting, HMR invalidation, and shutdown.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use skiff_dev::{
    DevEnvironment, EnvironmentSetup, HookLoadArgs, HookLoadOutput, HookLoadReturn,
    HookTransformArgs, HookTransformOutput, HookTransformReturn, HotChannel, HotPayload,
    HotUpdate, LocalHotChannel, Plugin, PluginContext, ResolvedConfig, SharedPlugin,
    TransformPluginContext,
};

fn test_config() -> Arc<ResolvedConfig> {
    Arc::new(ResolvedConfig::new("/project"))
}

/// Serves every id from memory so tests never touch the filesystem.
struct MemoryLoader {
    delay: Duration,
    loads: Arc<AtomicUsize>,
}

impl MemoryLoader {
    fn instant() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            loads: Default::default(),
        })
    }

    fn slow(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            loads: Default::default(),
        })
    }
}

#[async_trait]
impl Plugin for MemoryLoader {
    fn name(&self) -> Cow<'static, str> {
        "memory-loader".into()
    }

    async fn load(&self, _ctx: &PluginContext, args: HookLoadArgs<'_>) -> HookLoadReturn {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Some(HookLoadOutput {
            code: format!("source({})", args.id),
            ..Default::default()
        }))
    }
}

struct Upcaser;

#[async_trait]
impl Plugin for Upcaser {
    fn name(&self) -> Cow<'static, str> {
        "upcaser".into()
    }

    async fn transform(
        &self,
        _ctx: &TransformPluginContext,
        args: HookTransformArgs<'_>,
    ) -> HookTransformReturn {
        Ok(Some(HookTransformOutput {
            code: Some(args.code.to_uppercase()),
            ..Default::default()
        }))
    }
}

fn make_env(plugins: Vec<SharedPlugin>) -> Arc<DevEnvironment> {
    DevEnvironment::new("client", test_config(), plugins, EnvironmentSetup::default())
}

#[tokio::test]
async fn test_plugin_container_access_before_init_fails() {
    let environment = make_env(vec![]);
    let err = environment.plugin_container().unwrap_err();
    assert!(err.to_string().contains("not initialized"));

    environment.init().await.unwrap();
    assert!(environment.plugin_container().is_ok());
}

#[tokio::test]
async fn test_transform_request_runs_pipeline_and_caches() {
    let loader = MemoryLoader::instant();
    let loads = Arc::clone(&loader.loads);
    let environment = make_env(vec![loader, Arc::new(Upcaser)]);
    environment.init().await.unwrap();

    let result = environment.transform_request("/src/main.ts").await.unwrap();
    assert_eq!(result.code, "SOURCE(/SRC/MAIN.TS)");

    // Second request is served from the module node's cached result.
    let again = environment.transform_request("/src/main.ts").await.unwrap();
    assert_eq!(again.code, result.code);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_requests_for_same_url_share_work() {
    let loader = MemoryLoader::slow(50);
    let loads = Arc::clone(&loader.loads);
    let environment = make_env(vec![loader]);
    environment.init().await.unwrap();

    let (a, b) = tokio::join!(
        environment.transform_request("/src/app.ts"),
        environment.transform_request("/src/app.ts"),
    );
    assert_eq!(a.unwrap().code, "source(/src/app.ts)");
    assert_eq!(b.unwrap().code, "source(/src/app.ts)");
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_crawl_end_fires_exactly_once() {
    let environment = make_env(vec![MemoryLoader::instant()]);
    environment.init().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);
    environment.on_crawl_end(move || {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
    });

    environment.transform_request("/a.ts").await.unwrap();
    environment.transform_request("/b.ts").await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // New work after the crawl ended does not re-fire the callback.
    environment.transform_request("/c.ts").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wait_for_requests_idle_resolves() {
    let environment = make_env(vec![MemoryLoader::instant()]);
    environment.init().await.unwrap();

    environment.transform_request("/a.ts").await.unwrap();
    let outcome = environment.wait_for_requests_idle(None).await;
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn test_hmr_invalidate_propagates_to_importers_once() {
    let hot = Arc::new(LocalHotChannel::new());
    let environment = DevEnvironment::new(
        "client",
        test_config(),
        vec![MemoryLoader::instant()],
        EnvironmentSetup {
            hot: Some(hot.clone()),
            ..Default::default()
        },
    );
    environment.init().await.unwrap();

    let graph = environment.module_graph();
    graph.ensure_entry_from_url("/m.js").await.unwrap();
    graph.ensure_entry_from_url("/i1.js").await.unwrap();
    graph.add_import_link("/i1.js", "/m.js");

    {
        let module = graph.get_module_by_url("/m.js").unwrap();
        let mut module = module.write();
        module.is_self_accepting = true;
        module.last_hmr_timestamp = 100;
    }
    {
        let importer = graph.get_module_by_url("/i1.js").unwrap();
        importer.write().is_self_accepting = true;
    }

    hot.emit("hmr-invalidate", json!({"path": "/m.js", "message": "update failed"}));

    let module = graph.get_module_by_url("/m.js").unwrap();
    assert!(module.read().last_hmr_invalidation_received);

    let sent = hot.take_sent();
    assert_eq!(
        sent,
        vec![HotPayload::Update {
            updates: vec![HotUpdate {
                path: "/i1.js".into(),
                timestamp: 100,
            }],
        }]
    );

    // The same wave invalidating again is a no-op.
    hot.emit("hmr-invalidate", json!({"path": "/m.js"}));
    assert!(hot.take_sent().is_empty());
}

#[tokio::test]
async fn test_closed_environment_rejects_new_requests() {
    let environment = make_env(vec![MemoryLoader::instant()]);
    environment.init().await.unwrap();
    environment.close().await.unwrap();

    let err = environment.transform_request("/a.ts").await.unwrap_err();
    assert_eq!(err.code(), Some("ERR_CLOSED_SERVER"));

    // Warmup swallows the shutdown race instead of surfacing it.
    environment.warmup_request("/a.ts").await;
}

#[tokio::test]
async fn test_close_aborts_in_flight_requests() {
    let environment = make_env(vec![MemoryLoader::slow(200)]);
    environment.init().await.unwrap();

    let in_flight = {
        let environment = Arc::clone(&environment);
        tokio::spawn(async move { environment.transform_request("/slow.ts").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    environment.close().await.unwrap();
    let result = in_flight.await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_warmup_swallows_missing_modules() {
    // No loader: the pipeline falls back to the filesystem and misses.
    let environment = make_env(vec![]);
    environment.init().await.unwrap();
    environment.warmup_request("/definitely/not/here.ts").await;
}

#[tokio::test]
async fn test_deps_optimizer_selection_follows_environment_name() {
    let client = make_env(vec![]);
    assert!(client.deps_optimizer().is_some());

    let ssr = DevEnvironment::new("ssr", test_config(), vec![], EnvironmentSetup::default());
    let optimizer = ssr.deps_optimizer().unwrap();
    optimizer.register_missing_import("react", "/node_modules/react/index.js");
    // Explicit-only environments ignore discovered imports.
    assert!(!optimizer.is_optimized_dep("react"));
}
