//! The hook protocol driven by the plugin container.
//!
//! A plugin implements any subset of the hooks; unimplemented hooks default
//! to "not handled". Per-hook ordering and barrier behavior is declared
//! through [`Plugin::hook_meta`] rather than per-hook wrapper objects: the
//! handler is the trait method itself.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use skiff_common::{Error, MetaMap, Result, SourceMapInput};

use crate::container::{PluginContext, TransformPluginContext};

pub type SharedPlugin = Arc<dyn Plugin>;

/// The hooks a plugin can participate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Options,
    BuildStart,
    ResolveId,
    Load,
    Transform,
    WatchChange,
    BuildEnd,
    CloseBundle,
}

/// Position of a plugin's handler within a hook's execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum HookOrder {
    Pre,
    #[default]
    Normal,
    Post,
}

/// Per-hook scheduling metadata.
///
/// `sequential` only affects the parallel hooks (`build_start`, `build_end`,
/// `watch_change`, `close_bundle`): a sequential handler waits for every
/// previously started handler to settle and blocks later ones until it
/// finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookMeta {
    pub order: HookOrder,
    pub sequential: bool,
}

impl HookMeta {
    pub fn pre() -> Self {
        Self {
            order: HookOrder::Pre,
            ..Self::default()
        }
    }

    pub fn post() -> Self {
        Self {
            order: HookOrder::Post,
            ..Self::default()
        }
    }
}

/// Options folded through the `options` hook at container creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputOptions {
    pub entries: Vec<String>,
    pub external: Vec<String>,
}

/// The change kind routed to `watch_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchChangeKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub struct HookResolveIdArgs<'a> {
    pub specifier: &'a str,
    pub importer: Option<&'a str>,
    /// Import attributes carried by the importing statement.
    pub attributes: Option<&'a MetaMap>,
    /// Plugin-to-plugin custom resolve data.
    pub custom: Option<&'a MetaMap>,
    pub is_entry: bool,
    /// Legacy flag kept for plugins that still switch on it; the environment
    /// itself is the real execution scope.
    pub ssr: bool,
    /// Set during dependency scanning.
    pub scan: bool,
}

/// A single plugin's answer to `resolve_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookResolveIdOutput {
    pub id: String,
    pub external: Option<bool>,
    pub meta: Option<MetaMap>,
}

impl HookResolveIdOutput {
    /// The common case: a bare id, nothing else to say.
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HookLoadArgs<'a> {
    pub id: &'a str,
    pub ssr: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HookLoadOutput {
    pub code: String,
    pub map: Option<SourceMapInput>,
    pub meta: Option<MetaMap>,
}

#[derive(Debug, Clone, Copy)]
pub struct HookTransformArgs<'a> {
    pub code: &'a str,
    pub id: &'a str,
    pub ssr: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HookTransformOutput {
    /// Replacement code; `None` leaves the accumulated code untouched.
    pub code: Option<String>,
    pub map: Option<SourceMapInput>,
    pub meta: Option<MetaMap>,
}

pub type HookResolveIdReturn = Result<Option<HookResolveIdOutput>>;
pub type HookLoadReturn = Result<Option<HookLoadOutput>>;
pub type HookTransformReturn = Result<Option<HookTransformOutput>>;
pub type HookNoopReturn = Result<()>;

/// A dev-server plugin.
///
/// Hooks follow the Rollup aggregation rules: `options` folds, `resolve_id`
/// and `load` are first-non-null, `transform` accumulates, and the remaining
/// hooks run in parallel subject to [`HookMeta::sequential`] barriers.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> Cow<'static, str>;

    fn hook_meta(&self, _hook: HookKind) -> HookMeta {
        HookMeta::default()
    }

    /// Adjust the container's input options. Returning `None` keeps the
    /// previous options.
    async fn options(
        &self,
        _ctx: &PluginContext,
        _opts: &InputOptions,
    ) -> Result<Option<InputOptions>> {
        Ok(None)
    }

    async fn build_start(&self, _ctx: &PluginContext, _opts: &InputOptions) -> HookNoopReturn {
        Ok(())
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext,
        _args: HookResolveIdArgs<'_>,
    ) -> HookResolveIdReturn {
        Ok(None)
    }

    async fn load(&self, _ctx: &PluginContext, _args: HookLoadArgs<'_>) -> HookLoadReturn {
        Ok(None)
    }

    async fn transform(
        &self,
        _ctx: &TransformPluginContext,
        _args: HookTransformArgs<'_>,
    ) -> HookTransformReturn {
        Ok(None)
    }

    async fn watch_change(
        &self,
        _ctx: &PluginContext,
        _path: &str,
        _kind: WatchChangeKind,
    ) -> HookNoopReturn {
        Ok(())
    }

    async fn build_end(&self, _ctx: &PluginContext, _err: Option<&Error>) -> HookNoopReturn {
        Ok(())
    }

    async fn close_bundle(&self, _ctx: &PluginContext) -> HookNoopReturn {
        Ok(())
    }
}

/// Sort plugins for a hook: `pre` before default before `post`, input order
/// preserved within each tier. Returns each plugin with its index in the
/// input list, which is the identity used by resolve-skip sets.
pub fn sort_plugins(plugins: &[SharedPlugin], hook: HookKind) -> Vec<(usize, SharedPlugin)> {
    let mut sorted: Vec<(usize, SharedPlugin)> =
        plugins.iter().cloned().enumerate().collect();
    // Stable sort, so ties keep registration order.
    sorted.sort_by_key(|(_, plugin)| plugin.hook_meta(hook).order);
    sorted
}
