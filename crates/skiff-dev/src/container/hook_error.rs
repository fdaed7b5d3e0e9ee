//! Hook-error enrichment.
//!
//! Whatever a plugin hook fails with is annotated with the active plugin,
//! the active module id, the code being transformed, a source location, and
//! a code frame. Inside a transform the location is additionally remapped
//! through the combined source map so it points at the original source, not
//! the intermediate code the failing plugin saw.

use skiff_common::{generate_code_frame, offset_to_pos, Error, ErrorLoc, PluginError};
use tracing::error;

use crate::container::context::{PluginContext, TransformPluginContext};
use crate::container::source_map::original_position_for;

pub(crate) fn enrich_hook_error(
    err: Error,
    pos: Option<usize>,
    ctx: &PluginContext,
    transform: Option<&TransformPluginContext>,
) -> Error {
    // Named sentinels keep their identity; callers dispatch on their codes.
    if matches!(err, Error::ClosedServer | Error::OutdatedOptimizedDep(_)) {
        return err;
    }

    let mut plugin_error = match err {
        // A plugin that already used `ctx.error` produced an enriched error.
        Error::Plugin(inner) if inner.is_enriched() => return Error::Plugin(inner),
        Error::Plugin(inner) => *inner,
        other => PluginError::new(other.to_string()),
    };

    if plugin_error.plugin.is_none() {
        plugin_error.plugin = Some(ctx.active_plugin_name());
    }
    let active_id = ctx.active_id.lock().clone();
    if plugin_error.id.is_none() {
        plugin_error.id = active_id;
    }
    let active_code = ctx.active_code.lock().clone();
    if let Some(code) = &active_code {
        plugin_error.plugin_code = Some(code.clone());
    }

    // Compute a location: a byte offset beats a pre-existing loc.
    let offset = pos.or(plugin_error.pos);
    if let (Some(offset), Some(code)) = (offset, active_code.as_deref()) {
        match offset_to_pos(code, offset) {
            Some((line, column)) => {
                let loc = ErrorLoc {
                    file: plugin_error.id.clone(),
                    line,
                    column,
                };
                let frame = generate_code_frame(code, &loc);
                if !frame.is_empty() {
                    plugin_error.frame = Some(frame);
                }
                plugin_error.loc = Some(loc);
            }
            None => {
                error!(
                    "failed to translate byte offset {} into a position for {}",
                    offset,
                    plugin_error.id.as_deref().unwrap_or("<unknown>")
                );
                return Error::Plugin(Box::new(plugin_error));
            }
        }
    } else if let Some(loc) = plugin_error.loc.clone() {
        if plugin_error.frame.is_none() {
            // Frame from the referenced file, falling back to the code in
            // flight. Read failures are swallowed; the frame is best-effort.
            let content = loc
                .file
                .as_deref()
                .and_then(|file| std::fs::read_to_string(file).ok())
                .or_else(|| active_code.clone());
            if let Some(content) = content {
                let frame = generate_code_frame(&content, &loc);
                if !frame.is_empty() {
                    plugin_error.frame = Some(frame);
                }
            }
        }
    }

    // Inside a transform, point the location at the original source.
    if let (Some(transform), Some(loc)) = (transform, plugin_error.loc.clone()) {
        if let Ok(Some(map)) = transform.combined_sourcemap() {
            if let Some((source, line, column)) =
                original_position_for(&map, loc.line, loc.column)
            {
                plugin_error.loc = Some(ErrorLoc {
                    file: source.or(loc.file),
                    line,
                    column,
                });
            }
        }
    }

    Error::Plugin(Box::new(plugin_error))
}
