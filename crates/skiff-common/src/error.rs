//! Error types shared across the skiff dev server.
//!
//! Two layers:
//! - [`PluginError`] is the enriched, plugin-attributed failure produced by
//!   hook execution (plugin name, module id, source location, code frame).
//! - [`Error`] is the crate-wide error enum. The `ClosedServer` and
//!   `OutdatedOptimizedDep` variants carry stable string codes that upstream
//!   callers match on to map failures to a retryable response.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A position inside a source file.
///
/// Lines are 1-indexed, columns are 0-indexed, matching the convention used
/// by source maps and by plugin-reported locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLoc {
    /// File the location points into, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for ErrorLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// An error raised by or attributed to a plugin hook.
///
/// Built by hook execution from whatever the plugin threw: the container
/// attaches the active plugin, the active module id and (inside a transform)
/// the code being transformed, then computes a location and a code frame.
/// `plugin_code` being set marks the error as already enriched; enrichment is
/// idempotent on such errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginError {
    pub message: String,
    /// Name of the plugin the failure is attributed to.
    pub plugin: Option<String>,
    /// Module id being processed when the hook failed.
    pub id: Option<String>,
    /// The code the failing transform was operating on.
    pub plugin_code: Option<String>,
    /// Byte offset into `plugin_code`, when the plugin reported one.
    pub pos: Option<usize>,
    pub loc: Option<ErrorLoc>,
    /// Multi-line code frame pointing at `loc`.
    pub frame: Option<String>,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach a byte offset the enricher will translate to a line/column.
    pub fn with_pos(mut self, pos: usize) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn with_loc(mut self, loc: ErrorLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    /// Whether this error already went through hook-error enrichment.
    pub fn is_enriched(&self) -> bool {
        self.plugin_code.is_some()
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(plugin) = &self.plugin {
            write!(f, "[plugin {}] ", plugin)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({})", loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for PluginError {}

/// Crate-wide error type for the skiff dev server.
#[derive(Debug, Error)]
pub enum Error {
    /// A plugin hook failed; carries full attribution and location.
    #[error(transparent)]
    Plugin(Box<PluginError>),

    /// A request-serving hook was invoked after the environment closed and
    /// the environment is not recoverable. Mapped upstream to HTTP 504.
    #[error("server is closed")]
    ClosedServer,

    /// The deps optimizer invalidated a pre-bundled dependency while a
    /// request was in flight. Expected during re-optimization; callers retry.
    #[error("optimized dependency '{0}' is outdated")]
    OutdatedOptimizedDep(String),

    /// The module graph could not produce a node for the requested id.
    #[error("module '{0}' is not in the module graph")]
    ModuleNotFound(String),

    /// A plugin read a `ModuleInfo` field the dev server does not back.
    #[error("module info field '{0}' is not supported in dev mode")]
    UnsupportedModuleInfoField(String),

    /// A source map could not be decoded, combined, or re-encoded.
    #[error("source map error: {0}")]
    SourceMap(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Stable string code recognized by upstream callers, when one exists.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Error::ClosedServer => Some("ERR_CLOSED_SERVER"),
            Error::OutdatedOptimizedDep(_) => Some("ERR_OUTDATED_OPTIMIZED_DEP"),
            _ => None,
        }
    }

    pub fn is_closed_server(&self) -> bool {
        matches!(self, Error::ClosedServer)
    }

    pub fn is_outdated_optimized_dep(&self) -> bool {
        matches!(self, Error::OutdatedOptimizedDep(_))
    }

    /// Wrap a [`PluginError`] into the crate error.
    pub fn plugin(err: PluginError) -> Self {
        Error::Plugin(Box::new(err))
    }

    /// Borrow the inner [`PluginError`], if this is a plugin failure.
    pub fn as_plugin(&self) -> Option<&PluginError> {
        match self {
            Error::Plugin(e) => Some(e),
            _ => None,
        }
    }

    /// Reconstruct an owned error from a shared one.
    ///
    /// Deduplicated requests share one failure across many waiters. The
    /// variants callers dispatch on (codes, plugin attribution) survive
    /// exactly; non-cloneable payloads degrade to their message.
    pub fn from_shared(err: &std::sync::Arc<Error>) -> Error {
        match &**err {
            Error::Plugin(e) => Error::Plugin(e.clone()),
            Error::ClosedServer => Error::ClosedServer,
            Error::OutdatedOptimizedDep(id) => Error::OutdatedOptimizedDep(id.clone()),
            Error::ModuleNotFound(id) => Error::ModuleNotFound(id.clone()),
            Error::UnsupportedModuleInfoField(f) => {
                Error::UnsupportedModuleInfoField(f.clone())
            }
            Error::SourceMap(msg) => Error::SourceMap(msg.clone()),
            Error::Io(e) => Error::Custom(format!("I/O error: {}", e)),
            Error::Json(e) => Error::Custom(format!("JSON error: {}", e)),
            Error::Custom(msg) => Error::Custom(msg.clone()),
        }
    }
}

impl From<PluginError> for Error {
    fn from(err: PluginError) -> Self {
        Error::plugin(err)
    }
}

/// Result type alias using [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::ClosedServer.code(), Some("ERR_CLOSED_SERVER"));
        assert_eq!(
            Error::OutdatedOptimizedDep("react".into()).code(),
            Some("ERR_OUTDATED_OPTIMIZED_DEP")
        );
        assert_eq!(Error::Custom("x".into()).code(), None);
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError {
            message: "unexpected token".into(),
            plugin: Some("skiff:import-analysis".into()),
            loc: Some(ErrorLoc {
                file: Some("/src/main.ts".into()),
                line: 3,
                column: 7,
            }),
            ..Default::default()
        };
        let msg = err.to_string();
        assert!(msg.contains("[plugin skiff:import-analysis]"));
        assert!(msg.contains("unexpected token"));
        assert!(msg.contains("/src/main.ts:3:7"));
    }

    #[test]
    fn test_enriched_marker() {
        let mut err = PluginError::new("boom");
        assert!(!err.is_enriched());
        err.plugin_code = Some("const a = 1".into());
        assert!(err.is_enriched());
    }
}
