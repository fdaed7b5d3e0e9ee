//! Logging setup for the dev server.
//!
//! Library code only emits `tracing` events; embedders usually install
//! their own subscriber. The initializers here scope the chosen level to
//! the skiff crates so the embedding application keeps its own filtering,
//! and fold in the source-map debug toggle.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Env var read by [`init_logging_from_env`] for the dev-server level.
const LOG_LEVEL_VAR: &str = "SKIFF_LOG";

/// Env var that turns on source-map chain tracing. Verbosity only, no
/// semantic effect.
const SOURCEMAP_DEBUG_VAR: &str = "SKIFF_DEBUG_SOURCEMAP";

/// Verbosity of dev-server output.
///
/// These are request-serving levels: `Info` narrates transforms and HMR
/// waves, `Warn` keeps plugin warnings only, `Error` failures only.
/// Hook-by-hook tracing is not a level; it comes from `RUST_LOG`
/// directives or [`SOURCEMAP_DEBUG_VAR`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
}

impl LogLevel {
    /// User-facing name, the inverse of the `FromStr` impl.
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Silent => "silent",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
        }
    }

    /// Filter directives scoped to the skiff crates.
    ///
    /// The level never applies globally: an application embedding the dev
    /// server keeps its own targets at their defaults.
    fn directives(&self) -> String {
        let level = match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
        };
        let mut directives =
            format!("skiff_common={0},skiff_graph={0},skiff_dev={0}", level);
        if sourcemap_debug_enabled() {
            directives.push_str(",skiff_dev::container::source_map=debug");
        }
        directives
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            other => Err(format!(
                "unknown log level '{}'\n\nHint: expected one of silent, error, warn, info",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install a global subscriber serving the skiff crates at `level`.
///
/// Only the first call in a process takes effect. `RUST_LOG` directives
/// are layered on top, so `RUST_LOG=skiff_dev::container=trace` still
/// works against a quiet default.
pub fn init_logging(level: LogLevel) {
    INIT.call_once(|| install(level));
}

/// Install a global subscriber with the level taken from `SKIFF_LOG`,
/// falling back to info when the variable is unset or unparseable.
pub fn init_logging_from_env() {
    let level = std::env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default();
    init_logging(level);
}

fn install(level: LogLevel) {
    let mut filter = EnvFilter::new(level.directives());
    if let Ok(extra) = std::env::var("RUST_LOG") {
        for directive in extra.split(',').filter(|d| !d.is_empty()) {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false).without_time())
        .init();
}

/// Whether source-map chain debugging was requested for this process.
pub(crate) fn sourcemap_debug_enabled() -> bool {
    std::env::var_os(SOURCEMAP_DEBUG_VAR).is_some()
}
