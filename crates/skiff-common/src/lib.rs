//! # skiff-common
//!
//! Shared types for the skiff dev server: the crate-wide error enum with its
//! stable wire codes, plugin-attributed errors with source locations and code
//! frames, and the JSON source-map shapes exchanged with plugins.

pub mod error;
pub mod source_map;
pub mod utils;

pub use error::{Error, ErrorLoc, PluginError, Result};
pub use source_map::{SourceMapData, SourceMapInput, TransformResult};
pub use utils::{generate_code_frame, offset_to_pos};

/// Plugin-visible metadata attached to modules and resolutions.
pub type MetaMap = serde_json::Map<String, serde_json::Value>;
