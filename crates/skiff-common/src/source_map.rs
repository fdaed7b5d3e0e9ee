//! Source-map data as exchanged with plugins.
//!
//! Maps are carried in their JSON (v3) shape so plugin-provided maps round
//! trip untouched. A map whose `mappings` string is empty is the sentinel
//! meaning "deliberately no mapping", which is distinct from having no map at
//! all.

use serde::{Deserialize, Serialize};

/// A v3 source map in its JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceMapData {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// `sources` entries may be null (an unnamed source).
    pub sources: Vec<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl Default for SourceMapData {
    fn default() -> Self {
        Self {
            version: 3,
            file: None,
            sources: Vec::new(),
            source_root: None,
            sources_content: None,
            names: Vec::new(),
            mappings: String::new(),
        }
    }
}

impl SourceMapData {
    /// The `{mappings: ""}` sentinel: a map deliberately mapping nothing.
    pub fn empty_sentinel() -> Self {
        Self::default()
    }

    /// Whether this map is the deliberately-empty sentinel.
    pub fn is_empty_sentinel(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Whether every `sources` entry is null or the empty string.
    ///
    /// Maps produced by string-manipulation tools often carry `sources: [""]`
    /// or `sources: [null]`; the chain collapse rewrites those to point at
    /// the file being transformed.
    pub fn has_unnamed_sources(&self) -> bool {
        !self.sources.is_empty()
            && self
                .sources
                .iter()
                .all(|s| s.as_deref().map_or(true, str::is_empty))
    }
}

/// A transform hook's statement about its source map.
///
/// `None` at the option level means the hook said nothing about the map;
/// `Missing` is an explicit null (the plugin transformed the code but lost
/// the mapping); `Map` carries a real map, possibly the empty sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMapInput {
    Map(SourceMapData),
    Missing,
}

impl From<SourceMapData> for SourceMapInput {
    fn from(map: SourceMapData) -> Self {
        SourceMapInput::Map(map)
    }
}

/// Final product of the transform pipeline for one module.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    pub code: String,
    /// `None` when the mapping was lost somewhere in the chain; the empty
    /// sentinel when a plugin deliberately produced an empty map.
    pub map: Option<SourceMapData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_detection() {
        assert!(SourceMapData::empty_sentinel().is_empty_sentinel());

        let map = SourceMapData {
            mappings: "AAAA".into(),
            ..Default::default()
        };
        assert!(!map.is_empty_sentinel());
    }

    #[test]
    fn test_unnamed_sources() {
        let unnamed = SourceMapData {
            sources: vec![Some(String::new())],
            mappings: "AAAA".into(),
            ..Default::default()
        };
        assert!(unnamed.has_unnamed_sources());

        let null_source = SourceMapData {
            sources: vec![None],
            mappings: "AAAA".into(),
            ..Default::default()
        };
        assert!(null_source.has_unnamed_sources());

        let named = SourceMapData {
            sources: vec![Some("/src/main.ts".into())],
            mappings: "AAAA".into(),
            ..Default::default()
        };
        assert!(!named.has_unnamed_sources());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "version": 3,
            "sources": ["/src/a.ts", null],
            "sourcesContent": ["const a = 1", null],
            "names": ["a"],
            "mappings": "AAAA,SAAS"
        }"#;
        let map: SourceMapData = serde_json::from_str(json).unwrap();
        assert_eq!(map.version, 3);
        assert_eq!(map.sources.len(), 2);
        assert_eq!(map.sources[0].as_deref(), Some("/src/a.ts"));
        assert!(map.sources[1].is_none());

        let out = serde_json::to_string(&map).unwrap();
        let back: SourceMapData = serde_json::from_str(&out).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn test_serializes_camel_case() {
        let map = SourceMapData {
            sources: vec![Some("/f.js".into())],
            sources_content: Some(vec![Some("X".into())]),
            mappings: "AAAA".into(),
            ..Default::default()
        };
        let out = serde_json::to_string(&map).unwrap();
        assert!(out.contains("sourcesContent"));
        assert!(!out.contains("sources_content"));
    }
}
