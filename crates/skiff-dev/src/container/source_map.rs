//! Per-transform source-map chaining.
//!
//! Every transform that returns a map pushes it onto a chain; the chain is
//! collapsed on demand into a single map a standard consumer can read. Two
//! degenerate members short-circuit the merge: the `{mappings: ""}` sentinel
//! (deliberately empty) and an explicit null (mapping lost). The sentinel
//! takes precedence, so a plugin that deliberately empties the map wins over
//! an earlier plugin that merely lost it.

use skiff_common::{Error, Result, SourceMapData, SourceMapInput};
use sourcemap::SourceMapBuilder;
use tracing::debug;

use crate::logging::sourcemap_debug_enabled;

/// Collapsed state carried between collapses.
#[derive(Debug, Clone, Default)]
enum CombinedMap {
    /// Nothing contributed yet.
    #[default]
    Unset,
    /// A member nullified the chain; stays null for the rest of the
    /// transform unless a sentinel overrides it.
    Null,
    Map(SourceMapData),
}

#[derive(Debug, Default)]
pub(crate) struct SourceMapChain {
    chain: Vec<Option<SourceMapData>>,
    combined: CombinedMap,
}

impl SourceMapChain {
    pub fn new(in_map: Option<SourceMapInput>) -> Self {
        let mut chain = Self::default();
        if let Some(input) = in_map {
            chain.push_input(input);
        }
        chain
    }

    /// Record a transform's map statement.
    pub fn push_input(&mut self, input: SourceMapInput) {
        match input {
            SourceMapInput::Map(map) => self.chain.push(Some(map)),
            SourceMapInput::Missing => self.chain.push(None),
        }
    }

    /// Collapse pending members into the combined map and empty the chain.
    ///
    /// Returns the combined map, which may be the empty sentinel, or `None`
    /// when the mapping was lost.
    pub fn collapse(
        &mut self,
        filename: &str,
        original_code: &str,
    ) -> Result<Option<SourceMapData>> {
        if !self.chain.is_empty() {
            let has_sentinel = self
                .chain
                .iter()
                .flatten()
                .any(SourceMapData::is_empty_sentinel);

            if has_sentinel {
                self.combined = CombinedMap::Map(SourceMapData::empty_sentinel());
                self.chain.clear();
            } else if self.chain.iter().any(Option::is_none) {
                self.combined = CombinedMap::Null;
                self.chain.clear();
            } else if matches!(self.combined, CombinedMap::Null) {
                self.chain.clear();
            } else {
                let mut members: Vec<SourceMapData> =
                    match std::mem::take(&mut self.combined) {
                        CombinedMap::Map(map) => vec![map],
                        _ => Vec::new(),
                    };
                members.extend(self.chain.drain(..).flatten());
                let members = members
                    .into_iter()
                    .map(|map| rewrite_unnamed_sources(map, filename, original_code))
                    .collect::<Vec<_>>();
                if sourcemap_debug_enabled() {
                    debug!("collapsing {} source maps for {}", members.len(), filename);
                }
                self.combined = CombinedMap::Map(combine_sourcemaps(members)?);
            }
        }

        Ok(match &self.combined {
            CombinedMap::Unset | CombinedMap::Null => None,
            CombinedMap::Map(map) => Some(map.clone()),
        })
    }
}

/// Maps produced by string-manipulation tools often point at `sources: [""]`
/// or `[null]`; rewrite them to the file being transformed with its original
/// code embedded, so the merge has something real to chain into.
fn rewrite_unnamed_sources(
    mut map: SourceMapData,
    filename: &str,
    original_code: &str,
) -> SourceMapData {
    if map.has_unnamed_sources() {
        map.sources = map.sources.iter().map(|_| Some(filename.to_string())).collect();
        map.sources_content = Some(
            map.sources
                .iter()
                .map(|_| Some(original_code.to_string()))
                .collect(),
        );
    }
    map
}

fn to_crate_map(data: &SourceMapData) -> Result<sourcemap::SourceMap> {
    let json = serde_json::to_vec(data)?;
    sourcemap::SourceMap::from_slice(&json).map_err(|e| Error::SourceMap(e.to_string()))
}

fn from_crate_map(map: sourcemap::SourceMap) -> Result<SourceMapData> {
    let mut buf = Vec::new();
    map.to_writer(&mut buf)
        .map_err(|e| Error::SourceMap(e.to_string()))?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Merge a chain of maps, earliest transform first, into a single map from
/// the final code to the original source.
pub(crate) fn combine_sourcemaps(mut maps: Vec<SourceMapData>) -> Result<SourceMapData> {
    match maps.len() {
        0 => return Ok(SourceMapData::empty_sentinel()),
        1 => return Ok(maps.remove(0)),
        _ => {}
    }

    let decoded = maps
        .iter()
        .map(to_crate_map)
        .collect::<Result<Vec<_>>>()?;

    // Each map translates its transform's output to its input, so composition
    // walks from the last transform back toward the original source.
    let mut iter = decoded.into_iter().rev();
    let mut combined = iter.next().expect("at least two maps");
    for inner in iter {
        combined = compose(&combined, &inner);
    }
    from_crate_map(combined)
}

/// Compose `outer` (final -> intermediate) with `inner` (intermediate ->
/// earlier), dropping tokens the inner map cannot account for.
fn compose(outer: &sourcemap::SourceMap, inner: &sourcemap::SourceMap) -> sourcemap::SourceMap {
    let mut builder = SourceMapBuilder::new(None);

    for token in outer.tokens() {
        let Some(inner_token) = inner.lookup_token(token.get_src_line(), token.get_src_col())
        else {
            continue;
        };
        builder.add(
            token.get_dst_line(),
            token.get_dst_col(),
            inner_token.get_src_line(),
            inner_token.get_src_col(),
            inner_token.get_source(),
            inner_token.get_name(),
            false,
        );
    }

    for (index, source) in inner.sources().enumerate() {
        let src_id = builder.add_source(source);
        builder.set_source_contents(src_id, inner.get_source_contents(index as u32));
    }

    builder.into_sourcemap()
}

/// High-resolution identity map for `code`, with the content embedded.
///
/// Used when the chain collapsed to nothing meaningful but callers still
/// need a real map: one token per line start plus one per word boundary.
pub(crate) fn identity_map(filename: &str, code: &str) -> Result<SourceMapData> {
    let mut builder = SourceMapBuilder::new(Some(filename));

    for (line_index, line) in code.split('\n').enumerate() {
        let line_index = line_index as u32;
        builder.add(line_index, 0, line_index, 0, Some(filename), None, false);

        let mut prev_is_word = false;
        for (col, ch) in line.char_indices() {
            let is_word = ch.is_alphanumeric() || ch == '_' || ch == '$';
            if is_word && !prev_is_word && col > 0 {
                let col = col as u32;
                builder.add(line_index, col, line_index, col, Some(filename), None, false);
            }
            prev_is_word = is_word;
        }
    }

    let src_id = builder.add_source(filename);
    builder.set_source_contents(src_id, Some(code));
    from_crate_map(builder.into_sourcemap())
}

/// Trace a generated position back to the original source through `map`.
///
/// `line` is 1-indexed, `column` 0-indexed, as in error locations. Returns
/// `(source, line, column)` in the same convention.
pub(crate) fn original_position_for(
    map: &SourceMapData,
    line: u32,
    column: u32,
) -> Option<(Option<String>, u32, u32)> {
    if map.is_empty_sentinel() || line == 0 {
        return None;
    }
    let decoded = to_crate_map(map).ok()?;
    let token = decoded.lookup_token(line - 1, column)?;
    Some((
        token.get_source().map(str::to_string),
        token.get_src_line() + 1,
        token.get_src_col(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(sources: Vec<Option<&str>>, mappings: &str) -> SourceMapData {
        SourceMapData {
            sources: sources.into_iter().map(|s| s.map(str::to_string)).collect(),
            mappings: mappings.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sentinel_wins_over_null() {
        let mut chain = SourceMapChain::default();
        chain.push_input(SourceMapInput::Missing);
        chain.push_input(SourceMapInput::Map(SourceMapData::empty_sentinel()));

        let combined = chain.collapse("/f.js", "X").unwrap();
        assert!(combined.unwrap().is_empty_sentinel());
    }

    #[test]
    fn test_null_member_discards_chain() {
        let mut chain = SourceMapChain::default();
        chain.push_input(SourceMapInput::Map(map_with(vec![Some("/f.js")], "AAAA")));
        chain.push_input(SourceMapInput::Missing);

        assert!(chain.collapse("/f.js", "X").unwrap().is_none());
        // Null is sticky across later pushes of real maps.
        chain.push_input(SourceMapInput::Map(map_with(vec![Some("/f.js")], "AAAA")));
        assert!(chain.collapse("/f.js", "X").unwrap().is_none());
    }

    #[test]
    fn test_unnamed_sources_rewritten_to_filename() {
        let mut chain = SourceMapChain::default();
        chain.push_input(SourceMapInput::Map(map_with(vec![Some("")], "AAAA")));

        let combined = chain.collapse("/f.js", "X").unwrap().unwrap();
        assert_eq!(combined.sources, vec![Some("/f.js".to_string())]);
        assert_eq!(
            combined.sources_content,
            Some(vec![Some("X".to_string())])
        );
    }

    #[test]
    fn test_combine_two_maps_reaches_original_source() {
        // earliest: original -> c1, with embedded content
        let first = SourceMapData {
            sources: vec![Some("/src/a.ts".into())],
            sources_content: Some(vec![Some("let a = 1".into())]),
            mappings: "AAAA".into(),
            ..Default::default()
        };
        // latest: c1 -> c2
        let second = map_with(vec![Some("c1")], "AAAA");

        let combined = combine_sourcemaps(vec![first, second]).unwrap();
        assert_eq!(combined.sources, vec![Some("/src/a.ts".to_string())]);
        let (source, line, column) = original_position_for(&combined, 1, 0).unwrap();
        assert_eq!(source.as_deref(), Some("/src/a.ts"));
        assert_eq!((line, column), (1, 0));
    }

    #[test]
    fn test_identity_map_is_high_resolution() {
        let map = identity_map("/f.js", "const answer = 42\nexport { answer }").unwrap();
        assert!(!map.is_empty_sentinel());
        assert!(map.mappings.contains(';'));
        assert_eq!(map.sources, vec![Some("/f.js".to_string())]);

        // A word-boundary position round-trips through the identity.
        let (source, line, column) = original_position_for(&map, 2, 9).unwrap();
        assert_eq!(source.as_deref(), Some("/f.js"));
        assert_eq!(line, 2);
        assert_eq!(column, 9);
    }

    #[test]
    fn test_collapse_without_members_is_none() {
        let mut chain = SourceMapChain::default();
        assert!(chain.collapse("/f.js", "X").unwrap().is_none());
    }
}
