//! Source map values carried through the transformer chain.
//!
//! Maps are stored as JSON so they survive the bincode cache unchanged. The
//! only operation the core needs is [`fold`]: combine the running map with the
//! map returned by the next transformer.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sourcemap::{SourceMap, SourceMapBuilder};

/// A source map attached to file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMapValue {
    /// Mapping was explicitly switched off. Sticky through the chain.
    Disabled,
    /// Serialized source map (v3 JSON).
    Json(String),
}

impl SourceMapValue {
    pub fn from_map(map: &SourceMap) -> Result<Self, String> {
        let mut bytes = Vec::new();
        map.to_writer(&mut bytes)
            .map_err(|e| format!("failed to serialize source map: {e}"))?;
        String::from_utf8(bytes)
            .map(SourceMapValue::Json)
            .map_err(|e| format!("source map is not valid UTF-8: {e}"))
    }

    pub fn parse(&self) -> Result<Option<SourceMap>, String> {
        match self {
            SourceMapValue::Disabled => Ok(None),
            SourceMapValue::Json(json) => SourceMap::from_slice(json.as_bytes())
                .map(Some)
                .map_err(|e| format!("invalid source map: {e}")),
        }
    }
}

/// Fold the running source map with the one a transformer returned.
///
/// - either side disabled: disabled
/// - nothing returned: absent (a stage without map info invalidates the chain)
/// - running absent, map returned: the returned map
/// - both present: the composition original → final
pub fn fold(
    running: Option<SourceMapValue>,
    next: Option<SourceMapValue>,
) -> Result<Option<SourceMapValue>, String> {
    match (running, next) {
        (Some(SourceMapValue::Disabled), _) | (_, Some(SourceMapValue::Disabled)) => {
            Ok(Some(SourceMapValue::Disabled))
        }
        (_, None) => Ok(None),
        (None, Some(next)) => Ok(Some(next)),
        (Some(running), Some(next)) => {
            let (Some(first), Some(second)) = (running.parse()?, next.parse()?) else {
                return Ok(Some(SourceMapValue::Disabled));
            };
            SourceMapValue::from_map(&compose(&first, &second)).map(Some)
        }
    }
}

/// Compose `first` (original → intermediate) with `second`
/// (intermediate → final) into original → final.
///
/// Tokens of `second` that land on unmapped intermediate positions are
/// dropped.
pub fn compose(first: &SourceMap, second: &SourceMap) -> SourceMap {
    let mut builder = SourceMapBuilder::new(second.get_file());
    let mut sources: FxHashMap<String, u32> = FxHashMap::default();

    for token in second.tokens() {
        let Some(original) = first.lookup_token(token.get_src_line(), token.get_src_col()) else {
            continue;
        };
        let Some(source) = original.get_source() else {
            continue;
        };

        let src_id = match sources.get(source) {
            Some(id) => *id,
            None => {
                let id = builder.add_source(source);
                let contents = first.get_source_contents(original.get_src_id());
                builder.set_source_contents(id, contents);
                sources.insert(source.to_string(), id);
                id
            }
        };
        let name_id = original
            .get_name()
            .or_else(|| token.get_name())
            .map(|name| builder.add_name(name));

        builder.add_raw(
            token.get_dst_line(),
            token.get_dst_col(),
            original.get_src_line(),
            original.get_src_col(),
            Some(src_id),
            name_id,
            false,
        );
    }

    builder.into_sourcemap()
}
