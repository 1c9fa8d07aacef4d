//! Pipeline document loading
//!
//! Reads the YAML document and expands `<<` merge keys so the rest of the
//! parser only ever sees fully-expanded mappings. Anchors and aliases are
//! resolved by `serde_yaml` itself; an alias without a matching anchor is a
//! parse error.

use crate::error::{CircletError, CircletResult};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

const MERGE_KEY: &str = "<<";

/// Read a pipeline document from disk
pub async fn read_document(path: &Path) -> CircletResult<Value> {
    if !path.is_file() {
        return Err(CircletError::PipelineNotFound(path.to_path_buf()));
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CircletError::io(format!("reading pipeline {}", path.display()), e))?;

    debug!("Read pipeline document {} ({} bytes)", path.display(), content.len());
    parse_document(&content)
}

/// Parse YAML text and expand merge keys
pub fn parse_document(content: &str) -> CircletResult<Value> {
    let raw: Value = serde_yaml::from_str(content)
        .map_err(|e| CircletError::PipelineParse(e.to_string()))?;
    expand_merge_keys(raw)
}

/// Recursively replace `<<: *alias` entries with the keys they reference.
///
/// Keys written in the mapping itself win over merged keys. When the merge
/// value is a list of mappings, earlier entries win over later ones.
pub fn expand_merge_keys(value: Value) -> CircletResult<Value> {
    match value {
        Value::Mapping(mapping) => expand_mapping(mapping).map(Value::Mapping),
        Value::Sequence(items) => items
            .into_iter()
            .map(expand_merge_keys)
            .collect::<CircletResult<Vec<_>>>()
            .map(Value::Sequence),
        Value::Tagged(mut tagged) => {
            tagged.value = expand_merge_keys(tagged.value)?;
            Ok(Value::Tagged(tagged))
        }
        scalar => Ok(scalar),
    }
}

fn expand_mapping(mapping: Mapping) -> CircletResult<Mapping> {
    let mut expanded = Mapping::with_capacity(mapping.len());
    let mut sources = Vec::new();

    for (key, value) in mapping {
        let value = expand_merge_keys(value)?;
        if key.as_str() == Some(MERGE_KEY) {
            match value {
                Value::Mapping(source) => sources.push(source),
                Value::Sequence(items) => {
                    for item in items {
                        match item {
                            Value::Mapping(source) => sources.push(source),
                            _ => return Err(merge_error()),
                        }
                    }
                }
                _ => return Err(merge_error()),
            }
        } else {
            expanded.insert(key, value);
        }
    }

    for source in sources {
        for (key, value) in source {
            if !expanded.contains_key(&key) {
                expanded.insert(key, value);
            }
        }
    }

    Ok(expanded)
}

fn merge_error() -> CircletError {
    CircletError::PipelineParse(
        "merge key '<<' must reference a mapping or a list of mappings".to_string(),
    )
}
