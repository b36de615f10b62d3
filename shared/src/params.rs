//! Parameter maps and the on-disk parameter document.
//!
//! The document lives in every case folder as
//! `{"type": "<case type id>", "vars": {"name": "value", ...}}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::event::CaseTypeId;

pub type ParamMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamFileError {
    #[error("Parameter document is malformed: {0}")]
    Malformed(String),
    #[error("Parameter document has an empty case type")]
    EmptyType,
    #[error("Parameter document could not be serialized: {0}")]
    Serialize(String),
}

/// Entries of `proposed` that are new or differ from `stored`.
#[must_use]
pub fn diff_params(stored: &ParamMap, proposed: &ParamMap) -> ParamMap {
    proposed
        .iter()
        .filter(|(name, value)| stored.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[must_use]
pub fn merge_params(stored: &ParamMap, delta: &ParamMap) -> ParamMap {
    let mut merged = stored.clone();
    merged.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ParamDocument {
    #[serde(rename = "type")]
    pub type_id: CaseTypeId,
    #[serde(default)]
    pub vars: ParamMap,
}

impl ParamDocument {
    #[must_use]
    pub const fn new(type_id: CaseTypeId, vars: ParamMap) -> Self {
        Self { type_id, vars }
    }

    pub fn parse(text: &str) -> Result<Self, ParamFileError> {
        let doc: Self =
            serde_json::from_str(text).map_err(|e| ParamFileError::Malformed(e.to_string()))?;
        if doc.type_id.as_str().trim().is_empty() {
            return Err(ParamFileError::EmptyType);
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, ParamFileError> {
        serde_json::to_string_pretty(self).map_err(|e| ParamFileError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(entries: &[(&str, &str)]) -> ParamMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    mod diff_tests {
        use super::*;

        #[test]
        fn test_diff_keeps_new_and_changed_only() {
            let stored = map(&[("velocity", "10"), ("mesh_density", "fine")]);
            let proposed = map(&[("velocity", "12"), ("mesh_density", "fine"), ("angle", "0")]);
            assert_eq!(
                diff_params(&stored, &proposed),
                map(&[("velocity", "12"), ("angle", "0")])
            );
        }

        #[test]
        fn test_diff_of_identical_maps_is_empty() {
            let stored = map(&[("velocity", "10")]);
            assert!(diff_params(&stored, &stored).is_empty());
        }

        #[test]
        fn test_merge_overlays_delta() {
            let stored = map(&[("velocity", "10"), ("angle", "0")]);
            let merged = merge_params(&stored, &map(&[("velocity", "12")]));
            assert_eq!(merged, map(&[("velocity", "12"), ("angle", "0")]));
        }
    }

    mod document_tests {
        use super::*;

        #[test]
        fn test_parse_reads_type_and_vars() {
            let doc = ParamDocument::parse(
                r#"{"type":"wind_tower","vars":{"velocity":"10"},"extra":1}"#,
            )
            .unwrap();
            assert_eq!(doc.type_id, CaseTypeId::new("wind_tower"));
            assert_eq!(doc.vars, map(&[("velocity", "10")]));
        }

        #[test]
        fn test_missing_vars_is_empty() {
            let doc = ParamDocument::parse(r#"{"type":"wind_tower"}"#).unwrap();
            assert!(doc.vars.is_empty());
        }

        #[test]
        fn test_rejects_missing_type_and_non_string_values() {
            assert!(matches!(
                ParamDocument::parse(r#"{"vars":{}}"#),
                Err(ParamFileError::Malformed(_))
            ));
            assert!(matches!(
                ParamDocument::parse(r#"{"type":"t","vars":{"velocity":10}}"#),
                Err(ParamFileError::Malformed(_))
            ));
            assert!(matches!(
                ParamDocument::parse("not json"),
                Err(ParamFileError::Malformed(_))
            ));
        }

        #[test]
        fn test_rejects_blank_type() {
            assert_eq!(
                ParamDocument::parse(r#"{"type":"  "}"#),
                Err(ParamFileError::EmptyType)
            );
        }

        #[test]
        fn test_written_document_uses_type_key() {
            let doc = ParamDocument::new(CaseTypeId::new("t"), map(&[("a", "1")]));
            let json: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
            assert_eq!(json["type"], "t");
            assert_eq!(json["vars"]["a"], "1");
        }
    }

    proptest! {
        #[test]
        fn merging_the_diff_reaches_proposed_values(
            stored in prop::collection::btree_map("[a-d]", "[0-9]{1,2}", 0..4),
            proposed in prop::collection::btree_map("[a-d]", "[0-9]{1,2}", 0..4),
        ) {
            let delta = diff_params(&stored, &proposed);
            let merged = merge_params(&stored, &delta);
            for (name, value) in &proposed {
                prop_assert_eq!(merged.get(name), Some(value));
            }
            for (name, value) in &stored {
                if !proposed.contains_key(name) {
                    prop_assert_eq!(merged.get(name), Some(value));
                }
            }
            prop_assert!(diff_params(&merged, &proposed).is_empty());
        }
    }
}
