//! The `index.json` document.

use std::collections::BTreeMap;

use ocilayout_types::{media_type, Descriptor};
use serde::{Deserialize, Serialize};

/// Schema version of every image index this crate writes.
pub const SCHEMA_VERSION: u32 = 2;

/// OCI image index in its on-disk shape.
///
/// Unknown top-level fields are dropped on rewrite; `manifests` order is
/// preserved exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl IndexDocument {
    /// An index document listing `manifests`.
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: Some(media_type::IMAGE_INDEX.to_string()),
            manifests,
            annotations: None,
        }
    }
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_shape() {
        let json = serde_json::to_value(IndexDocument::default()).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], media_type::IMAGE_INDEX);
        assert_eq!(json["manifests"], serde_json::json!([]));
        assert!(json.get("annotations").is_none());
    }

    #[test]
    fn parses_minimal_foreign_index() {
        let doc: IndexDocument = serde_json::from_str(r#"{"schemaVersion":2}"#).unwrap();
        assert!(doc.manifests.is_empty());
        assert!(doc.media_type.is_none());
    }

    #[test]
    fn keeps_manifest_order() {
        let json = format!(
            r#"{{"schemaVersion":2,"manifests":[
                {{"mediaType":"{m}","digest":"sha256:{b}","size":2}},
                {{"mediaType":"{m}","digest":"sha256:{a}","size":1}}
            ]}}"#,
            m = media_type::IMAGE_MANIFEST,
            a = "a".repeat(64),
            b = "b".repeat(64),
        );
        let doc: IndexDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc.manifests[0].size, 2);
        assert_eq!(doc.manifests[1].size, 1);
    }
}
