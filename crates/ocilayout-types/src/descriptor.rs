//! OCI content descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Annotation carrying the human-readable reference of an index entry
/// (e.g. `v1.2.0`, `latest`).
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// A descriptor identifies a piece of content: its media type, digest and
/// size, with optional annotations and platform information.
///
/// Descriptors are plain immutable values. Two descriptors are `==` only when
/// every field matches; index lookups use [`Descriptor::same_identity`] or a
/// matcher instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Content digest.
    pub digest: Digest,
    /// Content size in bytes.
    pub size: u64,
    /// Alternate download locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    /// Arbitrary string metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Platform the referenced manifest targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Artifact type of the referenced manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

impl Descriptor {
    /// Create a descriptor with no optional fields.
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            urls: None,
            annotations: None,
            platform: None,
            artifact_type: None,
        }
    }

    /// Return a copy with the given annotation set.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Return a copy with the `org.opencontainers.image.ref.name` annotation set.
    pub fn with_ref_name(self, name: impl Into<String>) -> Self {
        self.with_annotation(ANNOTATION_REF_NAME, name)
    }

    /// Return a copy with the given platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Look up an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// The reference name annotation, if present.
    pub fn ref_name(&self) -> Option<&str> {
        self.annotation(ANNOTATION_REF_NAME)
    }

    /// Identity comparison used by equality matching: digest, size and media
    /// type. Annotations, urls and platform are ignored.
    pub fn same_identity(&self, other: &Descriptor) -> bool {
        self.digest == other.digest && self.size == other.size && self.media_type == other.media_type
    }
}

/// Platform block of a descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            os_version: None,
            os_features: None,
            variant: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_type;

    fn digest(c: char) -> Digest {
        format!("sha256:{}", c.to_string().repeat(64)).parse().unwrap()
    }

    #[test]
    fn serializes_in_oci_shape() {
        let desc = Descriptor::new(media_type::IMAGE_MANIFEST, digest('a'), 10);
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["mediaType"], media_type::IMAGE_MANIFEST);
        assert_eq!(json["size"], 10);
        assert_eq!(json["digest"], format!("sha256:{}", "a".repeat(64)));
        assert!(json.get("annotations").is_none());
        assert!(json.get("platform").is_none());
    }

    #[test]
    fn parses_foreign_descriptor() {
        let json = format!(
            r#"{{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:{}",
                "size": 7143,
                "annotations": {{"org.opencontainers.image.ref.name": "v1"}},
                "platform": {{"architecture": "arm64", "os": "linux", "variant": "v8"}}
            }}"#,
            "b".repeat(64)
        );
        let desc: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc.size, 7143);
        assert_eq!(desc.ref_name(), Some("v1"));
        let platform = desc.platform.unwrap();
        assert_eq!(platform.architecture, "arm64");
        assert_eq!(platform.variant.as_deref(), Some("v8"));
    }

    #[test]
    fn same_identity_ignores_annotations() {
        let plain = Descriptor::new(media_type::IMAGE_MANIFEST, digest('a'), 10);
        let tagged = plain.clone().with_ref_name("latest");
        assert_ne!(plain, tagged);
        assert!(plain.same_identity(&tagged));
    }

    #[test]
    fn same_identity_checks_size_and_media_type() {
        let base = Descriptor::new(media_type::IMAGE_MANIFEST, digest('a'), 10);
        let other_size = Descriptor::new(media_type::IMAGE_MANIFEST, digest('a'), 11);
        let other_type = Descriptor::new(media_type::IMAGE_INDEX, digest('a'), 10);
        assert!(!base.same_identity(&other_size));
        assert!(!base.same_identity(&other_type));
    }

    #[test]
    fn annotations_accumulate() {
        let desc = Descriptor::new(media_type::IMAGE_MANIFEST, digest('c'), 1)
            .with_annotation("a", "1")
            .with_annotation("b", "2");
        assert_eq!(desc.annotation("a"), Some("1"));
        assert_eq!(desc.annotation("b"), Some("2"));
        assert_eq!(desc.annotation("c"), None);
    }
}
