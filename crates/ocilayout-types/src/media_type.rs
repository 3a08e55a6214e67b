//! Well-known OCI media types.

/// OCI image manifest.
pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image configuration.
pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
/// Uncompressed layer tarball.
pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
/// Gzip-compressed layer tarball.
pub const IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// Zstd-compressed layer tarball.
pub const IMAGE_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
/// The `oci-layout` header file.
pub const LAYOUT_HEADER: &str = "application/vnd.oci.layout.header.v1+json";
/// Empty JSON descriptor (`{}`), used for artifacts without a config.
pub const EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";
/// Fallback for blobs written without a declared type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Returns `true` for media types whose content is a JSON document that may
/// reference further descriptors (manifests and indexes).
pub fn is_manifest_like(media_type: &str) -> bool {
    matches!(
        media_type,
        IMAGE_MANIFEST
            | IMAGE_INDEX
            | "application/vnd.docker.distribution.manifest.v2+json"
            | "application/vnd.docker.distribution.manifest.list.v2+json"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests_and_indexes_are_manifest_like() {
        assert!(is_manifest_like(IMAGE_MANIFEST));
        assert!(is_manifest_like(IMAGE_INDEX));
        assert!(!is_manifest_like(IMAGE_LAYER_GZIP));
        assert!(!is_manifest_like(IMAGE_CONFIG));
    }
}
