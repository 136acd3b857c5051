//! SHA256 digest utilities for image blobs and manifests

use sha2::{Digest, Sha256};

/// Utilities for working with `sha256:` content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data, as lowercase hex
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Validate full digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix("sha256:")
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Extract the hex digest from an archive entry path.
    ///
    /// Handles the layouts `docker save` has produced over time:
    /// `<hex>/layer.tar`, `blobs/sha256/<hex>` and `<hex>.tar` / `<hex>.json`.
    pub fn extract_digest_from_layer_path(layer_path: &str) -> Option<String> {
        if let Some(start) = layer_path.find("blobs/sha256/") {
            let after_prefix = &layer_path[start + "blobs/sha256/".len()..];
            let end = after_prefix.find('/').unwrap_or(after_prefix.len());
            let digest_part = &after_prefix[..end];
            if Self::is_valid_sha256_hex(digest_part) {
                return Some(digest_part.to_string());
            }
        }

        if let Some((dir, _)) = layer_path.split_once('/') {
            if Self::is_valid_sha256_hex(dir) {
                return Some(dir.to_string());
            }
        }

        let file_name = layer_path.rsplit('/').next().unwrap_or(layer_path);
        let stem = file_name
            .strip_suffix(".tar")
            .or_else(|| file_name.strip_suffix(".json"))
            .unwrap_or(file_name);
        if Self::is_valid_sha256_hex(stem) {
            return Some(stem.to_string());
        }

        None
    }
}

/// Incremental SHA256 over a blob that is uploaded in pieces
#[derive(Default)]
pub struct StreamingDigest {
    hasher: Sha256,
    size: u64,
}

impl StreamingDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish hashing; returns the `sha256:` digest and total byte count.
    pub fn finalize(self) -> (String, u64) {
        (format!("sha256:{}", hex::encode(self.hasher.finalize())), self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_WORLD_SHA: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_sha256() {
        assert_eq!(DigestUtils::compute_sha256(b"hello world"), HELLO_WORLD_SHA);
        assert_eq!(
            DigestUtils::compute_docker_digest(b"hello world"),
            format!("sha256:{}", HELLO_WORLD_SHA)
        );
    }

    #[test]
    fn test_validation() {
        assert!(DigestUtils::is_valid_sha256_hex(HELLO_WORLD_SHA));
        assert!(!DigestUtils::is_valid_sha256_hex("abc123"));
        assert!(DigestUtils::is_valid_docker_digest(&format!("sha256:{}", HELLO_WORLD_SHA)));
        assert!(!DigestUtils::is_valid_docker_digest(HELLO_WORLD_SHA));
    }

    #[test]
    fn test_extract_digest_from_layer_path() {
        let legacy = format!("{}/layer.tar", HELLO_WORLD_SHA);
        let oci = format!("blobs/sha256/{}", HELLO_WORLD_SHA);
        let config = format!("{}.json", HELLO_WORLD_SHA);

        assert_eq!(DigestUtils::extract_digest_from_layer_path(&legacy).as_deref(), Some(HELLO_WORLD_SHA));
        assert_eq!(DigestUtils::extract_digest_from_layer_path(&oci).as_deref(), Some(HELLO_WORLD_SHA));
        assert_eq!(DigestUtils::extract_digest_from_layer_path(&config).as_deref(), Some(HELLO_WORLD_SHA));
        assert_eq!(DigestUtils::extract_digest_from_layer_path("manifest.json"), None);
    }

    #[test]
    fn test_streaming_digest_matches_one_shot() {
        let mut digest = StreamingDigest::new();
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(digest.size(), 11);
        let (value, size) = digest.finalize();
        assert_eq!(value, format!("sha256:{}", HELLO_WORLD_SHA));
        assert_eq!(size, 11);
    }
}
