//! Image manifests
//!
//! Reads the `manifest.json` written by `docker save` and builds the OCI image
//! manifest that is pushed to the registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
pub const OCI_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One image entry in a `docker save` manifest.json
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaveManifestEntry {
    pub config: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    pub layers: Vec<String>,
}

/// Parse `manifest.json` and return its first image.
pub fn parse_save_manifest(data: &[u8]) -> io::Result<SaveManifestEntry> {
    let entries: Vec<SaveManifestEntry> = serde_json::from_slice(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid manifest.json: {}", e)))?;
    entries
        .into_iter()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "manifest.json lists no images"))
}

/// Whether data starts with the gzip magic bytes
pub fn is_gzipped(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// A blob uploaded from the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub digest: String,
    pub size: u64,
    pub gzipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl OciManifest {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(io::Error::other)
    }

    /// Sum of layer sizes
    pub fn layers_size(&self) -> u64 {
        self.layers.iter().map(|layer| layer.size).sum()
    }
}

/// Archive blobs seen so far, by entry path, plus the links between entries
#[derive(Debug, Default)]
pub struct BlobIndex {
    blobs: HashMap<String, UploadedBlob>,
    links: HashMap<String, String>,
}

const MAX_LINK_DEPTH: usize = 16;

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_blob(&mut self, path: String, blob: UploadedBlob) {
        self.blobs.insert(path, blob);
    }

    pub fn insert_link(&mut self, path: String, target: String) {
        self.links.insert(path, target);
    }

    /// Blob stored at `path`, following links.
    pub fn resolve(&self, path: &str) -> Option<&UploadedBlob> {
        let mut current = path;
        for _ in 0..MAX_LINK_DEPTH {
            if let Some(blob) = self.blobs.get(current) {
                return Some(blob);
            }
            current = self.links.get(current)?.as_str();
        }
        None
    }

    fn require(&self, path: &str) -> io::Result<&UploadedBlob> {
        self.resolve(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("archive entry {} referenced by manifest.json is missing", path),
            )
        })
    }

    /// OCI manifest for `entry`, with descriptors taken from uploaded blobs.
    pub fn build_manifest(&self, entry: &SaveManifestEntry) -> io::Result<OciManifest> {
        let config = self.require(&entry.config)?;
        let layers = entry
            .layers
            .iter()
            .map(|path| {
                let blob = self.require(path)?;
                Ok(Descriptor {
                    media_type: if blob.gzipped {
                        OCI_LAYER_GZIP_MEDIA_TYPE
                    } else {
                        OCI_LAYER_MEDIA_TYPE
                    }
                    .to_string(),
                    digest: blob.digest.clone(),
                    size: blob.size,
                })
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(OciManifest {
            schema_version: 2,
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            config: Descriptor {
                media_type: OCI_CONFIG_MEDIA_TYPE.to_string(),
                digest: config.digest.clone(),
                size: config.size,
            },
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(digest: &str, size: u64, gzipped: bool) -> UploadedBlob {
        UploadedBlob {
            digest: digest.to_string(),
            size,
            gzipped,
        }
    }

    #[test]
    fn test_parse_save_manifest() {
        let data = br#"[{"Config":"cfg.json","RepoTags":["app:v1"],"Layers":["a/layer.tar","b/layer.tar"]}]"#;
        let entry = parse_save_manifest(data).unwrap();
        assert_eq!(entry.config, "cfg.json");
        assert_eq!(entry.repo_tags, Some(vec!["app:v1".to_string()]));
        assert_eq!(entry.layers.len(), 2);
    }

    #[test]
    fn test_parse_save_manifest_rejects_empty() {
        assert!(parse_save_manifest(b"[]").is_err());
        assert!(parse_save_manifest(b"not json").is_err());
    }

    #[test]
    fn test_is_gzipped() {
        assert!(is_gzipped(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzipped(b"ustar"));
        assert!(!is_gzipped(&[0x1f]));
    }

    #[test]
    fn test_build_manifest_follows_links() {
        let mut index = BlobIndex::new();
        index.insert_blob("cfg.json".to_string(), blob("sha256:cfg", 10, false));
        index.insert_blob("a/layer.tar".to_string(), blob("sha256:aaa", 100, false));
        index.insert_blob("c/layer.tar.gz".to_string(), blob("sha256:ccc", 50, true));
        index.insert_link("b/layer.tar".to_string(), "a/layer.tar".to_string());

        let entry = SaveManifestEntry {
            config: "cfg.json".to_string(),
            repo_tags: None,
            layers: vec![
                "a/layer.tar".to_string(),
                "b/layer.tar".to_string(),
                "c/layer.tar.gz".to_string(),
            ],
        };
        let manifest = index.build_manifest(&entry).unwrap();

        assert_eq!(manifest.config.digest, "sha256:cfg");
        assert_eq!(manifest.config.media_type, OCI_CONFIG_MEDIA_TYPE);
        assert_eq!(manifest.layers[1].digest, "sha256:aaa");
        assert_eq!(manifest.layers[2].media_type, OCI_LAYER_GZIP_MEDIA_TYPE);
        assert_eq!(manifest.layers_size(), 250);

        let json: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], OCI_MANIFEST_MEDIA_TYPE);
    }

    #[test]
    fn test_build_manifest_missing_layer() {
        let index = BlobIndex::new();
        let entry = SaveManifestEntry {
            config: "cfg.json".to_string(),
            repo_tags: None,
            layers: vec![],
        };
        let err = index.build_manifest(&entry).unwrap_err();
        assert!(err.to_string().contains("cfg.json"));
    }

    #[test]
    fn test_link_cycle_terminates() {
        let mut index = BlobIndex::new();
        index.insert_link("a".to_string(), "b".to_string());
        index.insert_link("b".to_string(), "a".to_string());
        assert!(index.resolve("a").is_none());
    }
}
