//! Container manifest (META-INF/manifest.json)
//!
//! Lists every data file with its mime type, size and SHA-256, and binds the
//! list with a JCS-based `root_sha256` that signatures cover.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ContainerType;
use crate::datafile::DataFile;
use crate::error::{ContainerError, Result};

/// Schema version for manifest.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "asic/manifest@1";

/// One data file in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Entry name inside the archive
    pub name: String,

    pub mime_type: String,

    /// Size in bytes
    pub size: u64,

    /// Hex SHA-256 of the content
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub container_type: ContainerType,

    /// Entries in container order
    pub entries: Vec<ManifestEntry>,

    /// SHA-256 of JCS(entries)
    pub root_sha256: String,
}

impl Manifest {
    /// Describe `data_files` from the digests recorded at ingestion; no
    /// content is re-read.
    pub fn from_data_files(container_type: ContainerType, data_files: &[DataFile]) -> Result<Self> {
        let entries: Vec<ManifestEntry> = data_files
            .iter()
            .map(|f| ManifestEntry {
                name: f.name().to_string(),
                mime_type: f.mime_type().to_string(),
                size: f.file_size(),
                sha256: f.sha256().to_string(),
            })
            .collect();
        let root_sha256 = Self::compute_root_sha256(&entries)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            container_type,
            entries,
            root_sha256,
        })
    }

    pub fn compute_root_sha256(entries: &[ManifestEntry]) -> Result<String> {
        let entries_vec: Vec<_> = entries.to_vec();
        let jcs_bytes = serde_json_canonicalizer::to_vec(&entries_vec)?;
        Ok(hex::encode(Sha256::digest(&jcs_bytes)))
    }

    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and check a manifest read from an archive.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| ContainerError::MalformedArchive(format!("manifest: {}", e)))?;

        if manifest.schema_id != SCHEMA_ID {
            return Err(ContainerError::MalformedArchive(format!(
                "unsupported manifest schema {}",
                manifest.schema_id
            )));
        }
        if Self::compute_root_sha256(&manifest.entries)? != manifest.root_sha256 {
            return Err(ContainerError::MalformedArchive(
                "manifest root_sha256 does not match its entries".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &manifest.entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(ContainerError::MalformedArchive(format!(
                    "manifest lists {} twice",
                    entry.name
                )));
            }
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePolicy;

    fn sample_files() -> Vec<DataFile> {
        let policy = StoragePolicy::default();
        vec![
            DataFile::from_bytes(b"hello", "a.txt", "text/plain", &policy).unwrap(),
            DataFile::from_bytes(b"%PDF", "b.pdf", "application/pdf", &policy).unwrap(),
        ]
    }

    #[test]
    fn test_from_data_files_keeps_order() {
        let manifest = Manifest::from_data_files(ContainerType::Bdoc, &sample_files()).unwrap();

        assert_eq!(manifest.schema_id, SCHEMA_ID);
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[0].name, "a.txt");
        assert_eq!(manifest.entries[1].mime_type, "application/pdf");
        assert_eq!(
            manifest.entries[0].sha256,
            hex::encode(Sha256::digest(b"hello"))
        );
        assert_eq!(manifest.root_sha256.len(), 64);
    }

    #[test]
    fn test_root_changes_with_content() {
        let policy = StoragePolicy::default();
        let a = Manifest::from_data_files(ContainerType::Bdoc, &sample_files()).unwrap();
        let mut files = sample_files();
        files[0] = DataFile::from_bytes(b"HELLO", "a.txt", "text/plain", &policy).unwrap();
        let b = Manifest::from_data_files(ContainerType::Bdoc, &files).unwrap();
        assert_ne!(a.root_sha256, b.root_sha256);
    }

    #[test]
    fn test_json_round_trip() {
        let manifest = Manifest::from_data_files(ContainerType::Asice, &sample_files()).unwrap();
        let parsed = Manifest::from_json_bytes(&manifest.to_json_bytes().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_tampered_manifest_rejected() {
        let mut manifest = Manifest::from_data_files(ContainerType::Bdoc, &sample_files()).unwrap();
        manifest.entries[0].size = 999;
        let err = Manifest::from_json_bytes(&manifest.to_json_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, ContainerError::MalformedArchive(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Manifest::from_json_bytes(b"not json"),
            Err(ContainerError::MalformedArchive(_))
        ));
    }
}
