//! On-disk catalog index (`catalog.meta`, spec §6).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{Result, YourDbError};

const CATALOG_META_VERSION: u32 = 1;

/// Versioned list of entity names registered in a database root, with a
/// checksum per entity for corruption detection on open.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CatalogMeta {
    pub version: u32,
    pub entities: BTreeMap<String, u32>,
}

impl CatalogMeta {
    pub fn new() -> Self {
        Self {
            version: CATALOG_META_VERSION,
            entities: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, entity: String, schema_checksum: u32) {
        self.entities.insert(entity, schema_checksum);
    }

    pub fn remove(&mut self, entity: &str) {
        self.entities.remove(entity);
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// Writes via a temp-file-then-rename, the same durability pattern the
    /// teacher's `persistence_manager.rs` uses for `schema.json`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self).map_err(|e| YourDbError::Codec(e.to_string()))?;
        let checksum = crc32(&body);
        let envelope = CatalogMetaEnvelope { checksum, body };
        let envelope_bytes =
            serde_json::to_vec_pretty(&envelope).map_err(|e| YourDbError::Codec(e.to_string()))?;

        let tmp_path = path.with_extension("meta.tmp");
        fs::write(&tmp_path, envelope_bytes).map_err(|e| YourDbError::IoError {
            context: "writing catalog.meta.tmp",
            source: e,
        })?;
        fs::rename(&tmp_path, path).map_err(|e| YourDbError::IoError {
            context: "renaming catalog.meta into place",
            source: e,
        })?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path).map_err(|e| YourDbError::IoError {
            context: "reading catalog.meta",
            source: e,
        })?;
        let envelope: CatalogMetaEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| YourDbError::Codec(e.to_string()))?;
        if crc32(&envelope.body) != envelope.checksum {
            return Err(YourDbError::CorruptFrame {
                path: path.display().to_string(),
                offset: 0,
                reason: "catalog.meta checksum mismatch".to_string(),
            });
        }
        serde_json::from_slice(&envelope.body).map_err(|e| YourDbError::Codec(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct CatalogMetaEnvelope {
    checksum: u32,
    body: Vec<u8>,
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
