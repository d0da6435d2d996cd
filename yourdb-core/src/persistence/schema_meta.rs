//! On-disk schema representation (`entities/<name>/schema.meta`).
//!
//! Mirrors the teacher's `persistence/schema.rs` DTO-vs-runtime-type split:
//! the runtime [`crate::schema::Schema`] carries live upgrade closures that
//! cannot be serialized, so this is a structural projection of it plus a
//! crc32 of its own JSON body for corruption detection, matching
//! `persistence_manager.rs`'s use of `crc32fast::Hasher` on `schema.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{Result, YourDbError};
use crate::schema::Schema;
use crate::value::FieldKind;

#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaMeta {
    pub entity: String,
    pub primary_key: String,
    pub fields: BTreeMap<String, FieldKind>,
    pub indexed: Vec<String>,
    pub version: u64,
    /// Number of upgrade steps the host is expected to re-register before
    /// reads reach `version`; used only to raise `UpgradeChainBroken`
    /// early when a host forgets to register one after reopening.
    pub upgrade_steps_expected: u64,
}

impl SchemaMeta {
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            entity: schema.entity.clone(),
            primary_key: schema.primary_key.clone(),
            fields: schema.fields.clone(),
            indexed: schema.indexed.clone(),
            version: schema.version,
            upgrade_steps_expected: schema.version.saturating_sub(1),
        }
    }

    /// Checksum of this schema's structural shape, stored alongside its
    /// name in `catalog.meta` so a catalog listing can flag drift without
    /// opening every entity's own `schema.meta`.
    pub fn checksum(&self) -> Result<u32> {
        let body = serde_json::to_vec(self).map_err(|e| YourDbError::Codec(e.to_string()))?;
        Ok(crc32(&body))
    }

    /// Cross-checks a freshly host-constructed `Schema` (upgrade closures
    /// and all) against what was last persisted for this entity. Upgrade
    /// functions can't round-trip through disk, so the host re-supplies
    /// the schema, including its upgrade chain, on every open; this is
    /// the structural part we *can* verify didn't drift underneath it.
    pub fn validate_against(&self, schema: &Schema) -> Result<()> {
        if self.entity != schema.entity
            || self.primary_key != schema.primary_key
            || self.fields != schema.fields
            || self.indexed != schema.indexed
        {
            return Err(YourDbError::InvalidSchema {
                entity: schema.entity.clone(),
                reason: "supplied schema does not match the persisted schema.meta".to_string(),
            });
        }
        if schema.version < self.version {
            return Err(YourDbError::UpgradeChainBroken {
                entity: schema.entity.clone(),
                from: self.version,
                to: schema.version,
            });
        }
        Ok(())
    }

    /// Writes `self` as `<path>.tmp` then renames over `path`, the same
    /// write-temp-then-rename discipline `persistence_manager.rs` uses for
    /// `schema.json`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self).map_err(|e| YourDbError::Codec(e.to_string()))?;
        let checksum = crc32(&body);
        let envelope = SchemaMetaEnvelope { checksum, body };

        let tmp_path = path.with_extension("meta.tmp");
        let envelope_bytes =
            serde_json::to_vec_pretty(&envelope).map_err(|e| YourDbError::Codec(e.to_string()))?;
        fs::write(&tmp_path, envelope_bytes).map_err(|e| YourDbError::IoError {
            context: "writing schema.meta.tmp",
            source: e,
        })?;
        fs::rename(&tmp_path, path).map_err(|e| YourDbError::IoError {
            context: "renaming schema.meta into place",
            source: e,
        })?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| YourDbError::IoError {
            context: "reading schema.meta",
            source: e,
        })?;
        let envelope: SchemaMetaEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| YourDbError::Codec(e.to_string()))?;
        if crc32(&envelope.body) != envelope.checksum {
            return Err(YourDbError::CorruptFrame {
                path: path.display().to_string(),
                offset: 0,
                reason: "schema.meta checksum mismatch".to_string(),
            });
        }
        serde_json::from_slice(&envelope.body).map_err(|e| YourDbError::Codec(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct SchemaMetaEnvelope {
    checksum: u32,
    body: Vec<u8>,
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.meta");

        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldKind::Int);
        let schema = Schema::new("users", "id", fields, vec![]).unwrap();
        let meta = SchemaMeta::from_schema(&schema);
        meta.write_to(&path).unwrap();

        let loaded = SchemaMeta::read_from(&path).unwrap();
        assert_eq!(loaded.entity, "users");
        assert_eq!(loaded.primary_key, "id");
    }

    #[test]
    fn corrupted_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.meta");
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldKind::Int);
        let schema = Schema::new("users", "id", fields, vec![]).unwrap();
        SchemaMeta::from_schema(&schema).write_to(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            SchemaMeta::read_from(&path),
            Err(YourDbError::CorruptFrame { .. }) | Err(YourDbError::Codec(_))
        ));
    }
}
