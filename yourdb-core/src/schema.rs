//! Schema declaration, validation, and the upgrade chain (spec §4.1).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, YourDbError};
use crate::record::Record;
use crate::value::{FieldKind, Value};

/// A host-supplied transformation taking a record at version `v` to a
/// record at version `v + 1`. Not required to be `Send`/`Sync` beyond what
/// a single-process, single-entity-gate engine needs (spec §5: no
/// cross-entity concurrency requirement reaches into upgrade steps).
pub type UpgradeStep = Arc<dyn Fn(&Record) -> Result<Record>>;

/// Immutable-after-creation schema for one entity, except via
/// [`Schema::register_upgrade`] which only ever appends to the chain.
#[derive(Clone)]
pub struct Schema {
    pub entity: String,
    pub primary_key: String,
    pub fields: BTreeMap<String, FieldKind>,
    pub indexed: Vec<String>,
    pub version: u64,
    upgrades: BTreeMap<u64, UpgradeStep>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("entity", &self.entity)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields)
            .field("indexed", &self.indexed)
            .field("version", &self.version)
            .field("upgrade_chain_len", &self.upgrades.len())
            .finish()
    }
}

impl Schema {
    /// Builds a new schema at version 1. `primary_key` must name a field
    /// present in `fields`.
    pub fn new(
        entity: impl Into<String>,
        primary_key: impl Into<String>,
        fields: BTreeMap<String, FieldKind>,
        indexed: Vec<String>,
    ) -> Result<Self> {
        let entity = entity.into();
        let primary_key = primary_key.into();
        if !fields.contains_key(&primary_key) {
            return Err(YourDbError::InvalidSchema {
                entity,
                reason: format!("primary key '{primary_key}' is not a declared field"),
            });
        }
        for field in &indexed {
            if !fields.contains_key(field) {
                return Err(YourDbError::InvalidSchema {
                    entity,
                    reason: format!("indexed field '{field}' is not a declared field"),
                });
            }
        }
        Ok(Self {
            entity,
            primary_key,
            fields,
            indexed,
            version: 1,
            upgrades: BTreeMap::new(),
        })
    }

    /// The fields the engine maintains a *secondary* index over. The
    /// primary key is implicitly indexed too (spec §3), but that index is
    /// the primary map itself — `query::execute` special-cases it rather
    /// than listing it here.
    pub fn secondary_indexed_fields(&self) -> &[String] {
        &self.indexed
    }

    /// Registers the `from_v -> from_v + 1` step. The chain must stay
    /// gapless: steps must be registered in order `1->2, 2->3, …` up to
    /// the schema's current version (spec §4.1).
    pub fn register_upgrade(&mut self, from_v: u64, step: UpgradeStep) -> Result<()> {
        let expected_next = self.upgrades.len() as u64 + 1;
        if from_v != expected_next {
            return Err(YourDbError::InvalidSchema {
                entity: self.entity.clone(),
                reason: format!(
                    "upgrade chain must be gapless: expected step from version {expected_next}, got {from_v}"
                ),
            });
        }
        self.upgrades.insert(from_v, step);
        self.version = self.upgrades.len() as u64 + 1;
        Ok(())
    }

    /// Applies the upgrade chain to bring `record` from its stored
    /// version up to `self.version`, one step at a time (lazy upgrade,
    /// spec §4.6 / GLOSSARY).
    pub fn upgrade(&self, record: &Record) -> Result<Record> {
        let mut current = record.clone();
        while current.version < self.version {
            let step = self.upgrades.get(&current.version).ok_or_else(|| {
                YourDbError::UpgradeChainBroken {
                    entity: self.entity.clone(),
                    from: current.version,
                    to: self.version,
                }
            })?;
            current = step(&current)?;
            current.version += 1;
        }
        Ok(current)
    }

    /// Validates a record against this schema (spec §4.1): every declared
    /// field present with matching kind, no extra fields, pk present.
    pub fn validate(&self, record: &Record) -> Result<()> {
        for (name, kind) in &self.fields {
            match record.fields.get(name) {
                None => {
                    return Err(YourDbError::SchemaViolation {
                        field: name.clone(),
                        expected: format!("present ({kind})"),
                        got: "missing".to_string(),
                    })
                }
                Some(value) => {
                    if value.kind() != *kind {
                        return Err(YourDbError::SchemaViolation {
                            field: name.clone(),
                            expected: kind.to_string(),
                            got: value.kind().to_string(),
                        });
                    }
                }
            }
        }
        for name in record.fields.keys() {
            if !self.fields.contains_key(name) {
                return Err(YourDbError::SchemaViolation {
                    field: name.clone(),
                    expected: "declared field".to_string(),
                    got: "undeclared field".to_string(),
                });
            }
        }
        match record.fields.get(&self.primary_key) {
            None => {
                return Err(YourDbError::SchemaViolation {
                    field: self.primary_key.clone(),
                    expected: "present".to_string(),
                    got: "missing".to_string(),
                })
            }
            Some(Value::Str(s)) if s.is_empty() => {
                return Err(YourDbError::SchemaViolation {
                    field: self.primary_key.clone(),
                    expected: "non-null".to_string(),
                    got: "empty string".to_string(),
                })
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn primary_key_value<'a>(&self, record: &'a Record) -> Result<&'a Value> {
        record.get(&self.primary_key).ok_or_else(|| YourDbError::SchemaViolation {
            field: self.primary_key.clone(),
            expected: "present".to_string(),
            got: "missing".to_string(),
        })
    }
}

/// Coerces a value into a declared kind. No implicit widening: integer and
/// floating-point are never interchanged (spec §4.1).
pub fn coerce_kind(value: &Value, kind: FieldKind) -> Result<()> {
    if value.kind() != kind {
        return Err(YourDbError::KindMismatch {
            field: String::new(),
            expected: kind.to_string(),
            got: value.kind().to_string(),
        });
    }
    Ok(())
}
