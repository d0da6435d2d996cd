//! In-memory index set: primary map plus configured secondary maps
//! (spec §4.4).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, YourDbError};
use crate::record::Record;
use crate::schema::Schema;
use crate::value::Value;

/// Primary pk -> record map, plus one value -> set<pk> map per indexed
/// field. Every mutation keeps both in lockstep (spec invariant: index
/// coherence); callers are expected to hold the entity's write gate while
/// calling any mutating method.
#[derive(Debug, Default)]
pub struct IndexSet {
    primary: BTreeMap<Value, Record>,
    secondary: BTreeMap<String, BTreeMap<Value, BTreeSet<Value>>>,
}

impl IndexSet {
    pub fn new(indexed_fields: &[String]) -> Self {
        let mut secondary = BTreeMap::new();
        for field in indexed_fields {
            secondary.insert(field.clone(), BTreeMap::new());
        }
        Self {
            primary: BTreeMap::new(),
            secondary,
        }
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Inserts a new record. Fails with `DuplicatePrimaryKey` if the pk is
    /// already live (spec §4.4); use [`IndexSet::replace`] for the
    /// update/replay-convergence path that intentionally supersedes an
    /// existing record under the same pk.
    pub fn insert(&mut self, schema: &Schema, record: Record) -> Result<()> {
        let pk = schema.primary_key_value(&record)?.clone();
        if self.primary.contains_key(&pk) {
            return Err(YourDbError::DuplicatePrimaryKey(format!("{pk:?}")));
        }
        self.index_secondaries(schema, &pk, &record);
        self.primary.insert(pk, record);
        Ok(())
    }

    /// Replaces whatever record (if any) currently lives under `record`'s
    /// pk. Used by update-in-place and by log replay, where a later
    /// INSERT frame for the same pk always supersedes an earlier one
    /// (spec GLOSSARY: "Lazy upgrade" / §4.6 load semantics).
    pub fn replace(&mut self, schema: &Schema, record: Record) -> Result<()> {
        let pk = schema.primary_key_value(&record)?.clone();
        if let Some(old) = self.primary.remove(&pk) {
            self.unindex_secondaries(schema, &pk, &old);
        }
        self.index_secondaries(schema, &pk, &record);
        self.primary.insert(pk, record);
        Ok(())
    }

    pub fn remove(&mut self, schema: &Schema, pk: &Value) -> Option<Record> {
        let old = self.primary.remove(pk)?;
        self.unindex_secondaries(schema, pk, &old);
        Some(old)
    }

    pub fn get(&self, pk: &Value) -> Option<&Record> {
        self.primary.get(pk)
    }

    /// Returns the set of pks whose `field` equals `value`, or `None` if
    /// `field` is not a configured secondary index.
    pub fn lookup(&self, field: &str, value: &Value) -> Option<&BTreeSet<Value>> {
        self.secondary.get(field)?.get(value)
    }

    /// Size of the bucket an equality lookup on `field = value` would
    /// scan, used by the query planner's tie-break (spec §4.6) and by the
    /// `select_explain` diagnostic (SPEC_FULL §C.3).
    pub fn bucket_size(&self, field: &str, value: &Value) -> Option<usize> {
        self.lookup(field, value).map(|s| s.len())
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.secondary.contains_key(field)
    }

    pub fn scan(&self) -> impl Iterator<Item = &Record> {
        self.primary.values()
    }

    fn index_secondaries(&mut self, schema: &Schema, pk: &Value, record: &Record) {
        for field in schema.secondary_indexed_fields() {
            if let Some(value) = record.get(field) {
                self.secondary
                    .entry(field.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(pk.clone());
            }
        }
    }

    fn unindex_secondaries(&mut self, schema: &Schema, pk: &Value, record: &Record) {
        for field in schema.secondary_indexed_fields() {
            if let Some(value) = record.get(field) {
                if let Some(bucket_map) = self.secondary.get_mut(field) {
                    if let Some(bucket) = bucket_map.get_mut(value) {
                        bucket.remove(pk);
                        if bucket.is_empty() {
                            bucket_map.remove(value);
                        }
                    }
                }
            }
        }
    }

    /// Checks index coherence (testable property 2): every pk under a
    /// bucket refers to a live record whose field matches, and vice versa.
    #[cfg(test)]
    pub fn check_coherence(&self, schema: &Schema) -> bool {
        for field in schema.secondary_indexed_fields() {
            let Some(buckets) = self.secondary.get(field) else {
                return false;
            };
            for (value, pks) in buckets {
                for pk in pks {
                    match self.primary.get(pk) {
                        Some(record) if record.get(field) == Some(value) => {}
                        _ => return false,
                    }
                }
            }
            for (pk, record) in &self.primary {
                if let Some(value) = record.get(field) {
                    let present = buckets.get(value).is_some_and(|b| b.contains(pk));
                    if !present {
                        return false;
                    }
                }
            }
        }
        true
    }
}
