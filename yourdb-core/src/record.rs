//! Records: ordered field maps carrying a schema version tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A single schema-validated object. Field order is deterministic
/// (`BTreeMap`) so encoding and full scans are reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub version: u64,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Builds a record at version 1, the default for newly inserted data.
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { version: 1, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Shallow clone, matching the engine's "callers receive shallow
    /// clones" contract for records held by the index set (spec §4.4).
    pub fn shallow_clone(&self) -> Self {
        self.clone()
    }
}
