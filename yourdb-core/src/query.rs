//! Query planner: picks an indexed seed when available, else full scan
//! (spec §4.6's "deliberately simple planner").

use std::collections::BTreeSet;

use crate::error::{Result, YourDbError};
use crate::filter::{FieldPredicate, Filter};
use crate::index::IndexSet;
use crate::record::Record;
use crate::schema::{coerce_kind, Schema};
use crate::value::Value;

/// Which access path the planner chose, and the candidate-set size before
/// predicate filtering — the test hook spec §8/S2 calls for ("measured
/// candidate set size equals secondary bucket size").
#[derive(Debug, Clone)]
pub enum AccessPath {
    FullScan { candidate_count: usize },
    IndexSeed { field: String, value: Value, candidate_count: usize },
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub access_path: AccessPath,
}

/// Executes `filter` against `index`, returning the matching records and
/// the plan that was used. `schema` supplies the declared field kinds (for
/// the `KindMismatch` check below) and the primary-key field name (which
/// is implicitly indexed, spec §3, via the primary map itself).
pub fn execute(index: &IndexSet, filter: &Filter, schema: &Schema) -> Result<(Vec<Record>, QueryPlan)> {
    for (field, predicate) in &filter.predicates {
        if let Some(kind) = schema.fields.get(field) {
            let operand = predicate.operand();
            coerce_kind(operand, *kind).map_err(|_| YourDbError::KindMismatch {
                field: field.clone(),
                expected: kind.to_string(),
                got: operand.kind().to_string(),
            })?;
        }
    }

    if filter.is_all() {
        let records: Vec<Record> = index.scan().cloned().collect();
        let plan = QueryPlan {
            access_path: AccessPath::FullScan {
                candidate_count: records.len(),
            },
        };
        return Ok((records, plan));
    }

    // Primary-key equality is O(1) via the primary map itself and always
    // wins the smallest-bucket tie-break below (spec §3: "the primary key
    // is implicitly indexed"; spec §4.6's tie-break picks the smallest
    // candidate set, and a pk lookup yields at most one record).
    if let Some(value) = pk_equality_operand(filter, schema) {
        let candidates: Vec<Record> = index.get(value).cloned().into_iter().collect();
        let plan = QueryPlan {
            access_path: AccessPath::IndexSeed {
                field: schema.primary_key.clone(),
                value: value.clone(),
                candidate_count: candidates.len(),
            },
        };
        return Ok((apply_predicates(candidates, filter), plan));
    }

    // Among scalar-equality predicates on secondary-indexed fields, seed
    // from the smallest bucket (spec §4.6 tie-break).
    let mut best_seed: Option<(usize, &str, &Value, &BTreeSet<Value>)> = None;
    for (field, predicate) in &filter.predicates {
        if !predicate.is_scalar_eq() || !index.is_indexed(field) {
            continue;
        }
        if let FieldPredicate::Eq(value) = predicate {
            if let Some(bucket) = index.lookup(field, value) {
                let size = bucket.len();
                if best_seed.map(|(best, ..)| size < best).unwrap_or(true) {
                    best_seed = Some((size, field.as_str(), value, bucket));
                }
            } else {
                // Indexed field with an empty bucket: no candidates at all.
                let plan = QueryPlan {
                    access_path: AccessPath::IndexSeed {
                        field: field.clone(),
                        value: value.clone(),
                        candidate_count: 0,
                    },
                };
                return Ok((Vec::new(), plan));
            }
        }
    }

    let (candidates, plan): (Vec<Record>, QueryPlan) = match best_seed {
        Some((size, field, value, bucket)) => {
            let records: Vec<Record> = bucket.iter().filter_map(|pk| index.get(pk).cloned()).collect();
            let plan = QueryPlan {
                access_path: AccessPath::IndexSeed {
                    field: field.to_string(),
                    value: value.clone(),
                    candidate_count: size,
                },
            };
            (records, plan)
        }
        None => {
            let records: Vec<Record> = index.scan().cloned().collect();
            let plan = QueryPlan {
                access_path: AccessPath::FullScan {
                    candidate_count: records.len(),
                },
            };
            (records, plan)
        }
    };

    Ok((apply_predicates(candidates, filter), plan))
}

/// If `filter` has a scalar-equality predicate on the schema's primary-key
/// field, returns its operand.
fn pk_equality_operand<'a>(filter: &'a Filter, schema: &Schema) -> Option<&'a Value> {
    filter.predicates.iter().find_map(|(field, predicate)| {
        if field == &schema.primary_key {
            if let FieldPredicate::Eq(value) = predicate {
                return Some(value);
            }
        }
        None
    })
}

fn apply_predicates(candidates: Vec<Record>, filter: &Filter) -> Vec<Record> {
    candidates
        .into_iter()
        .filter(|record| {
            filter
                .predicates
                .iter()
                .all(|(field, predicate)| match record.get(field) {
                    Some(value) => predicate.matches(value),
                    None => false,
                })
        })
        .collect()
}
