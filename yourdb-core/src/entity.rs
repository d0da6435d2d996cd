//! Entity Engine (C6): the public CRUD + query surface, orchestrating
//! schema validation, the codec, the log segment, the index set, and the
//! concurrency gate (spec §4.6).

use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};

use crate::codec::{self, Frame};
use crate::config::EngineConfig;
use crate::error::{Result, YourDbError};
use crate::filter::Filter;
use crate::gate::Gate;
use crate::index::IndexSet;
use crate::log::LogSegment;
use crate::query::{self, QueryPlan};
use crate::record::Record;
use crate::schema::Schema;
use crate::value::Value;

/// The mutable state an entity owns: its index set and its log segment.
/// Every field here is touched only while the owning [`Gate`] is held —
/// read or write, per spec §5's shared-resource policy — which is the
/// invariant that makes the `UnsafeCell` below sound.
struct EntityState {
    index: IndexSet,
    log: LogSegment,
}

/// One open entity: schema, gate, and the state it protects.
///
/// # Safety
/// `state` is accessed through `&self` from every method, guarded only by
/// `gate`, not by a second lock of its own — exactly the "Index Set and
/// log file... mutated only under its write gate, read only under its
/// read or write gate" policy from spec §5. Every access path below first
/// acquires a `ReadGuard` or `WriteGuard` before dereferencing `state`,
/// which is the sole safety requirement for the `UnsafeCell`.
pub struct EntityEngine {
    schema: Schema,
    gate: Gate,
    state: UnsafeCell<EntityState>,
    config: EngineConfig,
    dir: PathBuf,
}

// SAFETY: all access to `state` is serialized/shared correctly by `gate`
// (see the struct-level safety comment); the engine is therefore safe to
// share across threads the same way a `RwLock`-guarded type would be.
unsafe impl Sync for EntityEngine {}

impl EntityEngine {
    /// Opens (creating the log file if absent) the entity at `dir`,
    /// replaying its log to rebuild the index set (spec §4.6 "Load/open").
    pub fn open(dir: impl AsRef<Path>, schema: Schema, config: EngineConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| YourDbError::IoError {
            context: "creating entity directory",
            source: e,
        })?;
        let log_path = dir.join("data.log");
        let log = LogSegment::open(&log_path, config.io_max_retries, config.io_retry_delay_ms)?;

        let mut index = IndexSet::new(schema.secondary_indexed_fields());
        replay_into(&log, &schema, &mut index)?;

        tracing::info!(entity = %schema.entity, records = index.len(), "entity opened");

        Ok(Self {
            schema,
            gate: Gate::new(),
            state: UnsafeCell::new(EntityState { index, log }),
            config,
            dir,
        })
    }

    pub fn entity_name(&self) -> &str {
        &self.schema.entity
    }

    #[allow(clippy::mut_from_ref)]
    fn state_mut(&self) -> &mut EntityState {
        // SAFETY: caller holds a write guard for the duration of use.
        unsafe { &mut *self.state.get() }
    }

    fn state_ref(&self) -> &EntityState {
        // SAFETY: caller holds at least a read guard for the duration of use.
        unsafe { &*self.state.get() }
    }

    /// Validates and appends `record` (spec §4.6 insert).
    pub fn insert(&self, mut record: Record) -> Result<()> {
        let _guard = self.gate.write_enter();
        self.schema.validate(&record)?;
        record.version = self.schema.version;

        let pk = self.schema.primary_key_value(&record)?.clone();
        let state = self.state_ref();
        if state.index.get(&pk).is_some() {
            return Err(YourDbError::DuplicatePrimaryKey(format!("{pk:?}")));
        }

        let state = self.state_mut();
        state.log.append(&Frame::Insert(record.clone()))?;
        state.index.insert(&self.schema, record).expect("pk uniqueness already checked");
        Ok(())
    }

    /// Deletes every record matching `filter`, returning the count removed
    /// (spec §4.6 delete).
    pub fn delete(&self, filter: &Filter) -> Result<usize> {
        let _guard = self.gate.write_enter();
        let state = self.state_ref();
        let (matches, _) = query::execute(&state.index, filter, &self.schema)?;
        if matches.is_empty() {
            return Ok(0);
        }

        let state = self.state_mut();
        let mut pks = Vec::with_capacity(matches.len());
        for record in &matches {
            let pk = self.schema.primary_key_value(record)?.clone();
            state.log.append(&Frame::Delete(pk.clone()))?;
            pks.push(pk);
        }
        state.log.sync()?;
        for pk in &pks {
            state.index.remove(&self.schema, pk);
        }
        Ok(pks.len())
    }

    /// Applies `transform` to every record matching `filter`, re-validates,
    /// and appends the replacement at the current schema version. Aborts
    /// on the first validation failure, leaving already-applied
    /// replacements in place (spec §4.6: "already-appended replacements
    /// are not rolled back").
    pub fn update(
        &self,
        filter: &Filter,
        transform: impl Fn(&Record) -> Record,
    ) -> Result<usize> {
        let _guard = self.gate.write_enter();
        let state = self.state_ref();
        let (matches, _) = query::execute(&state.index, filter, &self.schema)?;

        let mut applied = 0;
        for old in matches {
            let old_pk = self.schema.primary_key_value(&old)?.clone();
            let mut new_record = transform(&old);
            new_record.version = self.schema.version;
            self.schema.validate(&new_record)?;
            let new_pk = self.schema.primary_key_value(&new_record)?.clone();
            if new_pk != old_pk {
                return Err(YourDbError::PrimaryKeyImmutable {
                    entity: self.schema.entity.clone(),
                });
            }

            let state = self.state_mut();
            state.log.append(&Frame::Insert(new_record.clone()))?;
            state.index.replace(&self.schema, new_record)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Plans and executes `filter`, returning a snapshot of matching
    /// records (spec §4.6 select). Fails with `KindMismatch` if a filter
    /// operand's kind doesn't match its field's declared kind (spec §7).
    pub fn select(&self, filter: &Filter) -> Result<Vec<Record>> {
        let _guard = self.gate.read_enter();
        let state = self.state_ref();
        Ok(query::execute(&state.index, filter, &self.schema)?.0)
    }

    /// Same as [`EntityEngine::select`] but also returns the chosen access
    /// path, for tests/diagnostics that need to observe candidate-set size
    /// (SPEC_FULL §C.3, scenario S2).
    pub fn select_explain(&self, filter: &Filter) -> Result<(Vec<Record>, QueryPlan)> {
        let _guard = self.gate.read_enter();
        let state = self.state_ref();
        query::execute(&state.index, filter, &self.schema)
    }

    /// Triggers compaction unconditionally (spec §4.7).
    pub fn optimize(&self) -> Result<()> {
        crate::compactor::compact(self)
    }

    /// Runs compaction only if the live/frame-count ratio has dropped
    /// below the configured trigger (spec §4.7 "or by explicit optimize()").
    pub fn maybe_compact(&self) -> Result<()> {
        if self.config.compaction_trigger_ratio <= 0.0 {
            return Ok(());
        }
        let (live, frames) = {
            let _guard = self.gate.read_enter();
            let state = self.state_ref();
            (state.index.len(), self.frame_count_hint())
        };
        if frames == 0 {
            return Ok(());
        }
        let ratio = live as f64 / frames as f64;
        if ratio < self.config.compaction_trigger_ratio {
            self.optimize()?;
        }
        Ok(())
    }

    fn frame_count_hint(&self) -> usize {
        let state = self.state_ref();
        state.log.iterate().map(|it| it.count()).unwrap_or(0)
    }

    /// Flushes and releases the log file handle. I/O after `close()` is a
    /// programming error (mirrors the teacher's explicit-lifecycle style
    /// over relying solely on `Drop` for fallible I/O).
    pub fn close(&self) -> Result<()> {
        let _guard = self.gate.write_enter();
        self.state_mut().log.sync()
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.gate
    }

    pub(crate) fn with_state_ref<R>(&self, f: impl FnOnce(&IndexSet, &LogSegment) -> R) -> R {
        let state = self.state_ref();
        f(&state.index, &state.log)
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut IndexSet, &mut LogSegment) -> R) -> R {
        let state = self.state_mut();
        f(&mut state.index, &mut state.log)
    }
}

/// Replays a log segment into a fresh index set, lazily upgrading each
/// INSERT to the schema's current version (spec §4.6 "Load/open").
fn replay_into(log: &LogSegment, schema: &Schema, index: &mut IndexSet) -> Result<()> {
    for entry in log.iterate()? {
        let entry = entry?;
        match entry.op {
            codec::OP_INSERT => {
                let stored = codec::decode_insert(&entry.payload)?;
                let upgraded = schema.upgrade(&stored)?;
                schema.validate(&upgraded)?;
                index.replace(schema, upgraded)?;
            }
            codec::OP_DELETE => {
                let pk = codec::decode_delete(&entry.payload)?;
                index.remove(schema, &pk);
            }
            codec::OP_SNAPSHOT_MARK => {
                // Informational boundary only (spec §4.6).
            }
            other => {
                return Err(YourDbError::CorruptFrame {
                    path: log.path().display().to_string(),
                    offset: entry.seq,
                    reason: format!("unknown op tag 0x{other:02x}"),
                })
            }
        }
    }
    Ok(())
}
