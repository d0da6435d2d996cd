//! Two-phase background compaction (spec §4.7).
//!
//! Phase 1 (under the write gate): snapshot the live record set and note
//! how many frames the log currently holds.
//! Phase 2 (off the gate): write the snapshot to a fresh segment file.
//! Phase 3 (under the write gate again): replay whatever frames were
//! appended during phase 2 on top of the snapshot, write those too, then
//! hand the new file off to the live log with an atomic rename.
//!
//! Readers and writers are blocked only during phases 1 and 3, not while
//! the (potentially large) snapshot is being written out.

use std::fs::OpenOptions;

use crate::codec::{self, Frame};
use crate::entity::EntityEngine;
use crate::error::{Result, YourDbError};
use crate::index::IndexSet;
use crate::record::Record;
use crate::value::Value;

/// Runs one compaction pass over `engine`.
pub fn compact(engine: &EntityEngine) -> Result<()> {
    let (snapshot, seen_frames) = {
        let _guard = engine.gate().write_enter();
        engine.with_state_ref(|index, log| {
            let records: Vec<Record> = index.scan().cloned().collect();
            let frame_count = log.iterate().map(|it| it.count()).unwrap_or(0);
            (records, frame_count)
        })
    };

    let tmp_path = engine.dir().join("data.log.compact.tmp");
    {
        let mut tmp_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| YourDbError::IoError {
                context: "creating compaction segment",
                source: e,
            })?;
        codec::write_frame(&mut tmp_file, &Frame::SnapshotMark)?;
        for record in &snapshot {
            codec::write_frame(&mut tmp_file, &Frame::Insert(record.clone()))?;
        }
    }

    {
        let _guard = engine.gate().write_enter();

        let tail: Vec<(u8, Vec<u8>)> = engine.with_state_ref(|_index, log| {
            log.iterate().map(|it| {
                it.skip(seen_frames)
                    .filter_map(|entry| entry.ok())
                    .map(|entry| (entry.op, entry.payload))
                    .collect()
            })
        })?;

        let mut rebuilt = IndexSet::new(engine.schema().secondary_indexed_fields());
        for record in snapshot {
            rebuilt.replace(engine.schema(), record)?;
        }

        if !tail.is_empty() {
            let mut tmp_file = OpenOptions::new()
                .append(true)
                .open(&tmp_path)
                .map_err(|e| YourDbError::IoError {
                    context: "appending compaction tail",
                    source: e,
                })?;
            apply_tail(engine, &tail, &mut rebuilt, &mut tmp_file)?;
        }

        engine.with_state_mut(|index, log| -> Result<()> {
            log.rename_atomic(&tmp_path)?;
            *index = rebuilt;
            Ok(())
        })?;
    }

    tracing::info!(entity = %engine.entity_name(), "compaction complete");
    Ok(())
}

fn apply_tail(
    engine: &EntityEngine,
    tail: &[(u8, Vec<u8>)],
    rebuilt: &mut IndexSet,
    tmp_file: &mut std::fs::File,
) -> Result<()> {
    let schema = engine.schema();
    for (op, payload) in tail {
        match *op {
            codec::OP_INSERT => {
                let record = codec::decode_insert(payload)?;
                codec::write_frame(tmp_file, &Frame::Insert(record.clone()))?;
                rebuilt.replace(schema, record)?;
            }
            codec::OP_DELETE => {
                let pk: Value = codec::decode_delete(payload)?;
                codec::write_frame(tmp_file, &Frame::Delete(pk.clone()))?;
                rebuilt.remove(schema, &pk);
            }
            codec::OP_SNAPSHOT_MARK => {}
            other => {
                return Err(YourDbError::CorruptFrame {
                    path: engine.dir().join("data.log").display().to_string(),
                    offset: 0,
                    reason: format!("unknown op tag 0x{other:02x} during compaction"),
                })
            }
        }
    }
    Ok(())
}
