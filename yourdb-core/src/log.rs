//! Append-only log segment (spec §4.3).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::{self, Frame, ReadFrame};
use crate::error::{Result, YourDbError};
use crate::persistence::io_utils::retry_io_operation;

/// One decoded entry from a replayed log, with its sequence number.
pub struct LogEntry {
    pub seq: u64,
    pub op: u8,
    pub payload: Vec<u8>,
}

/// The append-only file backing one entity. Appends are serialized by the
/// caller holding the entity's write gate (spec §4.3: "no intra-segment
/// locking is needed").
pub struct LogSegment {
    path: PathBuf,
    file: File,
    next_seq: u64,
    io_max_retries: u32,
    io_retry_delay_ms: u64,
}

impl LogSegment {
    /// Opens (creating if absent) the log segment at `path`. Does not
    /// replay it; callers that need the prior state call [`LogSegment::iterate`].
    pub fn open(path: impl AsRef<Path>, io_max_retries: u32, io_retry_delay_ms: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| YourDbError::IoError {
                context: "opening log segment",
                source: e,
            })?;
        let next_seq = Self::highest_seq(&path)?.map(|s| s + 1).unwrap_or(0);
        Ok(Self {
            path,
            file,
            next_seq,
            io_max_retries,
            io_retry_delay_ms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scans the existing file purely to recover the next sequence number
    /// on reopen; tolerates a truncated tail the same way [`LogSegment::iterate`] does.
    fn highest_seq(path: &Path) -> Result<Option<u64>> {
        let mut highest = None;
        for entry in LogSegment::iterate_path(path)? {
            let entry = entry?;
            highest = Some(entry.seq);
        }
        Ok(highest)
    }

    /// Appends one frame, flushing and fsyncing before returning, per the
    /// flush-then-fsync discipline in spec §4.3. Returns the assigned
    /// sequence number.
    pub fn append(&mut self, frame: &Frame) -> Result<u64> {
        let seq = self.next_seq;
        let mut buf = Vec::new();
        frame.encode(&mut buf)?;

        retry_io_operation(
            || {
                self.file.write_all(&buf).map_err(|e| YourDbError::IoError {
                    context: "appending log frame",
                    source: e,
                })
            },
            self.io_max_retries,
            self.io_retry_delay_ms,
            "log append",
        )?;
        self.sync()?;

        self.next_seq += 1;
        Ok(seq)
    }

    /// Forces a durable flush (spec §4.3).
    pub fn sync(&mut self) -> Result<()> {
        retry_io_operation(
            || {
                self.file.sync_data().map_err(|e| YourDbError::IoError {
                    context: "fsyncing log segment",
                    source: e,
                })
            },
            self.io_max_retries,
            self.io_retry_delay_ms,
            "log sync",
        )
    }

    /// Iterates the segment from the beginning, tolerating a truncated
    /// trailing frame (spec §4.3/§4.2).
    pub fn iterate(&self) -> Result<impl Iterator<Item = Result<LogEntry>>> {
        Self::iterate_path(&self.path)
    }

    fn iterate_path(path: &Path) -> Result<impl Iterator<Item = Result<LogEntry>>> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| YourDbError::IoError {
                context: "opening log segment for replay",
                source: e,
            })?;
        let total_len = file
            .metadata()
            .map_err(|e| YourDbError::IoError {
                context: "statting log segment for replay",
                source: e,
            })?
            .len();
        let path_display = path.display().to_string();
        Ok(LogIterator {
            reader: BufReader::new(file),
            offset: 0,
            seq: 0,
            path: path_display,
            total_len,
            done: false,
        })
    }

    /// Atomically renames this segment's file over `new_path`, handing off
    /// compaction output (spec §4.3/§4.7). After a successful rename the
    /// segment's own handle is repointed at the new path.
    pub fn rename_atomic(&mut self, new_path: impl AsRef<Path>) -> Result<()> {
        let new_path = new_path.as_ref();
        std::fs::rename(new_path, &self.path).map_err(|e| YourDbError::IoError {
            context: "renaming compacted segment into place",
            source: e,
        })?;
        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| YourDbError::IoError {
                context: "reopening log segment after compaction",
                source: e,
            })?;
        self.next_seq = Self::highest_seq(&self.path)?.map(|s| s + 1).unwrap_or(0);
        Ok(())
    }
}

struct LogIterator {
    reader: BufReader<File>,
    offset: u64,
    seq: u64,
    path: String,
    total_len: u64,
    done: bool,
}

impl Iterator for LogIterator {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // A checksum mismatch is only tolerated when the frame turns out
        // to be the last bytes in the file; `read_frame` derives that from
        // `total_len`, the file's length captured when iteration began, not
        // a blanket assumption that every frame is the last one.
        let start_offset = self.offset;
        match codec::read_frame(&mut self.reader, start_offset, &self.path, self.total_len) {
            Ok(ReadFrame::Eof) => {
                self.done = true;
                None
            }
            Ok(ReadFrame::TruncatedTail) => {
                self.done = true;
                None
            }
            Ok(ReadFrame::Frame { op, payload }) => {
                let seq = self.seq;
                self.seq += 1;
                let consumed = 4 + 1 + payload.len() + 4;
                self.offset += consumed as u64;
                // Reposition defensively in case read_frame buffered ahead
                // (BufReader may have read more than one frame's worth;
                // seeking keeps offset bookkeeping exact for error reporting).
                let _ = self.reader.get_mut().seek(SeekFrom::Start(self.offset));
                Some(Ok(LogEntry { seq, op, payload }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
