//! WAL writer with segment rotation.
//!
//! Segments are named `wal-NNNNNN.seg` (zero-padded sequence number) inside
//! the WAL directory. Only the highest-numbered segment is ever written;
//! rotation seals it and starts the next. Appends and rotation share one
//! mutex, so writes are serialized and rotation is exclusive with respect
//! to appends.
//!
//! Every append is flushed and fsynced before returning; the commit
//! protocol treats a returned append as the durability point.

use crate::record::{read_record, write_record, ReadOutcome};
use ember_core::{Result, WalEntry};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Build the path of a segment file.
pub fn segment_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("wal-{:06}.seg", sequence))
}

/// List the segment sequence numbers present in a WAL directory, sorted.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(seq) = name
            .strip_prefix("wal-")
            .and_then(|rest| rest.strip_suffix(".seg"))
            .and_then(|digits| digits.parse::<u64>().ok())
        {
            out.push(seq);
        }
    }
    out.sort_unstable();
    Ok(out)
}

struct ActiveSegment {
    writer: BufWriter<File>,
    sequence: u64,
}

/// Serialized append-only writer over numbered WAL segments.
pub struct WalWriter {
    dir: PathBuf,
    active: Mutex<ActiveSegment>,
}

impl WalWriter {
    /// Open the WAL in `dir`, appending to the highest existing segment or
    /// creating `wal-000001.seg`.
    ///
    /// A crash artifact (truncated tail record) in the active segment is
    /// cut off first, so new appends land at a record boundary and stay
    /// reachable for replay.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let sequence = list_segments(dir)?.last().copied().unwrap_or(0).max(1);
        let path = segment_path(dir, sequence);
        if path.exists() {
            repair_segment(&path)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(segment = sequence, path = %path.display(), "WAL opened");

        Ok(WalWriter {
            dir: dir.to_path_buf(),
            active: Mutex::new(ActiveSegment {
                writer: BufWriter::new(file),
                sequence,
            }),
        })
    }

    /// Append a record, flush, and fsync.
    ///
    /// When this returns `Ok`, the record is durable.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let mut active = self.active.lock();
        write_record(&mut active.writer, entry)?;
        active.writer.flush()?;
        active.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Seal the active segment and start the next one.
    ///
    /// Returns the new segment's sequence number. The sealed segment stays
    /// on disk; the checkpointer purges covered segments separately, so a
    /// crash between rotation and purge leaves replay with both segments,
    /// in order.
    pub fn rotate(&self) -> Result<u64> {
        let mut active = self.active.lock();

        active.writer.flush()?;
        active.writer.get_ref().sync_all()?;

        let next = active.sequence + 1;
        let path = segment_path(&self.dir, next);
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;

        *active = ActiveSegment {
            writer: BufWriter::new(file),
            sequence: next,
        };

        // Make the new segment's directory entry durable
        File::open(&self.dir)?.sync_all()?;
        info!(segment = next, "WAL rotated");
        Ok(next)
    }

    /// Delete sealed segments with sequence numbers strictly below `seq`.
    ///
    /// Called after a successful checkpoint: everything below the rotation
    /// point is covered by the snapshot.
    pub fn purge_segments_before(&self, seq: u64) -> Result<usize> {
        // Hold the append lock so rotation can't race the directory scan
        let _active = self.active.lock();

        let mut purged = 0;
        for old in list_segments(&self.dir)? {
            if old < seq {
                std::fs::remove_file(segment_path(&self.dir, old))?;
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(purged, below = seq, "purged covered WAL segments");
        }
        Ok(purged)
    }

    /// The active segment's sequence number.
    pub fn current_segment(&self) -> u64 {
        self.active.lock().sequence
    }

    /// Flush and fsync the active segment without rotating.
    pub fn sync(&self) -> Result<()> {
        let mut active = self.active.lock();
        active.writer.flush()?;
        active.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Truncate a segment to its last whole record.
///
/// Scans forward record by record; anything after the last complete record
/// (a partial append from a crash) is cut off so that subsequent appends
/// stay on a record boundary.
fn repair_segment(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let total = file.metadata()?.len();
    let mut valid_end = 0u64;

    loop {
        match read_record(&mut file) {
            Ok(ReadOutcome::Record(_)) => {
                valid_end = file.stream_position()?;
            }
            Ok(ReadOutcome::End) => return Ok(()),
            Ok(ReadOutcome::TruncatedTail) | Err(_) => {
                warn!(
                    path = %path.display(),
                    valid_end,
                    total,
                    "truncating WAL segment to last whole record"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
                return Ok(());
            }
        }
    }
}
