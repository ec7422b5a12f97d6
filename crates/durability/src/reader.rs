//! WAL replay stream.
//!
//! Reads every segment in sequence order and yields the decoded entries. A
//! truncated tail record (crash artifact) is discarded with a warning; the
//! reader then moves on to the next segment, so a crash during rotation
//! (which leaves both the sealed and the fresh segment on disk) replays
//! cleanly in order.

use crate::record::{read_record, ReadOutcome};
use crate::writer::{list_segments, segment_path};
use ember_core::{Result, WalEntry};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::warn;

/// Result of scanning a WAL directory.
#[derive(Debug, Default)]
pub struct WalReadResult {
    /// All decoded entries, in append order across segments.
    pub entries: Vec<WalEntry>,
    /// Number of truncated tail records discarded.
    pub truncated_tails: usize,
}

/// Read all WAL segments in `dir`, in sequence order.
///
/// Missing directory means an empty WAL. Decode failures on a fully-framed
/// record are real corruption and propagate.
pub fn read_all(dir: &Path) -> Result<WalReadResult> {
    let mut result = WalReadResult::default();

    for seq in list_segments(dir)? {
        let path = segment_path(dir, seq);
        let mut reader = BufReader::new(File::open(&path)?);

        loop {
            match read_record(&mut reader)? {
                ReadOutcome::Record(entry) => result.entries.push(entry),
                ReadOutcome::End => break,
                ReadOutcome::TruncatedTail => {
                    warn!(
                        segment = seq,
                        path = %path.display(),
                        "discarding truncated WAL tail record"
                    );
                    result.truncated_tails += 1;
                    break;
                }
            }
        }
    }

    Ok(result)
}
