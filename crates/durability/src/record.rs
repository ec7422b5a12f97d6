//! WAL record framing.
//!
//! # Record layout (little-endian)
//!
//! ```text
//! ┌──────────────────┬─────────────────────┬────────────────────┐
//! │ cmd_type (u16)   │ payload_len (u32)   │ payload (variable) │
//! └──────────────────┴─────────────────────┴────────────────────┘
//! ```
//!
//! There is no per-record checksum; a truncated tail record is detected by
//! short reads and discarded on replay.

use byteorder::{LittleEndian, WriteBytesExt};
use ember_core::{Result, WalEntry};
use std::io::{Read, Write};

/// Size of the fixed record prefix (cmd_type + payload_len).
pub const RECORD_PREFIX_SIZE: usize = 6;

/// Outcome of reading one record from a segment stream.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete record.
    Record(WalEntry),
    /// Clean end of the segment.
    End,
    /// The segment ends mid-record (crash artifact); the tail is discarded.
    TruncatedTail,
}

/// Append one record to a writer. The caller flushes and fsyncs.
pub fn write_record(w: &mut impl Write, entry: &WalEntry) -> Result<()> {
    let payload = entry.encode_payload()?;
    w.write_u16::<LittleEndian>(entry.cmd_type())?;
    w.write_u32::<LittleEndian>(payload.len() as u32)?;
    w.write_all(&payload)?;
    Ok(())
}

/// Read one record from a segment stream.
///
/// Distinguishes clean EOF (no bytes at a record boundary) from a
/// truncated tail (some bytes, but not a whole record). Payloads that
/// frame correctly but fail to decode surface as `Corruption`.
pub fn read_record(r: &mut impl Read) -> Result<ReadOutcome> {
    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
    match read_exact_or_eof(r, &mut prefix)? {
        FillResult::Empty => return Ok(ReadOutcome::End),
        FillResult::Partial => return Ok(ReadOutcome::TruncatedTail),
        FillResult::Full => {}
    }

    let cmd = u16::from_le_bytes([prefix[0], prefix[1]]);
    let len = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]) as usize;

    let mut payload = vec![0u8; len];
    match read_exact_or_eof(r, &mut payload)? {
        FillResult::Full => {}
        FillResult::Empty | FillResult::Partial => return Ok(ReadOutcome::TruncatedTail),
    }

    let entry = WalEntry::decode(cmd, &payload)?;
    Ok(ReadOutcome::Record(entry))
}

enum FillResult {
    Full,
    Partial,
    Empty,
}

fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<FillResult> {
    if buf.is_empty() {
        return Ok(FillResult::Full);
    }
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                FillResult::Empty
            } else {
                FillResult::Partial
            });
        }
        filled += n;
    }
    Ok(FillResult::Full)
}

/// Helper kept for tests and size accounting.
pub fn encoded_size(entry: &WalEntry) -> Result<usize> {
    Ok(RECORD_PREFIX_SIZE + entry.encode_payload()?.len())
}
