//! Binary codec for collection files.
//!
//! # Layout (all integers little-endian)
//!
//! ```text
//! u32 num_indexes
//!   repeat: u32 len, field_name bytes
//! u32 num_entries
//!   repeat: u32 key_len, key bytes
//!           u32 val_len, value bytes      // JSON; may carry _deleted:true
//! ```
//!
//! The main store file uses the same layout with `num_indexes = 0`.
//!
//! Every update path is atomic: write `<path>.tmp`, flush, fsync, rename
//! over the original, fsync the directory. Files are never truncated in
//! place. The rewriter streams records through a callback and patches the
//! entry count into the header afterwards, so a rewrite with the identity
//! callback is byte-identical to its input.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ember_core::{document, EmberError, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix for the temporary file an atomic update goes through.
const TMP_SUFFIX: &str = "tmp";

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(TMP_SUFFIX);
    PathBuf::from(os)
}

/// fsync the directory containing `path`, making a rename durable.
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

fn read_lp_bytes(r: &mut impl Read, what: &str) -> Result<Vec<u8>> {
    let len = r
        .read_u32::<LittleEndian>()
        .map_err(|e| EmberError::corruption(format!("truncated {} length: {}", what, e)))?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)
        .map_err(|e| EmberError::corruption(format!("truncated {}: {}", what, e)))?;
    Ok(buf)
}

fn write_lp_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

// ============================================================================
// Reader
// ============================================================================

/// Streaming reader over a collection file.
pub struct CollectionFileReader {
    reader: BufReader<File>,
    fields: Vec<String>,
    num_entries: u32,
    remaining: u32,
}

impl CollectionFileReader {
    /// Open a collection file and parse its index header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let num_indexes = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| EmberError::corruption(format!("truncated index header: {}", e)))?;
        let mut fields = Vec::with_capacity(num_indexes as usize);
        for _ in 0..num_indexes {
            let name = read_lp_bytes(&mut reader, "index field name")?;
            let name = String::from_utf8(name)
                .map_err(|_| EmberError::corruption("index field name is not UTF-8"))?;
            fields.push(name);
        }

        let num_entries = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| EmberError::corruption(format!("truncated entry count: {}", e)))?;

        Ok(CollectionFileReader {
            reader,
            fields,
            num_entries,
            remaining: num_entries,
        })
    }

    /// Indexed field names recorded in the header.
    pub fn indexed_fields(&self) -> &[String] {
        &self.fields
    }

    /// Entry count recorded in the header.
    pub fn num_entries(&self) -> u32 {
        self.num_entries
    }

    /// Read the next full record, or `None` past the last entry.
    pub fn next_record(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let key = read_lp_bytes(&mut self.reader, "record key")?;
        let key =
            String::from_utf8(key).map_err(|_| EmberError::corruption("record key is not UTF-8"))?;
        let value = read_lp_bytes(&mut self.reader, "record value")?;
        Ok(Some((key, value)))
    }

    /// Read the next record's key, seeking past its value without decoding.
    pub fn next_key(&mut self) -> Result<Option<String>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let key = read_lp_bytes(&mut self.reader, "record key")?;
        let key =
            String::from_utf8(key).map_err(|_| EmberError::corruption("record key is not UTF-8"))?;

        let val_len = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| EmberError::corruption(format!("truncated record value length: {}", e)))?;
        self.reader.seek_relative(val_len as i64)?;
        Ok(Some(key))
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Write a complete collection file atomically.
///
/// `fields` becomes the index header; `entries` are written in iteration
/// order. The temp file is fsynced before it replaces the original.
pub fn save<'a, I>(path: &Path, fields: &[String], entries: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let tmp = tmp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);

        writer.write_u32::<LittleEndian>(fields.len() as u32)?;
        for field in fields {
            write_lp_bytes(&mut writer, field.as_bytes())?;
        }

        // Entry count is known up front on the save path; the rewriter is
        // the one that needs the placeholder-and-patch dance
        let entries: Vec<(&str, &[u8])> = entries.into_iter().collect();
        writer.write_u32::<LittleEndian>(entries.len() as u32)?;
        for (key, value) in entries {
            write_lp_bytes(&mut writer, key.as_bytes())?;
            write_lp_bytes(&mut writer, value)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    sync_parent_dir(path)?;
    Ok(())
}

/// What the rewrite callback decides per record.
pub enum RewriteAction {
    /// Keep the record with these value bytes (possibly unchanged).
    Keep(Vec<u8>),
    /// Drop the record.
    Skip,
}

/// Rewrite a collection file in place through a per-record callback.
///
/// 1. copies the source index header to the destination,
/// 2. writes a placeholder entry count of zero,
/// 3. streams records through `f`,
/// 4. seeks back and patches the final count into the header,
/// 5. fsyncs and atomically renames the temp file over the source.
///
/// Returns the number of records kept.
pub fn rewrite<F>(path: &Path, f: F) -> Result<u32>
where
    F: FnMut(&str, Vec<u8>) -> RewriteAction,
{
    rewrite_with(path, f, Vec::new)
}

/// Like [`rewrite`], but appends extra records after the streamed ones.
///
/// `trailing` runs after the source has been fully streamed, so it can
/// compute the records the callback did not see (the save path uses this to
/// append keys that are new since the file was last written).
pub fn rewrite_with<F, G>(path: &Path, mut f: F, trailing: G) -> Result<u32>
where
    F: FnMut(&str, Vec<u8>) -> RewriteAction,
    G: FnOnce() -> Vec<(String, Vec<u8>)>,
{
    let mut reader = CollectionFileReader::open(path)?;
    let tmp = tmp_path(path);

    let kept = {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);

        // Header is reproduced exactly
        let fields = reader.indexed_fields().to_vec();
        writer.write_u32::<LittleEndian>(fields.len() as u32)?;
        for field in &fields {
            write_lp_bytes(&mut writer, field.as_bytes())?;
        }

        let count_pos = writer.stream_position()?;
        writer.write_u32::<LittleEndian>(0)?;

        let mut kept: u32 = 0;
        while let Some((key, value)) = reader.next_record()? {
            match f(&key, value) {
                RewriteAction::Keep(new_value) => {
                    write_lp_bytes(&mut writer, key.as_bytes())?;
                    write_lp_bytes(&mut writer, &new_value)?;
                    kept += 1;
                }
                RewriteAction::Skip => {}
            }
        }

        for (key, value) in trailing() {
            write_lp_bytes(&mut writer, key.as_bytes())?;
            write_lp_bytes(&mut writer, &value)?;
            kept += 1;
        }

        writer.flush()?;
        let file = writer.get_mut();
        file.seek(SeekFrom::Start(count_pos))?;
        file.write_u32::<LittleEndian>(kept)?;
        file.sync_all()?;
        kept
    };

    std::fs::rename(&tmp, path)?;
    sync_parent_dir(path)?;
    Ok(kept)
}

/// Rewrite a collection file dropping every record whose document carries
/// `_deleted: true`. Returns the number of records kept. Idempotent.
pub fn compact(path: &Path) -> Result<u32> {
    rewrite(path, |_key, value| {
        match document::decode(&value) {
            Some(doc) if document::is_tombstone(&doc) => RewriteAction::Skip,
            _ => RewriteAction::Keep(value),
        }
    })
}

// ============================================================================
// Key-only probes
// ============================================================================

/// Check whether a key exists in the cold file without decoding any values.
pub fn check_cold_key_exists(path: &Path, key: &str) -> Result<bool> {
    let mut reader = CollectionFileReader::open(path)?;
    while let Some(k) = reader.next_key()? {
        if k == key {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check many keys in one pass. Returns the subset present in the file.
pub fn check_many_cold_keys_exist(
    path: &Path,
    keys: &HashSet<String>,
) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    if keys.is_empty() {
        return Ok(found);
    }
    let mut reader = CollectionFileReader::open(path)?;
    while let Some(k) = reader.next_key()? {
        if keys.contains(&k) {
            found.insert(k);
            if found.len() == keys.len() {
                break;
            }
        }
    }
    Ok(found)
}
