//! On-disk layout of a database directory.
//!
//! ```text
//! <root>/
//!   main.db            main store file (collection format, empty header)
//!   collections/       one file per collection: <name>.col
//!   wal/               numbered WAL segments
//!   backups/<name>/    full copies produced by the external scheduler
//! ```

use std::path::{Path, PathBuf};

/// Resolved paths under a database root directory.
#[derive(Debug, Clone)]
pub struct DatabasePaths {
    root: PathBuf,
}

impl DatabasePaths {
    /// Wrap a database root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DatabasePaths { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The main store file.
    pub fn main_store_file(&self) -> PathBuf {
        self.root.join("main.db")
    }

    /// Directory holding collection files.
    pub fn collections_dir(&self) -> PathBuf {
        self.root.join("collections")
    }

    /// A collection's file.
    pub fn collection_file(&self, name: &str) -> PathBuf {
        self.collections_dir().join(format!("{}.col", name))
    }

    /// The WAL directory.
    pub fn wal_dir(&self) -> PathBuf {
        self.root.join("wal")
    }

    /// Directory holding named backups.
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// A named backup's directory.
    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.backups_dir().join(name)
    }

    /// Create the directories the engine writes into.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.collections_dir())?;
        std::fs::create_dir_all(self.wal_dir())?;
        Ok(())
    }

    /// Names of collections that have a file on disk.
    pub fn existing_collections(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let dir = self.collections_dir();
        if !dir.exists() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".col") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path());
        paths.ensure_layout().unwrap();

        assert!(paths.collections_dir().is_dir());
        assert!(paths.wal_dir().is_dir());
        assert_eq!(
            paths.collection_file("people"),
            dir.path().join("collections/people.col")
        );
    }

    #[test]
    fn test_existing_collections() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path());
        paths.ensure_layout().unwrap();
        std::fs::write(paths.collection_file("b"), b"").unwrap();
        std::fs::write(paths.collection_file("a"), b"").unwrap();
        std::fs::write(paths.collections_dir().join("junk.tmp"), b"").unwrap();

        assert_eq!(paths.existing_collections().unwrap(), vec!["a", "b"]);
    }
}
