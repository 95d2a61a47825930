//! Read-only access to a source database.
//!
//! Compaction inputs are opened through [`Database`], which parses the
//! version file and opens each table it records. Source databases are
//! never modified.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::sstable::SSTable;
use crate::version::{TableKind, VersionFile};
use crate::DocId;

/// A committed database opened for reading.
///
/// The path may be a database directory or a single-file database; in the
/// latter case all tables are regions of the one file.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    single_file: bool,
    version: VersionFile,
    tables: [Option<SSTable>; 6],
}

impl Database {
    /// Open the database at `path`.
    ///
    /// Tables absent from the version file are simply not there; a table
    /// the version file records but whose file is missing is an error.
    pub fn open(path: &Path) -> Result<Database> {
        let single_file = !fs::metadata(path)?.is_dir();
        let version = if single_file {
            VersionFile::open_single_file(path)?
        } else {
            VersionFile::open_dir(path)?
        };

        let mut tables: [Option<SSTable>; 6] = Default::default();
        for kind in TableKind::ALL {
            if let Some(info) = version.root(kind) {
                let table_path = if single_file {
                    path.to_path_buf()
                } else {
                    path.join(kind.filename())
                };
                tables[kind as usize] = Some(SSTable::open(&table_path, info)?);
            }
        }

        Ok(Database {
            path: path.to_path_buf(),
            single_file,
            version,
            tables,
        })
    }

    /// Path the database was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff this is a single-file database.
    pub fn is_single_file(&self) -> bool {
        self.single_file
    }

    /// The database's version information.
    pub fn version(&self) -> &VersionFile {
        &self.version
    }

    /// Number of documents in the database.
    pub fn doc_count(&self) -> u64 {
        self.version.doc_count()
    }

    /// Highest document id in use.
    pub fn last_docid(&self) -> DocId {
        self.version.last_docid()
    }

    /// True iff the database has a table of the given kind.
    pub fn has_table(&self, kind: TableKind) -> bool {
        self.tables[kind as usize].is_some()
    }

    /// The table of the given kind, if present.
    pub fn table_mut(&mut self, kind: TableKind) -> Option<&mut SSTable> {
        self.tables[kind as usize].as_mut()
    }

    /// Where the table of the given kind lives on disk.
    pub fn table_path(&self, kind: TableKind) -> PathBuf {
        if self.single_file {
            self.path.clone()
        } else {
            self.path.join(kind.filename())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::RootInfo;
    use tempfile::TempDir;

    fn build_db(dir: &Path, kinds: &[TableKind], entries: &[(&[u8], &[u8])]) {
        let mut version = VersionFile::new();
        for &kind in kinds {
            let mut table = SSTable::create(&dir.join(kind.filename())).unwrap();
            for (k, v) in entries {
                table.add(k, v, false).unwrap();
            }
            table.flush_db().unwrap();
            table.commit(1, version.root_mut(kind)).unwrap();
        }
        let tmp = version.write_to_dir(dir, 1).unwrap();
        version.install(dir, &tmp, true).unwrap();
    }

    #[test]
    fn test_open_with_missing_optional_tables() {
        let dir = TempDir::new().unwrap();
        build_db(
            dir.path(),
            &[TableKind::Postlist, TableKind::TermList],
            &[(b"key", b"value")],
        );

        let mut db = Database::open(dir.path()).unwrap();
        assert!(db.has_table(TableKind::Postlist));
        assert!(db.has_table(TableKind::TermList));
        assert!(!db.has_table(TableKind::Spelling));
        assert!(!db.has_table(TableKind::Position));
        assert!(db.table_mut(TableKind::Synonym).is_none());

        let table = db.table_mut(TableKind::Postlist).unwrap();
        let item = table.read_item().unwrap().unwrap();
        assert_eq!(item.key, b"key");
        assert_eq!(item.value, b"value");
    }

    #[test]
    fn test_open_missing_version_file() {
        let dir = TempDir::new().unwrap();
        assert!(Database::open(dir.path()).is_err());
    }
}
