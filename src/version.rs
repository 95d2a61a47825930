//! Version file bookkeeping.
//!
//! The version file is what makes a set of table files a database: it
//! records, per table, where the sparse index root lives and how many
//! entries the table holds, plus database-wide statistics. A destination
//! is not durable until its version file has been installed and synced.
//!
//! Multi-file databases keep the version payload in its own file,
//! installed by atomic rename. Single-file databases append the payload
//! after the table regions and finish with a fixed-size footer locating
//! it, so reopening the file can tell a real database from a stub.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{NaginataError, Result};
use crate::DocId;

/// Filename extension shared by all table files.
pub const TABLE_EXTENSION: &str = "ngt";

/// Filename of the version file in a multi-file database directory.
pub const VERSION_FILENAME: &str = "iamnaginata";

const VERSION_TMP_FILENAME: &str = "v.tmp";
const FORMAT_VERSION: u32 = 1;
const SINGLE_FILE_MAGIC: &[u8; 8] = b"naginata";
const FOOTER_LEN: u64 = 24;

/// The six table kinds of a database, in compaction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKind {
    Postlist,
    DocData,
    TermList,
    Position,
    Spelling,
    Synonym,
}

impl TableKind {
    /// All table kinds, in the order compaction processes them.
    pub const ALL: [TableKind; 6] = [
        TableKind::Postlist,
        TableKind::DocData,
        TableKind::TermList,
        TableKind::Position,
        TableKind::Spelling,
        TableKind::Synonym,
    ];

    /// The base name of the table.
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Postlist => "postlist",
            TableKind::DocData => "docdata",
            TableKind::TermList => "termlist",
            TableKind::Position => "position",
            TableKind::Spelling => "spelling",
            TableKind::Synonym => "synonym",
        }
    }

    /// The filename of the table in a multi-file database.
    pub fn filename(self) -> String {
        format!("{}.{}", self.name(), TABLE_EXTENSION)
    }

    fn index(self) -> usize {
        self as usize
    }

    fn from_name(name: &str) -> Option<TableKind> {
        TableKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Root information for one table, published by `commit` and read back
/// when the table is reopened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootInfo {
    /// Offset of the sparse index root, relative to the table region.
    /// `None` means the table was never committed (it does not exist).
    pub root: Option<u64>,
    /// Offset of the table region within its file (0 for multi-file).
    pub offset: u64,
    /// Number of entries in the table.
    pub num_entries: u64,
    /// Number of index levels.
    pub level: u32,
    /// Mirrored for compatibility with block-based formats; the
    /// sequential format does not use it.
    pub blocksize: u32,
    /// Whether entries were written in ascending key order (always true
    /// for tables this crate writes).
    pub sequential: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionPayload {
    format: u32,
    revision: u32,
    doc_count: u64,
    last_docid: DocId,
    tables: BTreeMap<String, RootInfo>,
}

/// In-memory view of a database's version information.
#[derive(Debug, Clone, Default)]
pub struct VersionFile {
    doc_count: u64,
    last_docid: DocId,
    revision: u32,
    roots: [RootInfo; 6],
}

impl VersionFile {
    /// Create version information for a new, empty database.
    pub fn new() -> VersionFile {
        VersionFile::default()
    }

    /// Fold another database's statistics into this one.
    pub fn merge_stats(&mut self, other: &VersionFile) {
        self.doc_count += other.doc_count;
    }

    /// Number of documents in the database.
    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    /// Set the number of documents in the database.
    pub fn set_doc_count(&mut self, doc_count: u64) {
        self.doc_count = doc_count;
    }

    /// Highest document id in use.
    pub fn last_docid(&self) -> DocId {
        self.last_docid
    }

    /// Record the highest document id in use.
    pub fn set_last_docid(&mut self, last_docid: DocId) {
        self.last_docid = last_docid;
    }

    /// Revision the version file was written at.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Root information for `kind`, if that table exists.
    pub fn root(&self, kind: TableKind) -> Option<&RootInfo> {
        let info = &self.roots[kind.index()];
        info.root.map(|_| info)
    }

    /// Mutable root information for `kind`, for a table being committed.
    pub fn root_mut(&mut self, kind: TableKind) -> &mut RootInfo {
        &mut self.roots[kind.index()]
    }

    fn to_payload(&self, revision: u32) -> VersionPayload {
        let mut tables = BTreeMap::new();
        for kind in TableKind::ALL {
            tables.insert(kind.name().to_string(), self.roots[kind.index()].clone());
        }
        VersionPayload {
            format: FORMAT_VERSION,
            revision,
            doc_count: self.doc_count,
            last_docid: self.last_docid,
            tables,
        }
    }

    fn from_payload(payload: VersionPayload) -> Result<VersionFile> {
        if payload.format != FORMAT_VERSION {
            return Err(NaginataError::corrupt(format!(
                "unsupported format version {}",
                payload.format
            )));
        }
        let mut version = VersionFile {
            doc_count: payload.doc_count,
            last_docid: payload.last_docid,
            revision: payload.revision,
            roots: Default::default(),
        };
        for (name, info) in payload.tables {
            if let Some(kind) = TableKind::from_name(&name) {
                version.roots[kind.index()] = info;
            }
        }
        Ok(version)
    }

    /// Serialise to a temporary file in `dir`, returning its path.
    ///
    /// The caller syncs the destination tables and then calls
    /// [`VersionFile::install`] to publish atomically.
    pub fn write_to_dir(&self, dir: &Path, revision: u32) -> Result<PathBuf> {
        let tmp = dir.join(VERSION_TMP_FILENAME);
        let payload = serde_json::to_vec_pretty(&self.to_payload(revision))?;
        fs::write(&tmp, payload)?;
        Ok(tmp)
    }

    /// Atomically install a serialised version file over the live one.
    pub fn install(&self, dir: &Path, tmp: &Path, no_sync: bool) -> Result<()> {
        if !no_sync {
            File::open(tmp)?.sync_all()?;
        }
        let dest = dir.join(VERSION_FILENAME);
        fs::rename(tmp, &dest)?;
        if !no_sync {
            File::open(&dest)?.sync_all()?;
        }
        Ok(())
    }

    /// Read the version file of a multi-file database directory.
    pub fn open_dir(dir: &Path) -> Result<VersionFile> {
        let data = fs::read(dir.join(VERSION_FILENAME))?;
        VersionFile::from_payload(serde_json::from_slice(&data)?)
    }

    /// Append the version payload and footer to a single-file database.
    pub fn append_to_file(&self, file: &mut File, revision: u32) -> Result<()> {
        let offset = file.seek(SeekFrom::End(0))?;
        let payload = serde_json::to_vec_pretty(&self.to_payload(revision))?;
        file.write_all(&payload)?;
        file.write_u64::<LittleEndian>(offset)?;
        file.write_u64::<LittleEndian>(payload.len() as u64)?;
        file.write_all(SINGLE_FILE_MAGIC)?;
        Ok(())
    }

    /// Read the version payload back out of a single-file database.
    pub fn open_single_file(path: &Path) -> Result<VersionFile> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < FOOTER_LEN {
            return Err(NaginataError::corrupt(format!(
                "{} is too small to be a database",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        let offset = file.read_u64::<LittleEndian>()?;
        let payload_len = file.read_u64::<LittleEndian>()?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != SINGLE_FILE_MAGIC {
            return Err(NaginataError::corrupt(format!(
                "{} is not a database",
                path.display()
            )));
        }
        if offset
            .checked_add(payload_len)
            .map_or(true, |end| end + FOOTER_LEN != len)
        {
            return Err(NaginataError::corrupt(format!(
                "{} has a malformed version footer",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut payload = vec![0u8; payload_len as usize];
        file.read_exact(&mut payload)?;
        VersionFile::from_payload(serde_json::from_slice(&payload)?)
    }
}

/// Open a writable handle on a single-file destination, creating it anew.
pub fn create_single_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| NaginataError::create(format!("{}: {e}", path.display())))
}
