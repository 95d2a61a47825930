//! Append-only sorted string tables.
//!
//! A table is a sequence of records in strictly ascending key order, each
//! holding a prefix-compressed key and a length-prefixed value, followed by
//! a sparse index locating one record per 1 KiB of table data. The index
//! root offset is not stored in the table itself; `commit` publishes it to
//! the version file.
//!
//! Record layout:
//!
//! ```text
//! reuse_len   u8       bytes shared with the previous key (0 for first)
//! suffix_len  u8       remaining key bytes
//! suffix      [u8]
//! val_len     varint   (value length << 1) | compressed flag
//! value       [u8]
//! ```
//!
//! Index entries use the same key compression, with a varint record-start
//! offset in place of the value.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{NaginataError, Result};
use crate::storage::BufferedFile;
use crate::util::varint::pack_uint;
use crate::version::RootInfo;

/// Emit one sparse index entry per this many bytes of table data.
const INDEX_BLOCK: u64 = 1024;

/// Longest permitted key.
pub const MAX_KEY_LEN: usize = 255;

/// Blocksize mirrored into the root info for compatibility with
/// block-based formats. Nothing in this crate reads it back.
const MIRRORED_BLOCKSIZE: u32 = 2048;

/// One record read back from a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub compressed: bool,
}

/// The sparse block-granular index accumulated while writing a table.
///
/// The index is single-level: one entry per [`INDEX_BLOCK`] boundary
/// crossed, held in memory and appended to the table at flush time.
#[derive(Debug, Default)]
struct SparseIndex {
    data: Vec<u8>,
    /// Block of the last indexed record; `None` until the first record.
    block: Option<u64>,
    n_entries: usize,
    last_key: Vec<u8>,
}

impl SparseIndex {
    /// Consider indexing the record for `key` starting at `pos`.
    fn maybe_add_entry(&mut self, key: &[u8], pos: u64) {
        let cur_block = pos / INDEX_BLOCK;
        if self.block == Some(cur_block) {
            return;
        }

        let reuse = common_prefix_len(&self.last_key, key);
        self.data.push(reuse as u8);
        self.data.push((key.len() - reuse) as u8);
        self.data.extend_from_slice(&key[reuse..]);
        pack_uint(&mut self.data, pos);

        self.block = Some(cur_block);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.n_entries += 1;
    }

    /// Append the accumulated index to `fh`, returning its start offset.
    fn write(&self, fh: &mut BufferedFile) -> Result<u64> {
        let root = fh.get_pos();
        fh.write(&self.data)?;
        Ok(root)
    }

    fn size(&self) -> usize {
        self.data.len()
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// An append-only sorted table.
///
/// Created writable, filled with `add` in ascending key order, finalised
/// with `flush_db` + `commit`, after which it is read-only and
/// `read_item` walks the records front to back.
#[derive(Debug)]
pub struct SSTable {
    path: Option<PathBuf>,
    fh: BufferedFile,
    read_only: bool,
    last_key: Vec<u8>,
    index: SparseIndex,
    root: Option<u64>,
    num_entries: u64,
    items_read: u64,
    /// Offset of this table's region within its file (non-zero only in
    /// single-file databases).
    start_offset: u64,
}

impl SSTable {
    /// Create a new writable table at `path`, truncating any existing file.
    pub fn create(path: &Path) -> Result<SSTable> {
        let fh = BufferedFile::create(path)?;
        Ok(SSTable {
            path: Some(path.to_path_buf()),
            fh,
            read_only: false,
            last_key: Vec::new(),
            index: SparseIndex::default(),
            root: None,
            num_entries: 0,
            items_read: 0,
            start_offset: 0,
        })
    }

    /// Create a writable table region at the current end of a shared file.
    ///
    /// Used for single-file destinations. The table cannot be read back
    /// through this handle; its region is located via the version file.
    pub fn create_shared(file: File) -> Result<SSTable> {
        let fh = BufferedFile::append_to(file)?;
        let start_offset = fh.get_pos();
        Ok(SSTable {
            path: None,
            fh,
            read_only: false,
            last_key: Vec::new(),
            index: SparseIndex::default(),
            root: None,
            num_entries: 0,
            items_read: 0,
            start_offset,
        })
    }

    /// Open a committed table read-only, using its published root info.
    pub fn open(path: &Path, root_info: &RootInfo) -> Result<SSTable> {
        let fh = BufferedFile::open_at(path, root_info.offset)?;
        Ok(SSTable {
            path: Some(path.to_path_buf()),
            fh,
            read_only: true,
            last_key: Vec::new(),
            index: SparseIndex::default(),
            root: root_info.root,
            num_entries: root_info.num_entries,
            items_read: 0,
            start_offset: root_info.offset,
        })
    }

    /// Path of the table file, if it has one of its own.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of entries added to (or recorded for) the table.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// True iff the table holds no entries.
    pub fn empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Size in bytes of the in-memory sparse index.
    pub fn index_size(&self) -> usize {
        self.index.size()
    }

    /// Number of sparse index entries.
    pub fn index_entries(&self) -> usize {
        self.index.n_entries
    }

    /// Request rebalancing into maximally full blocks.
    ///
    /// Accepted for driver compatibility; the sequential format has no
    /// blocks to rebalance.
    pub fn set_full_compaction(&mut self, _full: bool) {}

    /// Request splitting of items above the given size.
    ///
    /// Accepted for driver compatibility; the sequential format does not
    /// split items.
    pub fn set_max_item_size(&mut self, _max: u32) {}

    /// Append one entry.
    ///
    /// `key` must be non-empty, at most [`MAX_KEY_LEN`] bytes, and
    /// strictly greater than the previous key. `compressed` records that
    /// `value` is an already-compressed payload.
    pub fn add(&mut self, key: &[u8], value: &[u8], compressed: bool) -> Result<()> {
        if self.read_only {
            return Err(NaginataError::invalid_operation(
                "add() on read-only table",
            ));
        }
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(NaginataError::invalid_argument(format!(
                "invalid key size: {}",
                key.len()
            )));
        }
        if key <= &self.last_key[..] {
            return Err(NaginataError::invalid_operation(
                "new key <= previous key",
            ));
        }

        let pos = self.fh.get_pos() - self.start_offset;
        let reuse = common_prefix_len(&self.last_key, key);
        self.fh.write_u8(reuse as u8)?;
        self.fh.write_u8((key.len() - reuse) as u8)?;
        self.fh.write(&key[reuse..])?;

        self.index.maybe_add_entry(key, pos);
        self.num_entries += 1;

        let mut val_len = Vec::with_capacity(5);
        pack_uint(&mut val_len, ((value.len() as u64) << 1) | compressed as u64);
        self.fh.write(&val_len)?;
        self.fh.write(value)?;

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    /// Append the sparse index and flush buffered output.
    pub fn flush_db(&mut self) -> Result<()> {
        if self.read_only {
            return Err(NaginataError::invalid_operation(
                "flush_db() on read-only table",
            ));
        }
        let root = self.index.write(&mut self.fh)? - self.start_offset;
        self.fh.flush()?;
        self.root = Some(root);
        Ok(())
    }

    /// Publish the table to `root_info` and switch it to read mode.
    ///
    /// The revision is recorded by the version file, not per table.
    pub fn commit(&mut self, _revision: u32, root_info: &mut RootInfo) -> Result<()> {
        let root = self
            .root
            .ok_or_else(|| NaginataError::invalid_operation("commit() before flush_db()"))?;

        root_info.root = Some(root);
        root_info.offset = self.start_offset;
        root_info.num_entries = self.num_entries;
        root_info.level = 1;
        root_info.blocksize = MIRRORED_BLOCKSIZE;
        root_info.sequential = true;

        self.read_only = true;
        self.last_key.clear();
        self.items_read = 0;
        if self.path.is_some() {
            self.fh.rewind()?;
        }
        Ok(())
    }

    /// Force the OS to durably persist the table file.
    pub fn sync(&mut self) -> Result<()> {
        self.fh.sync()
    }

    /// Read the next record, reconstructing its key from the previous one.
    ///
    /// Returns `None` once all `num_entries` records have been read; the
    /// trailing sparse index is never misread as records.
    pub fn read_item(&mut self) -> Result<Option<TableItem>> {
        if !self.read_only {
            return Err(NaginataError::invalid_operation(
                "read_item() on writable table",
            ));
        }
        if self.items_read == self.num_entries {
            return Ok(None);
        }

        let reuse = self.read_stream_u8("key reuse length")? as usize;
        let suffix_len = self.read_stream_u8("key suffix length")? as usize;
        if reuse > self.last_key.len() {
            return Err(NaginataError::corrupt(
                "key reuse length exceeds previous key",
            ));
        }
        if reuse + suffix_len == 0 {
            return Err(NaginataError::corrupt("zero-length key"));
        }

        let mut key = Vec::with_capacity(reuse + suffix_len);
        key.extend_from_slice(&self.last_key[..reuse]);
        key.resize(reuse + suffix_len, 0);
        if !self.fh.read_exact(&mut key[reuse..])? {
            return Err(NaginataError::corrupt(format!(
                "read of {suffix_len} bytes of key data failed"
            )));
        }

        let val_len_enc = self.read_stream_uint()?;
        let compressed = (val_len_enc & 1) != 0;
        let val_len = (val_len_enc >> 1) as usize;

        let mut value = vec![0u8; val_len];
        if !self.fh.read_exact(&mut value)? {
            return Err(NaginataError::corrupt(format!(
                "read of {val_len} bytes of value data failed"
            )));
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(&key);
        self.items_read += 1;
        Ok(Some(TableItem {
            key,
            value,
            compressed,
        }))
    }

    /// Delete the table's file. Used for multipass temporaries.
    pub fn unlink(mut self) -> Result<()> {
        let path = self.path.take();
        drop(self);
        if let Some(path) = path {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn read_stream_u8(&mut self, what: &str) -> Result<u8> {
        self.fh.read_u8()?.ok_or_else(|| {
            NaginataError::corrupt(format!("end of stream while reading {what}"))
        })
    }

    fn read_stream_uint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.read_stream_u8("value length")?;
            if shift >= 64 {
                return Err(NaginataError::corrupt("non-terminating value length"));
            }
            result |= ((byte & 0x7F) as u64) << shift;
            if (byte & 0x80) == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }
}
