//! Typed cursors over input tables.
//!
//! Each merge kernel walks its inputs through a cursor that decodes one
//! logical entry at a time and renumbers embedded document ids by the
//! input's docid offset. A min-heap of cursors yields a globally sorted
//! stream; heap order is `(key, firstdid, source)`, with the source index
//! as a deterministic tiebreak between inputs holding the same key.

use std::cmp::Ordering;

use crate::error::{NaginataError, Result};
use crate::keys;
use crate::sstable::SSTable;
use crate::storage::codec;
use crate::util::sortable::{
    pack_string_preserving_sort, pack_uint_preserving_sort, unpack_string_preserving_sort,
    unpack_uint_preserving_sort,
};
use crate::util::varint::unpack_uint;
use crate::DocId;

/// Cursor over a postings table.
///
/// `next()` classifies each key. Metadata and value-stats entries pass
/// through untouched; value chunks get their embedded docid shifted.
/// Postings and doclen entries are rewritten into non-initial chunk form:
/// the key is the bare term key, `firstdid` holds the (shifted) first
/// docid of the chunk, and for what was an initial chunk the `(tf, cf,
/// firstdid)` header has been stripped from the tag into the cursor
/// fields. The merge rebuilds initial chunks on output.
pub struct PostlistCursor<'a> {
    table: &'a mut SSTable,
    offset: DocId,
    pub source: usize,
    pub key: Vec<u8>,
    pub tag: Vec<u8>,
    pub firstdid: DocId,
    pub tf: u64,
    pub cf: u64,
}

impl<'a> PostlistCursor<'a> {
    /// Position a cursor on the first entry of `table`, or return `None`
    /// if the table has none.
    pub fn new(table: &'a mut SSTable, offset: DocId, source: usize) -> Result<Option<Self>> {
        let mut cursor = PostlistCursor {
            table,
            offset,
            source,
            key: Vec::new(),
            tag: Vec::new(),
            firstdid: 0,
            tf: 0,
            cf: 0,
        };
        if cursor.next()? {
            Ok(Some(cursor))
        } else {
            Ok(None)
        }
    }

    /// Advance to the next entry. Returns `false` at end of table.
    pub fn next(&mut self) -> Result<bool> {
        let item = match self.table.read_item()? {
            Some(item) => item,
            None => return Ok(false),
        };
        self.key = item.key;
        self.tag = if item.compressed {
            codec::decompress(&item.value)?
        } else {
            item.value
        };
        self.tf = 0;
        self.cf = 0;

        if keys::is_user_metadata_key(&self.key) || keys::is_valuestats_key(&self.key) {
            return Ok(true);
        }

        if keys::is_valuechunk_key(&self.key) {
            let mut p = &self.key[2..];
            let slot = unpack_uint(&mut p)
                .map_err(|_| NaginataError::corrupt("bad value chunk key"))?;
            let did = unpack_uint_preserving_sort(&mut p)
                .map_err(|_| NaginataError::corrupt("bad value chunk key"))?;
            self.key = keys::valuechunk_key(slot, did + self.offset);
            return Ok(true);
        }

        // A postings key is the packed term, optionally followed by the
        // packed first docid of the chunk; no trailing docid marks the
        // initial chunk. Doclen keys are the same with an empty term.
        let term_end = if keys::is_doclenchunk_key(&self.key) {
            2
        } else {
            let mut p = &self.key[..];
            unpack_string_preserving_sort(&mut p);
            self.key.len() - p.len()
        };

        if term_end == self.key.len() {
            // Initial chunk: move the tag header into the cursor fields.
            let mut p = &self.tag[..];
            self.tf = unpack_uint(&mut p)
                .map_err(|_| NaginataError::corrupt("bad postlist tag header"))?;
            self.cf = unpack_uint(&mut p)
                .map_err(|_| NaginataError::corrupt("bad postlist tag header"))?;
            self.firstdid = unpack_uint(&mut p)
                .map_err(|_| NaginataError::corrupt("bad postlist tag header"))?;
            self.firstdid += 1;
            let header_len = self.tag.len() - p.len();
            self.tag.drain(..header_len);
        } else {
            // Non-initial chunk: move the docid out of the key.
            let mut p = &self.key[term_end..];
            self.firstdid = unpack_uint_preserving_sort(&mut p)
                .map_err(|_| NaginataError::corrupt("bad postlist key"))?;
            if !p.is_empty() {
                return Err(NaginataError::corrupt("bad postlist key"));
            }
            // Term keys keep a terminator before the docid; drop it too.
            let keep = if keys::is_doclenchunk_key(&self.key) {
                term_end
            } else {
                term_end - 1
            };
            self.key.truncate(keep);
        }
        self.firstdid += self.offset;
        Ok(true)
    }
}

/// Heap wrapper yielding the smallest `(key, firstdid, source)` first.
pub struct PostlistHeapEntry<'a>(pub PostlistCursor<'a>);

impl PartialEq for PostlistHeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PostlistHeapEntry<'_> {}

impl PartialOrd for PostlistHeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PostlistHeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest entry pops
        // first.
        other
            .0
            .key
            .cmp(&self.0.key)
            .then_with(|| other.0.firstdid.cmp(&self.0.firstdid))
            .then_with(|| other.0.source.cmp(&self.0.source))
    }
}

/// Cursor over a table whose entries are copied (almost) verbatim:
/// spellings, synonyms, docdata and termlists.
pub struct MergeCursor<'a> {
    table: &'a mut SSTable,
    pub source: usize,
    pub current_key: Vec<u8>,
    pub current_tag: Vec<u8>,
    pub current_compressed: bool,
}

impl<'a> MergeCursor<'a> {
    /// Position a cursor on the first entry of `table`, or return `None`
    /// if the table has none.
    pub fn new(table: &'a mut SSTable, source: usize) -> Result<Option<Self>> {
        let mut cursor = MergeCursor {
            table,
            source,
            current_key: Vec::new(),
            current_tag: Vec::new(),
            current_compressed: false,
        };
        if cursor.next()? {
            Ok(Some(cursor))
        } else {
            Ok(None)
        }
    }

    /// Advance to the next entry. Returns `false` at end of table.
    pub fn next(&mut self) -> Result<bool> {
        match self.table.read_item()? {
            Some(item) => {
                self.current_key = item.key;
                self.current_tag = item.value;
                self.current_compressed = item.compressed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Make the tag usable, decompressing in place unless the caller can
    /// handle compressed payloads. Returns whether the tag is (still)
    /// compressed.
    pub fn read_tag(&mut self, keep_compressed: bool) -> Result<bool> {
        if !keep_compressed && self.current_compressed {
            self.current_tag = codec::decompress(&self.current_tag)?;
            self.current_compressed = false;
        }
        Ok(self.current_compressed)
    }
}

/// Heap wrapper yielding the smallest `(current_key, source)` first.
pub struct MergeHeapEntry<'a>(pub MergeCursor<'a>);

impl PartialEq for MergeHeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHeapEntry<'_> {}

impl PartialOrd for MergeHeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .current_key
            .cmp(&self.0.current_key)
            .then_with(|| other.0.source.cmp(&self.0.source))
    }
}

/// Cursor over a positions table, re-encoding each key with its docid
/// shifted by the input's offset.
pub struct PositionCursor<'a> {
    table: &'a mut SSTable,
    offset: DocId,
    pub source: usize,
    pub key: Vec<u8>,
    tag: Vec<u8>,
}

impl<'a> PositionCursor<'a> {
    /// Position a cursor on the first entry of `table`, or return `None`
    /// if the table has none.
    pub fn new(table: &'a mut SSTable, offset: DocId, source: usize) -> Result<Option<Self>> {
        let mut cursor = PositionCursor {
            table,
            offset,
            source,
            key: Vec::new(),
            tag: Vec::new(),
        };
        if cursor.next()? {
            Ok(Some(cursor))
        } else {
            Ok(None)
        }
    }

    /// Advance to the next entry. Returns `false` at end of table.
    pub fn next(&mut self) -> Result<bool> {
        let item = match self.table.read_item()? {
            Some(item) => item,
            None => return Ok(false),
        };
        self.tag = if item.compressed {
            codec::decompress(&item.value)?
        } else {
            item.value
        };

        let mut p = &item.key[..];
        let term = unpack_string_preserving_sort(&mut p);
        let did = unpack_uint_preserving_sort(&mut p)
            .map_err(|_| NaginataError::corrupt("bad position key"))?;
        if !p.is_empty() {
            return Err(NaginataError::corrupt("bad position key"));
        }

        self.key.clear();
        pack_string_preserving_sort(&mut self.key, &term, false);
        pack_uint_preserving_sort(&mut self.key, did + self.offset);
        Ok(true)
    }

    /// The current entry's tag.
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }
}

/// Heap wrapper yielding the smallest `(key, source)` first.
pub struct PositionHeapEntry<'a>(pub PositionCursor<'a>);

impl PartialEq for PositionHeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PositionHeapEntry<'_> {}

impl PartialOrd for PositionHeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositionHeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .key
            .cmp(&self.0.key)
            .then_with(|| other.0.source.cmp(&self.0.source))
    }
}
