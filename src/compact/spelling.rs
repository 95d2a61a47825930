//! The spelling-table merge.
//!
//! Spelling keys come in two flavours, told apart by the first key byte:
//! `'W'` keys store a word's frequency, everything else stores a sorted,
//! prefix-compressed list of words. Frequencies are summed across inputs;
//! word lists are merged into their set union. A key held by only one
//! input is copied verbatim, compressed or not.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::compact::cursor::{MergeCursor, MergeHeapEntry};
use crate::error::{NaginataError, Result};
use crate::sstable::SSTable;
use crate::util::varint::{pack_uint_last, unpack_uint_last};

/// Streaming decoder for a prefix-compressed word list.
///
/// Each entry is a `(reuse, suffix_len, suffix)` triple against the
/// previous word; the first entry has `reuse == 0`.
pub struct PrefixCompressedStringReader<'a> {
    data: &'a [u8],
    current: Vec<u8>,
}

impl<'a> PrefixCompressedStringReader<'a> {
    pub fn new(data: &'a [u8]) -> PrefixCompressedStringReader<'a> {
        PrefixCompressedStringReader {
            data,
            current: Vec::new(),
        }
    }

    /// Decode the next word, or `None` at the end of the list.
    pub fn next_word(&mut self) -> Result<Option<&[u8]>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        if self.data.len() < 2 {
            return Err(NaginataError::corrupt("truncated prefix-compressed words"));
        }
        let reuse = self.data[0] as usize;
        let suffix_len = self.data[1] as usize;
        self.data = &self.data[2..];

        if reuse > self.current.len() {
            return Err(NaginataError::corrupt(
                "prefix-compressed word reuses more than the previous word",
            ));
        }
        if self.data.len() < suffix_len {
            return Err(NaginataError::corrupt("truncated prefix-compressed words"));
        }

        self.current.truncate(reuse);
        self.current.extend_from_slice(&self.data[..suffix_len]);
        self.data = &self.data[suffix_len..];
        Ok(Some(&self.current))
    }
}

/// Streaming encoder matching [`PrefixCompressedStringReader`].
///
/// Words must be appended in ascending order.
pub struct PrefixCompressedStringWriter {
    out: Vec<u8>,
    last: Vec<u8>,
}

impl PrefixCompressedStringWriter {
    pub fn new() -> PrefixCompressedStringWriter {
        PrefixCompressedStringWriter {
            out: Vec::new(),
            last: Vec::new(),
        }
    }

    /// Append `word` to the list.
    pub fn append(&mut self, word: &[u8]) -> Result<()> {
        let shared = self
            .last
            .iter()
            .zip(word)
            .take_while(|(a, b)| a == b)
            .count();
        let reuse = shared.min(255);
        let suffix_len = word.len() - reuse;
        if suffix_len > 255 {
            return Err(NaginataError::corrupt("word too long to prefix-compress"));
        }
        self.out.push(reuse as u8);
        self.out.push(suffix_len as u8);
        self.out.extend_from_slice(&word[reuse..]);
        self.last.clear();
        self.last.extend_from_slice(word);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

impl Default for PrefixCompressedStringWriter {
    fn default() -> Self {
        PrefixCompressedStringWriter::new()
    }
}

struct WordStream<'a> {
    reader: PrefixCompressedStringReader<'a>,
    current: Vec<u8>,
    source: usize,
}

impl PartialEq for WordStream<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WordStream<'_> {}

impl PartialOrd for WordStream<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WordStream<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour.
        other
            .current
            .cmp(&self.current)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merge several prefix-compressed word lists into their sorted union.
pub fn union_prefix_compressed(tags: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut heap = BinaryHeap::new();
    for (source, tag) in tags.iter().enumerate() {
        let mut reader = PrefixCompressedStringReader::new(tag);
        if let Some(word) = reader.next_word()? {
            let current = word.to_vec();
            heap.push(WordStream {
                reader,
                current,
                source,
            });
        }
    }

    let mut writer = PrefixCompressedStringWriter::new();
    let mut last_word: Option<Vec<u8>> = None;
    while let Some(mut stream) = heap.pop() {
        if last_word.as_deref() != Some(&stream.current[..]) {
            writer.append(&stream.current)?;
            last_word = Some(stream.current.clone());
        }
        if let Some(word) = stream.reader.next_word()? {
            stream.current.clear();
            stream.current.extend_from_slice(word);
            heap.push(stream);
        }
    }
    Ok(writer.into_bytes())
}

/// Merge the spelling tables of `inputs` into `out`.
pub fn merge_spellings(out: &mut SSTable, inputs: Vec<&mut SSTable>) -> Result<()> {
    let mut pq = BinaryHeap::new();
    for (i, table) in inputs.into_iter().enumerate() {
        if table.empty() {
            continue;
        }
        if let Some(cursor) = MergeCursor::new(table, i)? {
            pq.push(MergeHeapEntry(cursor));
        }
    }

    while let Some(entry) = pq.pop() {
        let mut cursor = entry.0;
        let key = cursor.current_key.clone();

        let only_holder = match pq.peek() {
            Some(next) => next.0.current_key != key,
            None => true,
        };
        if only_holder {
            // No other input has this key; copy the tag through without
            // touching its compression.
            let compressed = cursor.read_tag(true)?;
            out.add(&key, &cursor.current_tag, compressed)?;
            if cursor.next()? {
                pq.push(MergeHeapEntry(cursor));
            }
            continue;
        }

        if key[0] != b'W' {
            // Dictionary words: set union across all inputs holding the
            // key. Tags stay alive until every holder has advanced.
            let mut tags: Vec<Vec<u8>> = Vec::new();
            let mut holders: Vec<MergeCursor> = Vec::new();
            loop {
                cursor.read_tag(false)?;
                tags.push(std::mem::take(&mut cursor.current_tag));
                holders.push(cursor);
                let same_key = matches!(pq.peek(), Some(next) if next.0.current_key == key);
                if !same_key {
                    break;
                }
                cursor = pq.pop().unwrap().0;
            }

            let tag = union_prefix_compressed(&tags)?;
            for mut holder in holders {
                if holder.next()? {
                    pq.push(MergeHeapEntry(holder));
                }
            }
            out.add(&key, &tag, false)?;
        } else {
            // Word frequency: sum across all inputs holding the key.
            let mut total: u64 = 0;
            loop {
                cursor.read_tag(false)?;
                let freq = unpack_uint_last(&cursor.current_tag)?;
                if freq == 0 {
                    return Err(NaginataError::corrupt("bad spelling word freq"));
                }
                total += freq;
                if cursor.next()? {
                    pq.push(MergeHeapEntry(cursor));
                }
                let same_key = matches!(pq.peek(), Some(next) if next.0.current_key == key);
                if !same_key {
                    break;
                }
                cursor = pq.pop().unwrap().0;
            }
            let mut tag = Vec::new();
            pack_uint_last(&mut tag, total);
            out.add(&key, &tag, false)?;
        }
    }
    Ok(())
}
