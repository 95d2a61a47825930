//! Key namespaces of the postings table.
//!
//! A postings-table key's leading bytes select its semantic class. All
//! reserved classes start with a zero byte, which no term can begin with:
//!
//! | Prefix        | Meaning                        |
//! |---------------|--------------------------------|
//! | `00 C0 …`     | user metadata                  |
//! | `00 D0 …`     | value-slot statistics          |
//! | `00 D8 …`     | value-slot chunk, per document |
//! | `00 E0 …`     | document-length chunk          |
//! | anything else | postings for a term            |
//!
//! A postings key is the sort-preserving encoding of the term, optionally
//! followed by the sort-preserving encoding of the first document id of the
//! chunk. A key with no trailing docid is the initial chunk of its term.

use crate::util::sortable::{pack_string_preserving_sort, pack_uint_preserving_sort};
use crate::util::varint::{pack_uint, pack_uint_last};
use crate::DocId;

const USER_METADATA_BYTE: u8 = 0xC0;
const VALUESTATS_BYTE: u8 = 0xD0;
const VALUECHUNK_BYTE: u8 = 0xD8;
const DOCLENCHUNK_BYTE: u8 = 0xE0;

/// True if `key` holds a piece of user metadata.
pub fn is_user_metadata_key(key: &[u8]) -> bool {
    key.len() > 1 && key[0] == 0 && key[1] == USER_METADATA_BYTE
}

/// True if `key` holds per-slot value statistics.
pub fn is_valuestats_key(key: &[u8]) -> bool {
    key.len() > 1 && key[0] == 0 && key[1] == VALUESTATS_BYTE
}

/// True if `key` holds a value-slot chunk.
pub fn is_valuechunk_key(key: &[u8]) -> bool {
    key.len() > 1 && key[0] == 0 && key[1] == VALUECHUNK_BYTE
}

/// True if `key` holds a document-length chunk.
pub fn is_doclenchunk_key(key: &[u8]) -> bool {
    key.len() > 1 && key[0] == 0 && key[1] == DOCLENCHUNK_BYTE
}

/// Build the key for the user-metadata entry named `name`.
pub fn user_metadata_key(name: &[u8]) -> Vec<u8> {
    let mut key = vec![0, USER_METADATA_BYTE];
    key.extend_from_slice(name);
    key
}

/// Build the key for the value statistics of `slot`.
pub fn valuestats_key(slot: u64) -> Vec<u8> {
    let mut key = vec![0, VALUESTATS_BYTE];
    pack_uint_last(&mut key, slot);
    key
}

/// Build the key for the value chunk of `slot` starting at document `did`.
pub fn valuechunk_key(slot: u64, did: DocId) -> Vec<u8> {
    let mut key = vec![0, VALUECHUNK_BYTE];
    pack_uint(&mut key, slot);
    pack_uint_preserving_sort(&mut key, did);
    key
}

/// Build the initial-chunk key for `term`.
///
/// An empty term names the document-length namespace.
pub fn postlist_key(term: &[u8]) -> Vec<u8> {
    if term.is_empty() {
        return vec![0, DOCLENCHUNK_BYTE];
    }
    let mut key = Vec::with_capacity(term.len());
    pack_string_preserving_sort(&mut key, term, true);
    key
}

/// Build the non-initial chunk key for `term` starting at document `did`.
///
/// An empty term names the document-length namespace.
pub fn postlist_key_with_did(term: &[u8], did: DocId) -> Vec<u8> {
    let mut key;
    if term.is_empty() {
        key = vec![0, DOCLENCHUNK_BYTE];
    } else {
        key = Vec::with_capacity(term.len() + 4);
        pack_string_preserving_sort(&mut key, term, false);
    }
    pack_uint_preserving_sort(&mut key, did);
    key
}
