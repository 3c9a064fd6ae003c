//! Block encoding of a segment's mapping.
//!
//! ```text
//! [u32 count] ( [u32 key_len][utf-8 key][32-byte cid] ) × count
//! ```
//!
//! Entries are written in ascending key order, so a given mapping has
//! exactly one encoding and therefore exactly one CID. Decoding yields the
//! raw pairs; turning them into a validated mapping is the segment's job.

use std::collections::BTreeMap;

use super::Entry;
use crate::cid::Cid;
use crate::encoding::{self, Decode, Encode, EncodingError};

/// Borrowed view of a mapping, for writing.
pub(crate) struct MappingRef<'a, K>(pub(crate) &'a BTreeMap<String, Entry<K>>);

/// One `(key, cid)` pair of a [`MappingRef`], borrowed for writing.
struct EntryRef<'a> {
    key: &'a str,
    cid: &'a Cid,
}

/// Decoded `(key, cid)` pairs in on-disk order, not yet validated.
pub(crate) struct RawMapping(pub(crate) Vec<RawEntry>);

pub(crate) struct RawEntry {
    pub(crate) key: String,
    pub(crate) cid: Cid,
}

// ------------------------------------------------------------------------------------------------
// Encode: MappingRef
// ------------------------------------------------------------------------------------------------

impl Encode for EntryRef<'_> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.cid.encode_to(buf)
    }
}

impl<K> Encode for MappingRef<'_, K> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let entries = self.0.iter().map(|(key, entry)| EntryRef {
            key: key.as_str(),
            cid: &entry.cid,
        });
        encoding::encode_seq(entries, buf)
    }
}

// ------------------------------------------------------------------------------------------------
// Decode: RawMapping
// ------------------------------------------------------------------------------------------------

impl Decode for RawEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key, mut offset) = String::decode_from(buf)?;
        let (cid, n) = Cid::decode_from(&buf[offset..])?;
        offset += n;
        Ok((RawEntry { key, cid }, offset))
    }
}

impl Decode for RawMapping {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (entries, consumed) = encoding::decode_vec::<RawEntry>(buf)?;
        Ok((RawMapping(entries), consumed))
    }
}
