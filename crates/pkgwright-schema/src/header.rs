//! Tag-keyed metadata blocks and their binary codec.
//!
//! A serialized header is laid out as:
//!
//! ```text
//! magic (4) | reserved (4) | entry count (u32 BE) | data length (u32 BE)
//! entry[0..n]: tag (u32 BE) | type (u32 BE) | offset (u32 BE) | count (u32 BE)
//! data store
//! ```
//!
//! Entries are emitted in ascending tag order. Integer values are aligned to
//! their width inside the data store; strings and blobs are not aligned.
//! Because integers are fixed width, changing an integer value never changes
//! the serialized length, which is what lets the writer patch the archive
//! size in place.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use thiserror::Error;

use crate::HEADER_MAGIC;
use crate::tag::Tag;

/// Size of the fixed preamble (magic, reserved, counts).
pub const PREAMBLE_LEN: usize = 16;
/// Size of one index entry.
pub const ENTRY_LEN: usize = 16;

/// Upper bounds applied when parsing untrusted input.
const MAX_ENTRIES: usize = 0xFFFF;
const MAX_DATA_LEN: usize = 256 * 1024 * 1024;

const TYPE_INT32: u32 = 4;
const TYPE_INT64: u32 = 5;
const TYPE_STRING: u32 = 6;
const TYPE_BIN: u32 = 7;
const TYPE_STRING_ARRAY: u32 = 8;
const TYPE_I18NSTRING: u32 = 9;

/// Errors raised while decoding a header block.
#[derive(Error, Debug)]
pub enum HeaderError {
    /// The block does not start with [`HEADER_MAGIC`].
    #[error("bad header magic: {0:02x?}")]
    BadMagic([u8; 4]),

    /// The input ended before the declared block length.
    #[error("truncated header: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the block declares.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The entry or data counts exceed sane bounds.
    #[error("header too large: {entries} entries, {data_len} data bytes")]
    TooLarge {
        /// Declared entry count.
        entries: usize,
        /// Declared data store length.
        data_len: usize,
    },

    /// An entry carries a type code this codec does not understand.
    #[error("{tag}: unsupported value type {type_code}")]
    UnsupportedType {
        /// Tag of the offending entry.
        tag: Tag,
        /// Raw type code.
        type_code: u32,
    },

    /// An entry points outside the data store or holds invalid text.
    #[error("{tag}: {reason}")]
    Malformed {
        /// Tag of the offending entry.
        tag: Tag,
        /// What was wrong with it.
        reason: String,
    },

    /// I/O error while reading the block.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A typed, possibly multi-valued header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// A single NUL-terminated string.
    String(String),
    /// An array of strings.
    StringArray(Vec<String>),
    /// One or more unsigned 32-bit integers.
    Int32(Vec<u32>),
    /// One or more unsigned 64-bit integers.
    Int64(Vec<u64>),
    /// Opaque bytes.
    Bin(Vec<u8>),
}

impl TagValue {
    /// Wire type code.
    pub fn type_code(&self) -> u32 {
        match self {
            Self::String(_) => TYPE_STRING,
            Self::StringArray(_) => TYPE_STRING_ARRAY,
            Self::Int32(_) => TYPE_INT32,
            Self::Int64(_) => TYPE_INT64,
            Self::Bin(_) => TYPE_BIN,
        }
    }

    /// Wire element count.
    pub fn count(&self) -> u32 {
        let n = match self {
            Self::String(_) => 1,
            Self::StringArray(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Bin(v) => v.len(),
        };
        n as u32
    }

    fn alignment(&self) -> usize {
        match self {
            Self::Int32(_) => 4,
            Self::Int64(_) => 8,
            _ => 1,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::String(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            Self::StringArray(v) => {
                for s in v {
                    out.extend_from_slice(s.as_bytes());
                    out.push(0);
                }
            }
            Self::Int32(v) => v.iter().for_each(|n| out.extend_from_slice(&n.to_be_bytes())),
            Self::Int64(v) => v.iter().for_each(|n| out.extend_from_slice(&n.to_be_bytes())),
            Self::Bin(b) => out.extend_from_slice(b),
        }
    }

    /// The value as text: a string, or the first element of a string array.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::StringArray(v) => v.first().map(String::as_str),
            _ => None,
        }
    }

    /// The first element of an int32 array.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Int32(v) => v.first().copied(),
            _ => None,
        }
    }

    /// The first element of an int64 array.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int64(v) => v.first().copied(),
            _ => None,
        }
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::StringArray(v) => f.write_str(&v.join(", ")),
            Self::Int32(v) => {
                let parts: Vec<String> = v.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(", "))
            }
            Self::Int64(v) => {
                let parts: Vec<String> = v.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(", "))
            }
            Self::Bin(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(v: Vec<String>) -> Self {
        Self::StringArray(v)
    }
}

impl From<u32> for TagValue {
    fn from(n: u32) -> Self {
        Self::Int32(vec![n])
    }
}

impl From<u64> for TagValue {
    fn from(n: u64) -> Self {
        Self::Int64(vec![n])
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bin(b)
    }
}

/// An ordered, mutable tag → value mapping.
///
/// [`Header::set`] replaces any existing value for the tag, so callers never
/// need a separate removal step before overwriting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    entries: BTreeMap<Tag, TagValue>,
}

impl Header {
    /// Create an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing any previous value.
    pub fn set(&mut self, tag: Tag, value: impl Into<TagValue>) {
        self.entries.insert(tag, value.into());
    }

    /// Look up a tag.
    pub fn get(&self, tag: Tag) -> Option<&TagValue> {
        self.entries.get(&tag)
    }

    /// Look up a tag as text.
    pub fn get_str(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(TagValue::as_str)
    }

    /// Look up a tag as a 32-bit integer.
    pub fn get_u32(&self, tag: Tag) -> Option<u32> {
        self.get(tag).and_then(TagValue::as_u32)
    }

    /// Look up a tag as a 64-bit integer.
    pub fn get_u64(&self, tag: Tag) -> Option<u64> {
        self.get(tag).and_then(TagValue::as_u64)
    }

    /// Remove a tag, returning its value.
    pub fn remove(&mut self, tag: Tag) -> Option<TagValue> {
        self.entries.remove(&tag)
    }

    /// Whether a tag is present.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the header has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in ascending tag order.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, &TagValue)> {
        self.entries.iter().map(|(tag, value)| (*tag, value))
    }

    /// Copy every entry of `other` into `self`, overwriting collisions.
    pub fn merge(&mut self, other: &Self) {
        for (tag, value) in other.iter() {
            self.entries.insert(tag, value.clone());
        }
    }

    /// Serialize to a byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut index = Vec::with_capacity(self.entries.len() * ENTRY_LEN);
        let mut data = Vec::new();

        for (tag, value) in &self.entries {
            let align = value.alignment();
            let pad = (align - data.len() % align) % align;
            data.resize(data.len() + pad, 0);

            let offset = data.len() as u32;
            value.encode(&mut data);

            index.extend_from_slice(&tag.0.to_be_bytes());
            index.extend_from_slice(&value.type_code().to_be_bytes());
            index.extend_from_slice(&offset.to_be_bytes());
            index.extend_from_slice(&value.count().to_be_bytes());
        }

        let mut out = Vec::with_capacity(PREAMBLE_LEN + index.len() + data.len());
        out.extend_from_slice(&HEADER_MAGIC);
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(&index);
        out.extend_from_slice(&data);
        out
    }

    /// Write the serialized header, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the writer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<usize> {
        let bytes = self.to_bytes();
        w.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Write the header as a signature block: serialized, then zero-padded to
    /// an 8-byte boundary so the metadata header that follows stays aligned.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the writer.
    pub fn write_signature<W: Write>(&self, w: &mut W) -> std::io::Result<usize> {
        let mut bytes = self.to_bytes();
        bytes.resize(bytes.len() + signature_padding(bytes.len()), 0);
        w.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Decode a header from the front of `buf`, returning it together with
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] if the magic is wrong, the block is
    /// truncated, or an entry is malformed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), HeaderError> {
        let (entries, data_len) = parse_preamble(buf)?;
        let total = PREAMBLE_LEN + entries * ENTRY_LEN + data_len;
        if buf.len() < total {
            return Err(HeaderError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let index = &buf[PREAMBLE_LEN..PREAMBLE_LEN + entries * ENTRY_LEN];
        let data = &buf[PREAMBLE_LEN + entries * ENTRY_LEN..total];

        let mut header = Self::new();
        for raw in index.chunks_exact(ENTRY_LEN) {
            let tag = Tag(be_u32(&raw[0..4]));
            let type_code = be_u32(&raw[4..8]);
            let offset = be_u32(&raw[8..12]) as usize;
            let count = be_u32(&raw[12..16]) as usize;
            let value = decode_value(tag, type_code, offset, count, data)?;
            header.entries.insert(tag, value);
        }

        Ok((header, total))
    }

    /// Read one header block from a stream.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] on I/O failure or malformed input.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, HeaderError> {
        Ok(Self::read_counted(r)?.0)
    }

    /// Read a signature block from a stream, consuming its alignment padding.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] on I/O failure or malformed input.
    pub fn read_signature<R: Read>(r: &mut R) -> Result<Self, HeaderError> {
        let (header, len) = Self::read_counted(r)?;
        let mut pad = vec![0u8; signature_padding(len)];
        r.read_exact(&mut pad)?;
        Ok(header)
    }

    fn read_counted<R: Read>(r: &mut R) -> Result<(Self, usize), HeaderError> {
        let mut preamble = [0u8; PREAMBLE_LEN];
        r.read_exact(&mut preamble)?;
        let (entries, data_len) = parse_preamble(&preamble)?;

        let mut buf = preamble.to_vec();
        buf.resize(PREAMBLE_LEN + entries * ENTRY_LEN + data_len, 0);
        r.read_exact(&mut buf[PREAMBLE_LEN..])?;
        Self::parse(&buf)
    }
}

/// Zero bytes appended after a signature block of `len` bytes.
pub fn signature_padding(len: usize) -> usize {
    (8 - len % 8) % 8
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn parse_preamble(buf: &[u8]) -> Result<(usize, usize), HeaderError> {
    if buf.len() < PREAMBLE_LEN {
        return Err(HeaderError::Truncated {
            needed: PREAMBLE_LEN,
            available: buf.len(),
        });
    }
    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != HEADER_MAGIC {
        return Err(HeaderError::BadMagic(magic));
    }
    let entries = be_u32(&buf[8..12]) as usize;
    let data_len = be_u32(&buf[12..16]) as usize;
    if entries > MAX_ENTRIES || data_len > MAX_DATA_LEN {
        return Err(HeaderError::TooLarge { entries, data_len });
    }
    Ok((entries, data_len))
}

fn fixed_slice(data: &[u8], offset: usize, count: usize, width: usize) -> Option<&[u8]> {
    let end = offset.checked_add(count.checked_mul(width)?)?;
    data.get(offset..end)
}

fn decode_value(
    tag: Tag,
    type_code: u32,
    offset: usize,
    count: usize,
    data: &[u8],
) -> Result<TagValue, HeaderError> {
    let malformed = |reason: &str| HeaderError::Malformed {
        tag,
        reason: reason.to_string(),
    };
    let fixed = |width: usize| {
        fixed_slice(data, offset, count, width)
            .ok_or_else(|| malformed("value extends past data store"))
    };

    match type_code {
        TYPE_INT32 => Ok(TagValue::Int32(
            fixed(4)?.chunks_exact(4).map(be_u32).collect(),
        )),
        TYPE_INT64 => Ok(TagValue::Int64(
            fixed(8)?
                .chunks_exact(8)
                .map(|c| u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )),
        TYPE_BIN => Ok(TagValue::Bin(fixed(1)?.to_vec())),
        TYPE_STRING | TYPE_STRING_ARRAY | TYPE_I18NSTRING => {
            let mut strings = Vec::with_capacity(count.min(1024));
            let mut pos = offset;
            for _ in 0..count {
                let rest = data
                    .get(pos..)
                    .ok_or_else(|| malformed("string starts past data store"))?;
                let len = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| malformed("unterminated string"))?;
                let s = std::str::from_utf8(&rest[..len])
                    .map_err(|_| malformed("string is not valid UTF-8"))?;
                strings.push(s.to_string());
                pos += len + 1;
            }
            if type_code == TYPE_STRING {
                strings
                    .pop()
                    .filter(|_| count == 1)
                    .map(TagValue::String)
                    .ok_or_else(|| malformed("string entry must have count 1"))
            } else {
                Ok(TagValue::StringArray(strings))
            }
        }
        other => Err(HeaderError::UnsupportedType {
            tag,
            type_code: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut h = Header::new();
        h.set(Tag::NAME, "hello");
        h.set(Tag::VERSION, "1.0");
        h.set(Tag::BUILDTIME, 1_700_000_000u32);
        h.set(Tag::LONGARCHIVESIZE, 4096u64);
        h.set(Tag::BUILDARCHS, vec!["x86_64".to_string(), "noarch".to_string()]);
        h.set(Tag(5000), vec![1u8, 2, 3]);
        h
    }

    #[test]
    fn parse_restores_every_type() {
        let h = sample();
        let bytes = h.to_bytes();
        let (parsed, used) = Header::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed, h);
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut h = Header::new();
        h.set(Tag::PREIN, "echo inline");
        h.set(Tag::PREIN, "echo from file");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get_str(Tag::PREIN), Some("echo from file"));
    }

    #[test]
    fn preamble_layout() {
        let mut h = Header::new();
        h.set(Tag::NAME, "a");
        let bytes = h.to_bytes();
        assert_eq!(&bytes[0..4], &HEADER_MAGIC);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(be_u32(&bytes[8..12]), 1);
        assert_eq!(be_u32(&bytes[12..16]), 2); // "a\0"
        assert_eq!(be_u32(&bytes[16..20]), Tag::NAME.0);
        assert_eq!(be_u32(&bytes[20..24]), TYPE_STRING);
    }

    #[test]
    fn integers_are_aligned() {
        let mut h = Header::new();
        h.set(Tag::NAME, "abc"); // 4 bytes of data, then pad
        h.set(Tag::BUILDTIME, 7u32);
        h.set(Tag::LONGARCHIVESIZE, 9u64);
        let bytes = h.to_bytes();
        let index = &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 3 * ENTRY_LEN];
        for entry in index.chunks_exact(ENTRY_LEN) {
            let type_code = be_u32(&entry[4..8]);
            let offset = be_u32(&entry[8..12]) as usize;
            match type_code {
                TYPE_INT32 => assert_eq!(offset % 4, 0),
                TYPE_INT64 => assert_eq!(offset % 8, 0),
                _ => {}
            }
        }
    }

    #[test]
    fn integer_update_keeps_length() {
        let mut h = sample();
        h.set(Tag::ARCHIVESIZE, 0u32);
        let staged = h.to_bytes().len();
        h.set(Tag::ARCHIVESIZE, u32::MAX);
        assert_eq!(h.to_bytes().len(), staged);
    }

    #[test]
    fn signature_block_is_padded() {
        let mut h = Header::new();
        h.set(Tag(273), "abc");
        let mut out = Vec::new();
        let written = h.write_signature(&mut out).unwrap();
        assert_eq!(written % 8, 0);
        assert_eq!(written, out.len());

        let mut cursor = std::io::Cursor::new(out);
        let back = Header::read_signature(&mut cursor).unwrap();
        assert_eq!(back, h);
        assert_eq!(cursor.position() as usize, written);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0;
        assert!(matches!(
            Header::parse(&bytes),
            Err(HeaderError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_truncated_block() {
        let bytes = sample().to_bytes();
        let err = Header::parse(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, HeaderError::Truncated { .. }));
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let mut h = Header::new();
        h.set(Tag::BUILDTIME, 1u32);
        let mut bytes = h.to_bytes();
        // Point the entry's offset past the data store.
        bytes[24..28].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            Header::parse(&bytes),
            Err(HeaderError::Malformed { .. })
        ));
    }
}
