//! Persistent index header
//!
//! The arena root points at an [`IndexHeader`]. It holds the address of
//! every sub-store, the record counters and where the serialized
//! [`Properties`](super::properties::Properties) live.

use crate::core::arena::header::{make_tag, tag_to_string, TAG_LEN};
use crate::core::arena::Address;
use crate::core::chem::ObjectKind;
use crate::core::error::{ChemdexError, Result};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Format generation written into the type tag and the properties
pub const FORMAT_VERSION: &str = "1";

const TAG_PREFIX: &str = "CHEMDEX";

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexHeader {
    /// Live records
    pub object_count: U64,
    /// Where auto-assigned ids start probing
    pub first_free_id: U64,
    pub properties: Address,
    pub properties_len: U64,
    pub objects: Address,
    pub substructure: Address,
    pub similarity: Address,
    pub exact: Address,
    pub formula: Address,
    /// External id -> record number
    pub forward: Address,
    /// Record number -> external id
    pub back: Address,
}

/// Type tag for an index of `kind`: `CHEMDEX1 MOL`
pub fn index_tag(kind: ObjectKind) -> [u8; TAG_LEN] {
    make_tag(&format!("{}{} {}", TAG_PREFIX, FORMAT_VERSION, kind.tag_code()))
}

/// Parse a type tag back into `(format version, kind)`
pub fn parse_tag(tag: &[u8; TAG_LEN]) -> Result<(String, ObjectKind)> {
    let text = tag_to_string(tag);
    let rest = text.strip_prefix(TAG_PREFIX).ok_or_else(|| {
        ChemdexError::Corrupted(format!("'{}' is not a chemical index tag", text))
    })?;
    let (version, code) = rest
        .split_once(' ')
        .ok_or_else(|| ChemdexError::Corrupted(format!("malformed index tag '{}'", text)))?;
    let kind = ObjectKind::from_tag_code(code).ok_or_else(|| ChemdexError::TypeMismatch {
        found: code.to_string(),
        expected: "MOL or RXN".to_string(),
    })?;
    Ok((version.to_string(), kind))
}
