//! On-disk headers for arena files
//!
//! Every `mmf_storageN` file starts with a [`FileHeader`] whose first
//! [`TAG_LEN`] bytes are the index type tag, so the kind of an index can be
//! classified by reading a handful of bytes from the primary file. File 0
//! additionally carries the [`ArenaRoot`] describing the whole arena.
//!
//! ```text
//! offset 0    FileHeader (40 bytes)   tag, file id, size, bytes used
//! offset 64   ArenaRoot  (file 0)     tier bounds, file bitmask, root address
//! offset 128  data region
//! ```

use crate::core::arena::Address;
use crate::core::error::{ChemdexError, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Width of the type/version tag at the start of every arena file
pub const TAG_LEN: usize = 16;

/// Offset of the arena root record inside file 0
pub const ROOT_OFFSET: usize = 64;

/// First byte available for allocations in every file
pub const DATA_START: u64 = 128;

pub const ROOT_MAGIC: [u8; 8] = *b"CHMXARN\x01";

/// Per-file header
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    pub tag: [u8; TAG_LEN],
    pub file_id: U32,
    pub reserved: U32,
    /// Mapped length of this file in bytes
    pub size: U64,
    /// Bump pointer: first free byte in this file
    pub used: U64,
}

impl FileHeader {
    pub fn new(tag: [u8; TAG_LEN], file_id: u32, size: u64) -> Self {
        FileHeader {
            tag,
            file_id: U32::new(file_id),
            reserved: U32::new(0),
            size: U64::new(size),
            used: U64::new(DATA_START),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let len = std::mem::size_of::<FileHeader>();
        if bytes.len() < len {
            return Err(ChemdexError::Corrupted(
                "arena file shorter than its header".to_string(),
            ));
        }
        FileHeader::read_from_bytes(&bytes[..len])
            .map_err(|_| ChemdexError::Corrupted("unreadable arena file header".to_string()))
    }
}

/// Arena-wide bookkeeping kept in file 0
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ArenaRoot {
    pub magic: [u8; 8],
    pub min_size: U64,
    pub max_size: U64,
    /// Bit `i` set means `mmf_storage{i}` exists
    pub existing: U64,
    pub current_file: U32,
    pub reserved: U32,
    /// Address of the owner's root record (the index header)
    pub root: Address,
}

impl ArenaRoot {
    pub fn new(min_size: u64, max_size: u64) -> Self {
        ArenaRoot {
            magic: ROOT_MAGIC,
            min_size: U64::new(min_size),
            max_size: U64::new(max_size),
            existing: U64::new(1),
            current_file: U32::new(0),
            reserved: U32::new(0),
            root: Address::NULL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != ROOT_MAGIC {
            return Err(ChemdexError::Corrupted(
                "invalid arena root magic".to_string(),
            ));
        }
        if self.min_size.get() == 0 || self.min_size.get() > self.max_size.get() {
            return Err(ChemdexError::Corrupted(format!(
                "invalid arena tier bounds {}..{}",
                self.min_size.get(),
                self.max_size.get()
            )));
        }
        if self.existing.get() & 1 == 0 {
            return Err(ChemdexError::Corrupted(
                "arena bitmask does not include the primary file".to_string(),
            ));
        }
        Ok(())
    }
}

const _: () = assert!(std::mem::size_of::<FileHeader>() <= ROOT_OFFSET);
const _: () = assert!(ROOT_OFFSET + std::mem::size_of::<ArenaRoot>() <= DATA_START as usize);

/// Build a fixed-width tag from a string, truncating or zero-padding
pub fn make_tag(text: &str) -> [u8; TAG_LEN] {
    let mut tag = [0u8; TAG_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(TAG_LEN);
    tag[..len].copy_from_slice(&bytes[..len]);
    tag
}

/// Render a tag back to text, dropping trailing zero padding
pub fn tag_to_string(tag: &[u8; TAG_LEN]) -> String {
    let end = tag.iter().position(|&b| b == 0).unwrap_or(TAG_LEN);
    String::from_utf8_lossy(&tag[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header_round_trip() {
        let header = FileHeader::new(make_tag("CHMX-MOL"), 3, 1 << 20);
        let parsed = FileHeader::from_bytes(header.as_bytes()).unwrap();

        assert_eq!(parsed.file_id.get(), 3);
        assert_eq!(parsed.size.get(), 1 << 20);
        assert_eq!(parsed.used.get(), DATA_START);
        assert_eq!(tag_to_string(&parsed.tag), "CHMX-MOL");
    }

    #[test]
    fn test_short_header_rejected() {
        let result = FileHeader::from_bytes(&[0u8; 8]);
        assert!(matches!(result, Err(ChemdexError::Corrupted(_))));
    }

    #[test]
    fn test_root_validation() {
        let root = ArenaRoot::new(1 << 20, 1 << 24);
        assert!(root.validate().is_ok());

        let mut bad = root;
        bad.magic = [0u8; 8];
        assert!(bad.validate().is_err());

        let mut inverted = ArenaRoot::new(1 << 24, 1 << 20);
        inverted.existing = U64::new(1);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_tag_truncation() {
        let tag = make_tag("a-very-long-type-tag-string");
        assert_eq!(tag_to_string(&tag).len(), TAG_LEN);
    }
}
