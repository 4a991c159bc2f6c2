//! Multi-file memory-mapped arena
//!
//! An arena is a directory of `mmf_storage0`, `mmf_storage1`, ... files that
//! together form one flat address space. Allocation is a bump pointer in the
//! newest file; when it runs out a new file is appended whose size doubles
//! the previous tier, capped at the maximum file size. Nothing is ever freed
//! or compacted, so an [`Address`] stays valid for the life of the index.
//!
//! There is no ambient "current arena": every read or write takes the
//! [`Arena`] explicitly, which makes resolving an address against the wrong
//! index a type error rather than silent corruption.

pub mod file;
pub mod header;

use crate::core::error::{ChemdexError, Result};
use file::ArenaFile;
use header::{ArenaRoot, FileHeader, DATA_START, ROOT_OFFSET, TAG_LEN};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zerocopy::little_endian::{I32, I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Maximum number of backing files (one bit each in the persisted mask)
pub const MAX_FILES: u32 = 64;

/// Allocation granularity
const ALIGN: u64 = 8;

/// Values that can be copied in and out of mapped memory as raw bytes
pub trait Pod: FromBytes + IntoBytes + Immutable + KnownLayout + Unaligned + Copy {}

impl<T: FromBytes + IntoBytes + Immutable + KnownLayout + Unaligned + Copy> Pod for T {}

/// Location inside an arena: `(file, offset)`
///
/// The null address is `(-1, -1)`.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Address {
    file: I32,
    offset: I64,
}

impl Address {
    pub const NULL: Address = Address {
        file: I32::from_bytes((-1i32).to_le_bytes()),
        offset: I64::from_bytes((-1i64).to_le_bytes()),
    };

    pub fn new(file: i32, offset: i64) -> Self {
        Address {
            file: I32::new(file),
            offset: I64::new(offset),
        }
    }

    pub fn file(&self) -> i32 {
        self.file.get()
    }

    pub fn offset(&self) -> i64 {
        self.offset.get()
    }

    pub fn is_null(&self) -> bool {
        *self == Address::NULL
    }

    /// Address `bytes` further into the same file
    pub fn add(&self, bytes: u64) -> Address {
        Address::new(self.file(), self.offset() + bytes as i64)
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::NULL
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Address(null)")
        } else {
            write!(f, "Address({}:{:#x})", self.file(), self.offset())
        }
    }
}

/// Name of the `id`-th backing file
pub fn storage_file_name(id: u32) -> String {
    format!("mmf_storage{}", id)
}

/// Read only the type tag of an arena without mapping it
pub fn read_tag<P: AsRef<Path>>(dir: P) -> Result<[u8; TAG_LEN]> {
    let mut file = File::open(dir.as_ref().join(storage_file_name(0)))?;
    let mut tag = [0u8; TAG_LEN];
    file.read_exact(&mut tag)?;
    Ok(tag)
}

/// The set of mapped files backing one index
pub struct Arena {
    dir: PathBuf,
    files: Vec<ArenaFile>,
    tag: [u8; TAG_LEN],
    min_size: u64,
    max_size: u64,
    read_only: bool,
}

impl Arena {
    /// Create a new arena in `dir`
    ///
    /// `min_size` is the size of the first file, `max_size` caps every later
    /// file and bounds the largest single allocation.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        min_size: u64,
        max_size: u64,
        tag: [u8; TAG_LEN],
    ) -> Result<Self> {
        let dir = dir.as_ref();
        if min_size <= DATA_START || min_size > max_size {
            return Err(ChemdexError::InvalidOption(format!(
                "arena sizes must satisfy {} < min ({}) <= max ({})",
                DATA_START, min_size, max_size
            )));
        }
        std::fs::create_dir_all(dir)?;

        let mut primary = ArenaFile::create(dir.join(storage_file_name(0)), 0, min_size, tag)?;
        let root = ArenaRoot::new(min_size, max_size);
        primary.as_mut_slice()?[ROOT_OFFSET..ROOT_OFFSET + size_of::<ArenaRoot>()]
            .copy_from_slice(root.as_bytes());

        info!(
            "Created arena at {:?} (min {} bytes, max {} bytes)",
            dir, min_size, max_size
        );

        Ok(Arena {
            dir: dir.to_path_buf(),
            files: vec![primary],
            tag,
            min_size,
            max_size,
            read_only: false,
        })
    }

    /// Map an existing arena, reopening every file named in the persisted mask
    pub fn load<P: AsRef<Path>>(dir: P, read_only: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let primary = ArenaFile::open(dir.join(storage_file_name(0)), 0, read_only)?;
        let root = Self::read_root(&primary)?;
        root.validate()?;

        let tag = FileHeader::from_bytes(primary.as_slice())?.tag;
        let existing = root.existing.get();
        let mut files = vec![primary];

        for id in 1..MAX_FILES {
            if existing & (1u64 << id) == 0 {
                continue;
            }
            if id as usize != files.len() {
                return Err(ChemdexError::Corrupted(format!(
                    "arena file mask {:#x} has a gap before file {}",
                    existing, id
                )));
            }
            let file = ArenaFile::open(dir.join(storage_file_name(id)), id, read_only)?;
            if FileHeader::from_bytes(file.as_slice())?.tag != tag {
                return Err(ChemdexError::Corrupted(format!(
                    "arena file {} carries a different type tag",
                    id
                )));
            }
            files.push(file);
        }

        debug!("Loaded arena at {:?} with {} files", dir, files.len());

        Ok(Arena {
            dir: dir.to_path_buf(),
            files,
            tag,
            min_size: root.min_size.get(),
            max_size: root.max_size.get(),
            read_only,
        })
    }

    fn read_root(primary: &ArenaFile) -> Result<ArenaRoot> {
        let bytes = primary.as_slice();
        let end = ROOT_OFFSET + size_of::<ArenaRoot>();
        if bytes.len() < end {
            return Err(ChemdexError::Corrupted(
                "primary arena file too short".to_string(),
            ));
        }
        ArenaRoot::read_from_bytes(&bytes[ROOT_OFFSET..end])
            .map_err(|_| ChemdexError::Corrupted("unreadable arena root".to_string()))
    }

    fn write_root(&mut self, root: &ArenaRoot) -> Result<()> {
        let slice = self.files[0].as_mut_slice()?;
        slice[ROOT_OFFSET..ROOT_OFFSET + size_of::<ArenaRoot>()].copy_from_slice(root.as_bytes());
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tag(&self) -> [u8; TAG_LEN] {
        self.tag
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Total mapped bytes across all files
    pub fn mapped_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size()).sum()
    }

    /// Bytes handed out by the allocator (including file headers)
    pub fn used_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.used()).sum()
    }

    /// The owner's root record address (null until set)
    pub fn root(&self) -> Result<Address> {
        Ok(Self::read_root(&self.files[0])?.root)
    }

    pub fn set_root(&mut self, address: Address) -> Result<()> {
        self.ensure_writable()?;
        let mut root = Self::read_root(&self.files[0])?;
        root.root = address;
        self.write_root(&root)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(ChemdexError::ReadOnly);
        }
        Ok(())
    }

    /// Allocate `len` zeroed bytes
    pub fn allocate(&mut self, len: u64) -> Result<Address> {
        self.ensure_writable()?;

        let need = (len.max(1) + ALIGN - 1) / ALIGN * ALIGN;
        if need > self.max_size - DATA_START {
            return Err(ChemdexError::AllocationTooLarge {
                requested: len,
                max: self.max_size,
            });
        }

        if self.current().remaining() < need {
            self.grow(need)?;
        }

        let file = self
            .files
            .last_mut()
            .ok_or_else(|| ChemdexError::Corrupted("arena has no files".to_string()))?;
        let offset = file.bump(need)?;
        Ok(Address::new(file.id() as i32, offset as i64))
    }

    /// Allocate room for `count` values of `T`
    pub fn allocate_array<T: Pod>(&mut self, count: u64) -> Result<Address> {
        self.allocate(count * size_of::<T>() as u64)
    }

    fn current(&self) -> &ArenaFile {
        &self.files[self.files.len() - 1]
    }

    /// Append a new file large enough for `need` bytes
    fn grow(&mut self, need: u64) -> Result<()> {
        let id = self.files.len() as u32;
        if id >= MAX_FILES {
            return Err(ChemdexError::Unsupported(format!(
                "arena is limited to {} files",
                MAX_FILES
            )));
        }

        let mut size = self.current().size().saturating_mul(2).min(self.max_size);
        while size - DATA_START < need && size < self.max_size {
            size = size.saturating_mul(2).min(self.max_size);
        }

        info!("Growing arena {:?}: file {} ({} bytes)", self.dir, id, size);

        let file = ArenaFile::create(self.dir.join(storage_file_name(id)), id, size, self.tag)?;
        self.files.push(file);

        let mut root = Self::read_root(&self.files[0])?;
        root.existing = U64::new(root.existing.get() | (1u64 << id));
        root.current_file = U32::new(id);
        self.write_root(&root)
    }

    fn locate(&self, address: Address, len: usize) -> Result<(usize, usize)> {
        let invalid = || ChemdexError::InvalidAddress {
            file: address.file(),
            offset: address.offset(),
        };
        if address.file() < 0 || address.offset() < DATA_START as i64 {
            return Err(invalid());
        }
        let file = address.file() as usize;
        let start = address.offset() as usize;
        let size = self.files.get(file).ok_or_else(invalid)?.size() as usize;
        if start + len > size {
            return Err(invalid());
        }
        Ok((file, start))
    }

    /// Raw byte view
    pub fn bytes(&self, address: Address, len: usize) -> Result<&[u8]> {
        let (file, start) = self.locate(address, len)?;
        Ok(&self.files[file].as_slice()[start..start + len])
    }

    /// Mutable raw byte view
    pub fn bytes_mut(&mut self, address: Address, len: usize) -> Result<&mut [u8]> {
        self.ensure_writable()?;
        let (file, start) = self.locate(address, len)?;
        Ok(&mut self.files[file].as_mut_slice()?[start..start + len])
    }

    pub fn read<T: Pod>(&self, address: Address) -> Result<T> {
        let bytes = self.bytes(address, size_of::<T>())?;
        T::read_from_bytes(bytes).map_err(|_| ChemdexError::InvalidAddress {
            file: address.file(),
            offset: address.offset(),
        })
    }

    pub fn write<T: Pod>(&mut self, address: Address, value: &T) -> Result<()> {
        self.bytes_mut(address, size_of::<T>())?
            .copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Copy `data` into a freshly allocated block
    pub fn store_bytes(&mut self, data: &[u8]) -> Result<Address> {
        let address = self.allocate(data.len() as u64)?;
        if !data.is_empty() {
            self.bytes_mut(address, data.len())?.copy_from_slice(data);
        }
        Ok(address)
    }

    pub fn flush(&self) -> Result<()> {
        for file in &self.files {
            file.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("dir", &self.dir)
            .field("files", &self.files.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if !self.read_only {
            if let Err(e) = self.flush() {
                tracing::warn!("Failed to flush arena {:?} on drop: {}", self.dir, e);
            }
        }
    }
}
