//! One memory-mapped arena file
//!
//! Files are sized once at creation and never remapped, so byte views into
//! an existing file stay valid for as long as the arena is open. Growth of
//! the arena happens by appending whole new files.

use crate::core::arena::header::{FileHeader, DATA_START, TAG_LEN};
use crate::core::error::{ChemdexError, Result};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;
use zerocopy::little_endian::U64;
use zerocopy::IntoBytes;

enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

/// A single `mmf_storageN` file
pub struct ArenaFile {
    _file: File,
    map: Mapping,
    path: PathBuf,
    id: u32,
    size: u64,
    used: u64,
}

impl ArenaFile {
    /// Create and map a new zero-filled file of `size` bytes
    pub fn create<P: AsRef<Path>>(path: P, id: u32, size: u64, tag: [u8; TAG_LEN]) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;

        // SAFETY: the file was just created with exclusive access and its
        // length is fixed for the lifetime of the mapping.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let header = FileHeader::new(tag, id, size);
        mmap[..std::mem::size_of::<FileHeader>()].copy_from_slice(header.as_bytes());

        debug!("Created arena file {:?} ({} bytes)", path, size);

        Ok(ArenaFile {
            _file: file,
            map: Mapping::ReadWrite(mmap),
            path: path.to_path_buf(),
            id,
            size,
            used: DATA_START,
        })
    }

    /// Map an existing file
    pub fn open<P: AsRef<Path>>(path: P, id: u32, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(!read_only).open(path)?;

        // SAFETY: index files are owned by this process for the lifetime of
        // the mapping; all accesses are bounds-checked against `size`.
        let map = if read_only {
            Mapping::ReadOnly(unsafe { Mmap::map(&file)? })
        } else {
            Mapping::ReadWrite(unsafe { MmapMut::map_mut(&file)? })
        };

        let bytes: &[u8] = match &map {
            Mapping::ReadWrite(m) => m,
            Mapping::ReadOnly(m) => m,
        };
        let header = FileHeader::from_bytes(bytes)?;

        if header.file_id.get() != id {
            return Err(ChemdexError::Corrupted(format!(
                "arena file {:?} claims id {}, expected {}",
                path,
                header.file_id.get(),
                id
            )));
        }
        let size = header.size.get();
        let used = header.used.get();
        if size != bytes.len() as u64 || used > size || used < DATA_START {
            return Err(ChemdexError::Corrupted(format!(
                "arena file {:?} has inconsistent size {} / used {} (mapped {})",
                path,
                size,
                used,
                bytes.len()
            )));
        }

        Ok(ArenaFile {
            _file: file,
            map,
            path: path.to_path_buf(),
            id,
            size,
            used,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.used
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.map, Mapping::ReadOnly(_))
    }

    /// Bump-allocate `len` bytes, returning the offset of the block
    pub fn bump(&mut self, len: u64) -> Result<u64> {
        if len > self.remaining() {
            return Err(ChemdexError::Corrupted(format!(
                "bump of {} bytes past end of arena file {}",
                len, self.id
            )));
        }
        let offset = self.used;
        self.used += len;
        let used = self.used;
        let header_len = std::mem::size_of::<FileHeader>();
        let mut header = FileHeader::from_bytes(self.as_slice())?;
        header.used = U64::new(used);
        self.as_mut_slice()?[..header_len].copy_from_slice(header.as_bytes());
        Ok(offset)
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Mapping::ReadWrite(m) => m,
            Mapping::ReadOnly(m) => m,
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match &mut self.map {
            Mapping::ReadWrite(m) => Ok(m),
            Mapping::ReadOnly(_) => Err(ChemdexError::ReadOnly),
        }
    }

    /// Flush dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        if let Mapping::ReadWrite(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arena::header::make_tag;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mmf_storage0");

        {
            let mut file = ArenaFile::create(&path, 0, 4096, make_tag("T")).unwrap();
            let offset = file.bump(100).unwrap();
            assert_eq!(offset, DATA_START);
            file.as_mut_slice().unwrap()[offset as usize] = 0xAB;
            file.flush().unwrap();
        }

        let file = ArenaFile::open(&path, 0, true).unwrap();
        assert_eq!(file.used(), DATA_START + 100);
        assert_eq!(file.as_slice()[DATA_START as usize], 0xAB);
        assert!(file.is_read_only());
    }

    #[test]
    fn test_bump_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let mut file =
            ArenaFile::create(dir.path().join("mmf_storage0"), 0, 256, make_tag("T")).unwrap();
        assert!(file.bump(1024).is_err());
    }

    #[test]
    fn test_wrong_id_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mmf_storage0");
        ArenaFile::create(&path, 0, 4096, make_tag("T")).unwrap();

        let result = ArenaFile::open(&path, 1, false);
        assert!(matches!(result, Err(ChemdexError::Corrupted(_))));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mmf_storage0");
        ArenaFile::create(&path, 0, 4096, make_tag("T")).unwrap();

        let mut file = ArenaFile::open(&path, 0, true).unwrap();
        assert!(matches!(file.as_mut_slice(), Err(ChemdexError::ReadOnly)));
    }
}
