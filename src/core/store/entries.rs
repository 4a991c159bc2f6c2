//! Buffer of fixed-size byte entries
//!
//! Entries are packed into arena chunks of `per_chunk` entries. Reading copies
//! whole chunks at a time, which is how the similarity store scans a cell
//! buffer or the small base. `clear` only resets the length; chunks are
//! reused by later pushes.

use crate::core::arena::{Address, Arena};
use crate::core::container::{ArenaVec, Ptr};
use crate::core::error::{ChemdexError, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct EntryHeader {
    entry_size: U32,
    per_chunk: U32,
    len: U64,
    chunks: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct EntryBuffer {
    header: Ptr<EntryHeader>,
}

impl EntryBuffer {
    pub fn create(arena: &mut Arena, entry_size: usize, per_chunk: u32) -> Result<Self> {
        if entry_size == 0 || per_chunk == 0 {
            return Err(ChemdexError::InvalidOption(
                "entry buffer needs a positive entry and chunk size".to_string(),
            ));
        }
        let chunks = ArenaVec::<Address>::with_block_size(arena, 64)?;
        let header = Ptr::new_in(
            arena,
            &EntryHeader {
                entry_size: U32::new(entry_size as u32),
                per_chunk: U32::new(per_chunk),
                len: U64::new(0),
                chunks: chunks.address(),
            },
        )?;
        Ok(EntryBuffer { header })
    }

    pub fn open(address: Address) -> Self {
        EntryBuffer {
            header: Ptr::from_address(address),
        }
    }

    pub fn address(&self) -> Address {
        self.header.address()
    }

    pub fn len(&self, arena: &Arena) -> Result<u64> {
        Ok(self.header.read(arena)?.len.get())
    }

    pub fn is_empty(&self, arena: &Arena) -> Result<bool> {
        Ok(self.len(arena)? == 0)
    }

    pub fn entry_size(&self, arena: &Arena) -> Result<usize> {
        Ok(self.header.read(arena)?.entry_size.get() as usize)
    }

    pub fn push(&self, arena: &mut Arena, entry: &[u8]) -> Result<u64> {
        let mut header = self.header.read(arena)?;
        let entry_size = header.entry_size.get() as usize;
        if entry.len() != entry_size {
            return Err(ChemdexError::Corrupted(format!(
                "entry of {} bytes pushed into buffer of {}-byte entries",
                entry.len(),
                entry_size
            )));
        }

        let per_chunk = header.per_chunk.get() as u64;
        let index = header.len.get();
        let chunk_index = index / per_chunk;
        let chunks = ArenaVec::<Address>::open(header.chunks);
        if chunk_index >= chunks.len(arena)? {
            let chunk = arena.allocate(per_chunk * entry_size as u64)?;
            chunks.push(arena, &chunk)?;
        }

        let chunk = chunks.get(arena, chunk_index)?;
        let at = chunk.add((index % per_chunk) * entry_size as u64);
        arena.bytes_mut(at, entry_size)?.copy_from_slice(entry);

        header.len = U64::new(index + 1);
        self.header.write(arena, &header)?;
        Ok(index)
    }

    /// Copy out every entry, concatenated
    pub fn read_all(&self, arena: &Arena) -> Result<Vec<u8>> {
        let header = self.header.read(arena)?;
        let entry_size = header.entry_size.get() as usize;
        let per_chunk = header.per_chunk.get() as u64;
        let mut remaining = header.len.get();
        let mut out = Vec::with_capacity(remaining as usize * entry_size);

        let chunks = ArenaVec::<Address>::open(header.chunks);
        let mut chunk_index = 0;
        while remaining > 0 {
            let take = remaining.min(per_chunk);
            let chunk = chunks.get(arena, chunk_index)?;
            out.extend_from_slice(arena.bytes(chunk, take as usize * entry_size)?);
            remaining -= take;
            chunk_index += 1;
        }
        Ok(out)
    }

    /// Forget all entries, keeping chunks for reuse
    pub fn clear(&self, arena: &mut Arena) -> Result<()> {
        self.header.update(arena, |h| h.len = U64::new(0))?;
        Ok(())
    }
}
