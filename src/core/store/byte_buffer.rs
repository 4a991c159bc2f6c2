//! Append-only store of variable-length records
//!
//! Records are packed into large arena blocks; each record has a slot
//! `(address, length)` indexed by insertion order. A removed record keeps
//! its slot with length `-1` so indexes of later records never shift.

use crate::core::arena::{Address, Arena};
use crate::core::container::{ArenaVec, Ptr};
use crate::core::error::{ChemdexError, Result};
use zerocopy::little_endian::{I64, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const DEFAULT_BLOCK_SIZE: u64 = 1 << 20;

const REMOVED: i64 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct Slot {
    address: Address,
    len: I64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct ByteBufferHeader {
    block_size: U64,
    block: Address,
    block_used: U64,
    slots: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct ByteBufferStore {
    header: Ptr<ByteBufferHeader>,
    slots: ArenaVec<Slot>,
}

impl ByteBufferStore {
    pub fn create(arena: &mut Arena, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(ChemdexError::InvalidOption(
                "byte buffer block size must be positive".to_string(),
            ));
        }
        // A block must fit in one arena file
        let block_size = block_size.min(arena.max_size() / 2);
        let slots = ArenaVec::<Slot>::create(arena)?;
        let header = Ptr::new_in(
            arena,
            &ByteBufferHeader {
                block_size: U64::new(block_size),
                block: Address::NULL,
                block_used: U64::new(0),
                slots: slots.address(),
            },
        )?;
        Ok(ByteBufferStore { header, slots })
    }

    pub fn open(arena: &Arena, address: Address) -> Result<Self> {
        let header = Ptr::<ByteBufferHeader>::from_address(address);
        let slots = ArenaVec::open(header.read(arena)?.slots);
        Ok(ByteBufferStore { header, slots })
    }

    pub fn address(&self) -> Address {
        self.header.address()
    }

    /// Number of slots, removed ones included
    pub fn len(&self, arena: &Arena) -> Result<u64> {
        self.slots.len(arena)
    }

    pub fn is_empty(&self, arena: &Arena) -> Result<bool> {
        self.slots.is_empty(arena)
    }

    /// Append a record and return its slot index
    pub fn add(&self, arena: &mut Arena, data: &[u8]) -> Result<u64> {
        let mut header = self.header.read(arena)?;
        let len = data.len() as u64;
        let block_size = header.block_size.get();

        let address = if len > block_size / 4 {
            // Large records get their own allocation instead of wasting a block tail
            arena.store_bytes(data)?
        } else {
            if header.block.is_null() || header.block_used.get() + len > block_size {
                header.block = arena.allocate(block_size)?;
                header.block_used = U64::new(0);
            }
            let address = header.block.add(header.block_used.get());
            if !data.is_empty() {
                arena.bytes_mut(address, data.len())?.copy_from_slice(data);
            }
            header.block_used = U64::new(header.block_used.get() + len);
            self.header.write(arena, &header)?;
            address
        };

        self.slots.push(
            arena,
            &Slot {
                address,
                len: I64::new(len as i64),
            },
        )
    }

    /// Record bytes, or `None` when the record was removed
    pub fn get<'a>(&self, arena: &'a Arena, index: u64) -> Result<Option<&'a [u8]>> {
        let slot = self.slots.get(arena, index)?;
        match slot.len.get() {
            REMOVED => Ok(None),
            0 => Ok(Some(&[])),
            len => Ok(Some(arena.bytes(slot.address, len as usize)?)),
        }
    }

    pub fn is_removed(&self, arena: &Arena, index: u64) -> Result<bool> {
        Ok(self.slots.get(arena, index)?.len.get() == REMOVED)
    }

    /// Mark a record removed; its bytes stay in the arena
    pub fn remove(&self, arena: &mut Arena, index: u64) -> Result<()> {
        let mut slot = self.slots.get(arena, index)?;
        slot.len = I64::new(REMOVED);
        self.slots.set(arena, index, &slot)
    }
}
