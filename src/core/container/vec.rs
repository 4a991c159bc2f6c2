//! Growable block array
//!
//! Elements live in fixed-size blocks allocated on demand, so pushing never
//! moves existing elements and an element address handed out once stays
//! valid. The block table itself is reallocated (doubling) as blocks are
//! added, up to [`MAX_BLOCKS`]. The array never shrinks.

use crate::core::arena::{Address, Arena, Pod};
use crate::core::container::Ptr;
use crate::core::error::{ChemdexError, Result};
use std::marker::PhantomData;
use std::mem::size_of;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const DEFAULT_BLOCK_SIZE: u32 = 10_000;
pub const MAX_BLOCKS: u32 = 40_000;

const INITIAL_TABLE_CAPACITY: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct VecHeader {
    len: U64,
    block_size: U32,
    block_count: U32,
    table_capacity: U32,
    reserved: U32,
    table: Address,
}

/// Handle to an array stored in an arena
pub struct ArenaVec<T> {
    header: Ptr<VecHeader>,
    _marker: PhantomData<T>,
}

impl<T> Clone for ArenaVec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaVec<T> {}

impl<T> std::fmt::Debug for ArenaVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArenaVec({:?})", self.header.address())
    }
}

impl<T: Pod> ArenaVec<T> {
    pub fn create(arena: &mut Arena) -> Result<Self> {
        Self::with_block_size(arena, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(arena: &mut Arena, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(ChemdexError::InvalidOption(
                "array block size must be positive".to_string(),
            ));
        }
        let header = Ptr::new_in(
            arena,
            &VecHeader {
                len: U64::new(0),
                block_size: U32::new(block_size),
                block_count: U32::new(0),
                table_capacity: U32::new(0),
                reserved: U32::new(0),
                table: Address::NULL,
            },
        )?;
        Ok(ArenaVec {
            header,
            _marker: PhantomData,
        })
    }

    /// Re-open an array from its persisted address
    pub fn open(address: Address) -> Self {
        ArenaVec {
            header: Ptr::from_address(address),
            _marker: PhantomData,
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

    /// Address of element `index` (must be below `len`)
    pub fn element_address(&self, arena: &Arena, index: u64) -> Result<Address> {
        let header = self.header.read(arena)?;
        if index >= header.len.get() {
            return Err(ChemdexError::Corrupted(format!(
                "array index {} out of bounds (len {})",
                index,
                header.len.get()
            )));
        }
        Self::slot(arena, &header, index)
    }

    fn slot(arena: &Arena, header: &VecHeader, index: u64) -> Result<Address> {
        let block_size = header.block_size.get() as u64;
        let block = index / block_size;
        let within = index % block_size;
        let block_address: Address = arena.read(header.table.add(block * size_of::<Address>() as u64))?;
        Ok(block_address.add(within * size_of::<T>() as u64))
    }

    pub fn get(&self, arena: &Arena, index: u64) -> Result<T> {
        arena.read(self.element_address(arena, index)?)
    }

    pub fn set(&self, arena: &mut Arena, index: u64, value: &T) -> Result<()> {
        let address = self.element_address(arena, index)?;
        arena.write(address, value)
    }

    /// Append a value, returning its index
    pub fn push(&self, arena: &mut Arena, value: &T) -> Result<u64> {
        let index = self.len(arena)?;
        self.resize(arena, index + 1)?;
        self.set(arena, index, value)?;
        Ok(index)
    }

    /// Grow to `new_len` elements; new elements are zeroed. Never shrinks.
    pub fn resize(&self, arena: &mut Arena, new_len: u64) -> Result<()> {
        let mut header = self.header.read(arena)?;
        if new_len <= header.len.get() {
            return Ok(());
        }
        let block_size = header.block_size.get() as u64;
        let blocks_needed = (new_len + block_size - 1) / block_size;
        if blocks_needed > MAX_BLOCKS as u64 {
            return Err(ChemdexError::AllocationTooLarge {
                requested: new_len * size_of::<T>() as u64,
                max: MAX_BLOCKS as u64 * block_size * size_of::<T>() as u64,
            });
        }

        while (header.block_count.get() as u64) < blocks_needed {
            if header.block_count.get() == header.table_capacity.get() {
                Self::grow_table(arena, &mut header)?;
            }
            let block = arena.allocate_array::<T>(block_size)?;
            let slot = header
                .table
                .add(header.block_count.get() as u64 * size_of::<Address>() as u64);
            arena.write(slot, &block)?;
            header.block_count = U32::new(header.block_count.get() + 1);
        }

        header.len = U64::new(new_len);
        self.header.write(arena, &header)
    }

    fn grow_table(arena: &mut Arena, header: &mut VecHeader) -> Result<()> {
        let old_capacity = header.table_capacity.get();
        let new_capacity = (old_capacity * 2).clamp(INITIAL_TABLE_CAPACITY, MAX_BLOCKS);
        let table = arena.allocate_array::<Address>(new_capacity as u64)?;
        for i in 0..header.block_count.get() as u64 {
            let offset = i * size_of::<Address>() as u64;
            let block: Address = arena.read(header.table.add(offset))?;
            arena.write(table.add(offset), &block)?;
        }
        header.table = table;
        header.table_capacity = U32::new(new_capacity);
        Ok(())
    }

    /// Copy out all elements
    pub fn to_vec(&self, arena: &Arena) -> Result<Vec<T>> {
        let header = self.header.read(arena)?;
        let len = header.len.get();
        let mut out = Vec::with_capacity(len as usize);
        for index in 0..len {
            out.push(arena.read(Self::slot(arena, &header, index)?)?);
        }
        Ok(out)
    }
}
