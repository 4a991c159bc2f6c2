//! Doubly linked list of arena cells
//!
//! A zeroed [`ListHeader`] is a valid empty list, so directories of lists
//! (hash buckets) need no initialization pass after allocation.

use crate::core::arena::{Address, Arena, Pod};
use crate::core::container::Ptr;
use crate::core::error::{ChemdexError, Result};
use std::marker::PhantomData;
use std::mem::size_of;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ListHeader {
    head: Address,
    tail: Address,
    len: U64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct CellLinks {
    prev: Address,
    next: Address,
}

const LINKS: u64 = size_of::<CellLinks>() as u64;

/// Handle to a list whose header lives at a fixed arena address
pub struct ArenaList<T> {
    header: Ptr<ListHeader>,
    _marker: PhantomData<T>,
}

impl<T> Clone for ArenaList<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaList<T> {}

impl<T: Pod> ArenaList<T> {
    pub fn create(arena: &mut Arena) -> Result<Self> {
        let header = Ptr::<ListHeader>::allocate(arena, 1)?;
        Ok(Self::open(header.address()))
    }

    /// Open a list whose header is at `address` (zeroed memory is an empty list)
    pub fn open(address: Address) -> Self {
        ArenaList {
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

    pub fn first(&self, arena: &Arena) -> Result<Option<Address>> {
        let header = self.header.read(arena)?;
        Ok((header.len.get() > 0).then_some(header.head))
    }

    pub fn last(&self, arena: &Arena) -> Result<Option<Address>> {
        let header = self.header.read(arena)?;
        Ok((header.len.get() > 0).then_some(header.tail))
    }

    pub fn next(&self, arena: &Arena, cell: Address) -> Result<Option<Address>> {
        let links: CellLinks = arena.read(cell)?;
        Ok((!links.next.is_null()).then_some(links.next))
    }

    /// Address of the value stored in `cell`
    pub fn value_ptr(cell: Address) -> Ptr<T> {
        Ptr::from_address(cell.add(LINKS))
    }

    pub fn value(&self, arena: &Arena, cell: Address) -> Result<T> {
        Self::value_ptr(cell).read(arena)
    }

    pub fn set_value(&self, arena: &mut Arena, cell: Address, value: &T) -> Result<()> {
        Self::value_ptr(cell).write(arena, value)
    }

    pub fn push_back(&self, arena: &mut Arena, value: &T) -> Result<Address> {
        self.insert_before(arena, None, value)
    }

    /// Insert before `cell`, or at the end when `cell` is `None`
    pub fn insert_before(
        &self,
        arena: &mut Arena,
        cell: Option<Address>,
        value: &T,
    ) -> Result<Address> {
        let mut header = self.header.read(arena)?;
        let new_cell = arena.allocate(LINKS + size_of::<T>() as u64)?;
        Self::value_ptr(new_cell).write(arena, value)?;

        let (prev, next) = match cell {
            Some(next) => {
                let links: CellLinks = arena.read(next)?;
                (links.prev, next)
            }
            None if header.len.get() == 0 => (Address::NULL, Address::NULL),
            None => (header.tail, Address::NULL),
        };

        arena.write(new_cell, &CellLinks { prev, next })?;
        if prev.is_null() {
            header.head = new_cell;
        } else {
            let mut links: CellLinks = arena.read(prev)?;
            links.next = new_cell;
            arena.write(prev, &links)?;
        }
        if next.is_null() {
            header.tail = new_cell;
        } else {
            let mut links: CellLinks = arena.read(next)?;
            links.prev = new_cell;
            arena.write(next, &links)?;
        }

        header.len = U64::new(header.len.get() + 1);
        self.header.write(arena, &header)?;
        Ok(new_cell)
    }

    /// Unlink `cell`; its storage is not reclaimed
    pub fn erase(&self, arena: &mut Arena, cell: Address) -> Result<()> {
        let mut header = self.header.read(arena)?;
        if header.len.get() == 0 {
            return Err(ChemdexError::Corrupted(
                "erase from empty list".to_string(),
            ));
        }
        let links: CellLinks = arena.read(cell)?;

        if links.prev.is_null() {
            header.head = links.next;
        } else {
            let mut prev: CellLinks = arena.read(links.prev)?;
            prev.next = links.next;
            arena.write(links.prev, &prev)?;
        }
        if links.next.is_null() {
            header.tail = links.prev;
        } else {
            let mut next: CellLinks = arena.read(links.next)?;
            next.prev = links.prev;
            arena.write(links.next, &next)?;
        }

        header.len = U64::new(header.len.get() - 1);
        self.header.write(arena, &header)
    }

    /// All cell addresses in order
    pub fn cells(&self, arena: &Arena) -> Result<Vec<Address>> {
        let mut cells = Vec::new();
        let mut cursor = self.first(arena)?;
        while let Some(cell) = cursor {
            cells.push(cell);
            cursor = self.next(arena, cell)?;
        }
        Ok(cells)
    }

    pub fn values(&self, arena: &Arena) -> Result<Vec<T>> {
        self.cells(arena)?
            .into_iter()
            .map(|cell| self.value(arena, cell))
            .collect()
    }
}
