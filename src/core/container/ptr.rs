//! Typed pointer into an arena

use crate::core::arena::{Address, Arena, Pod};
use crate::core::error::Result;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

/// A typed [`Address`]
///
/// Dereferencing always goes through an explicit [`Arena`]; a `Ptr` carries
/// no reference to the arena it came from.
pub struct Ptr<T> {
    address: Address,
    _marker: PhantomData<T>,
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<T> Eq for Ptr<T> {}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr<{}>({:?})", std::any::type_name::<T>(), self.address)
    }
}

impl<T: Pod> Ptr<T> {
    pub fn null() -> Self {
        Self::from_address(Address::NULL)
    }

    pub fn from_address(address: Address) -> Self {
        Ptr {
            address,
            _marker: PhantomData,
        }
    }

    /// Allocate zeroed room for `count` consecutive values
    pub fn allocate(arena: &mut Arena, count: u64) -> Result<Self> {
        Ok(Self::from_address(arena.allocate_array::<T>(count)?))
    }

    /// Allocate one value and initialize it
    pub fn new_in(arena: &mut Arena, value: &T) -> Result<Self> {
        let ptr = Self::allocate(arena, 1)?;
        ptr.write(arena, value)?;
        Ok(ptr)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_null(&self) -> bool {
        self.address.is_null()
    }

    /// Pointer to the `index`-th value after this one
    pub fn at(&self, index: u64) -> Self {
        Self::from_address(self.address.add(index * size_of::<T>() as u64))
    }

    pub fn read(&self, arena: &Arena) -> Result<T> {
        arena.read(self.address)
    }

    pub fn write(&self, arena: &mut Arena, value: &T) -> Result<()> {
        arena.write(self.address, value)
    }

    /// Read-modify-write helper
    pub fn update<F>(&self, arena: &mut Arena, f: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let mut value = self.read(arena)?;
        f(&mut value);
        self.write(arena, &value)?;
        Ok(value)
    }
}
