//! Open hash map from `u64` to `u64`
//!
//! A fixed, prime number of buckets; each bucket is an [`ArenaList`] of
//! fixed-capacity pair blocks. There is no rehashing: buckets only grow by
//! chaining more blocks. Removal overwrites the pair with a tombstone and
//! leaves the slot in place. The map allows several values per key, which
//! the hash-bucket stores rely on.

use crate::core::arena::{Address, Arena};
use crate::core::container::{ArenaList, Ptr};
use crate::core::container::list::ListHeader;
use crate::core::error::{ChemdexError, Result};
use std::mem::size_of;
use xxhash_rust::xxh3::xxh3_64;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const DEFAULT_BUCKETS: u64 = 10_007;
pub const PAIRS_PER_BLOCK: usize = 32;

/// Key/value marker for a removed pair
pub const TOMBSTONE: u64 = u64::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct Pair {
    key: U64,
    value: U64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct PairBlock {
    count: U32,
    reserved: U32,
    pairs: [Pair; PAIRS_PER_BLOCK],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct MapHeader {
    bucket_count: U64,
    buckets: Address,
    len: U64,
}

#[derive(Debug, Clone, Copy)]
pub struct ArenaMap {
    header: Ptr<MapHeader>,
}

impl ArenaMap {
    pub fn create(arena: &mut Arena) -> Result<Self> {
        Self::with_buckets(arena, DEFAULT_BUCKETS)
    }

    pub fn with_buckets(arena: &mut Arena, bucket_count: u64) -> Result<Self> {
        if bucket_count == 0 {
            return Err(ChemdexError::InvalidOption(
                "hash map needs at least one bucket".to_string(),
            ));
        }
        let buckets = arena.allocate_array::<ListHeader>(bucket_count)?;
        let header = Ptr::new_in(
            arena,
            &MapHeader {
                bucket_count: U64::new(bucket_count),
                buckets,
                len: U64::new(0),
            },
        )?;
        Ok(ArenaMap { header })
    }

    pub fn open(address: Address) -> Self {
        ArenaMap {
            header: Ptr::from_address(address),
        }
    }

    pub fn address(&self) -> Address {
        self.header.address()
    }

    /// Number of live pairs
    pub fn len(&self, arena: &Arena) -> Result<u64> {
        Ok(self.header.read(arena)?.len.get())
    }

    pub fn is_empty(&self, arena: &Arena) -> Result<bool> {
        Ok(self.len(arena)? == 0)
    }

    fn bucket(&self, arena: &Arena, key: u64) -> Result<ArenaList<PairBlock>> {
        let header = self.header.read(arena)?;
        let index = xxh3_64(&key.to_le_bytes()) % header.bucket_count.get();
        Ok(ArenaList::open(
            header.buckets.add(index * size_of::<ListHeader>() as u64),
        ))
    }

    pub fn add(&self, arena: &mut Arena, key: u64, value: u64) -> Result<()> {
        if key == TOMBSTONE {
            return Err(ChemdexError::InvalidOption(format!(
                "key {} is reserved",
                key
            )));
        }
        let bucket = self.bucket(arena, key)?;
        let pair = Pair {
            key: U64::new(key),
            value: U64::new(value),
        };

        match bucket.last(arena)? {
            Some(cell) if (bucket.value(arena, cell)?.count.get() as usize) < PAIRS_PER_BLOCK => {
                ArenaList::<PairBlock>::value_ptr(cell).update(arena, |block| {
                    block.pairs[block.count.get() as usize] = pair;
                    block.count = U32::new(block.count.get() + 1);
                })?;
            }
            _ => {
                let mut block = PairBlock::new_zeroed();
                block.pairs[0] = pair;
                block.count = U32::new(1);
                bucket.push_back(arena, &block)?;
            }
        }

        self.header.update(arena, |h| h.len = U64::new(h.len.get() + 1))?;
        Ok(())
    }

    /// First live value stored under `key`
    pub fn get(&self, arena: &Arena, key: u64) -> Result<Option<u64>> {
        let bucket = self.bucket(arena, key)?;
        let mut cursor = bucket.first(arena)?;
        while let Some(cell) = cursor {
            let block = bucket.value(arena, cell)?;
            if let Some(pair) = block.pairs[..block.count.get() as usize]
                .iter()
                .find(|p| p.key.get() == key)
            {
                return Ok(Some(pair.value.get()));
            }
            cursor = bucket.next(arena, cell)?;
        }
        Ok(None)
    }

    /// Every live value stored under `key`, in insertion order
    pub fn get_all(&self, arena: &Arena, key: u64) -> Result<Vec<u64>> {
        let bucket = self.bucket(arena, key)?;
        let mut values = Vec::new();
        let mut cursor = bucket.first(arena)?;
        while let Some(cell) = cursor {
            let block = bucket.value(arena, cell)?;
            values.extend(
                block.pairs[..block.count.get() as usize]
                    .iter()
                    .filter(|p| p.key.get() == key)
                    .map(|p| p.value.get()),
            );
            cursor = bucket.next(arena, cell)?;
        }
        Ok(values)
    }

    pub fn contains(&self, arena: &Arena, key: u64) -> Result<bool> {
        Ok(self.get(arena, key)?.is_some())
    }

    /// Tombstone the first pair under `key`; returns its value
    pub fn remove(&self, arena: &mut Arena, key: u64) -> Result<Option<u64>> {
        self.remove_matching(arena, key, None)
    }

    /// Tombstone the pair `(key, value)`
    pub fn remove_pair(&self, arena: &mut Arena, key: u64, value: u64) -> Result<bool> {
        Ok(self.remove_matching(arena, key, Some(value))?.is_some())
    }

    fn remove_matching(
        &self,
        arena: &mut Arena,
        key: u64,
        value: Option<u64>,
    ) -> Result<Option<u64>> {
        let bucket = self.bucket(arena, key)?;
        let mut cursor = bucket.first(arena)?;
        while let Some(cell) = cursor {
            let mut block = bucket.value(arena, cell)?;
            let count = block.count.get() as usize;
            let hit = block.pairs[..count].iter().position(|p| {
                p.key.get() == key && value.map_or(true, |v| p.value.get() == v)
            });
            if let Some(i) = hit {
                let removed = block.pairs[i].value.get();
                block.pairs[i] = Pair {
                    key: U64::new(TOMBSTONE),
                    value: U64::new(TOMBSTONE),
                };
                bucket.set_value(arena, cell, &block)?;
                self.header.update(arena, |h| h.len = U64::new(h.len.get() - 1))?;
                return Ok(Some(removed));
            }
            cursor = bucket.next(arena, cell)?;
        }
        Ok(None)
    }
}
