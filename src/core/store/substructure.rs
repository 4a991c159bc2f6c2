//! Transposed substructure fingerprint store
//!
//! New fingerprints collect in an increment of up to `pack_size` records.
//! When the increment fills it is transposed into a pack: one column of
//! `pack_size / 8` bytes per fingerprint bit, bit `r` of a column set when
//! record `r` of the pack has that fingerprint bit. Screening a pack then
//! means ANDing a few columns instead of testing every record.
//!
//! Per-bit population counts over all records let a query start from its
//! rarest bits.

use crate::core::arena::{Address, Arena};
use crate::core::container::{ArenaVec, Ptr};
use crate::core::error::{ChemdexError, Result};
use tracing::debug;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const DEFAULT_PACK_SIZE: u32 = 4096;

/// Number of query bits ANDed when screening a pack
pub const MAX_SCREEN_BITS: usize = 15;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct SubHeader {
    fp_bytes: U32,
    pack_size: U32,
    total: U64,
    increment_len: U64,
    increment: Address,
    packs: Address,
    bit_counts: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct SubstructureStore {
    header: Ptr<SubHeader>,
    packs: ArenaVec<Address>,
    bit_counts: Ptr<U64>,
}

fn has_bit(bytes: &[u8], bit: usize) -> bool {
    bytes[bit / 8] & (1 << (bit % 8)) != 0
}

/// Positions of the set bits of a fingerprint
pub fn set_bits(bytes: &[u8]) -> Vec<usize> {
    let mut bits = Vec::new();
    for (i, &byte) in bytes.iter().enumerate() {
        let mut b = byte;
        while b != 0 {
            bits.push(i * 8 + b.trailing_zeros() as usize);
            b &= b - 1;
        }
    }
    bits
}

/// `query` bits are all present in `target`
pub fn contains_bits(target: &[u8], query: &[u8]) -> bool {
    target.iter().zip(query).all(|(t, q)| t & q == *q)
}

impl SubstructureStore {
    pub fn create(arena: &mut Arena, fp_bytes: usize, pack_size: u32) -> Result<Self> {
        if fp_bytes == 0 || pack_size == 0 || pack_size % 8 != 0 {
            return Err(ChemdexError::InvalidOption(format!(
                "substructure pack size {} must be a positive multiple of 8",
                pack_size
            )));
        }
        let increment = arena.allocate(pack_size as u64 * fp_bytes as u64)?;
        let packs = ArenaVec::<Address>::with_block_size(arena, 1024)?;
        let bit_counts = Ptr::<U64>::allocate(arena, fp_bytes as u64 * 8)?;
        let header = Ptr::new_in(
            arena,
            &SubHeader {
                fp_bytes: U32::new(fp_bytes as u32),
                pack_size: U32::new(pack_size),
                total: U64::new(0),
                increment_len: U64::new(0),
                increment,
                packs: packs.address(),
                bit_counts: bit_counts.address(),
            },
        )?;
        Ok(SubstructureStore {
            header,
            packs,
            bit_counts,
        })
    }

    pub fn open(arena: &Arena, address: Address) -> Result<Self> {
        let header = Ptr::<SubHeader>::from_address(address);
        let h = header.read(arena)?;
        Ok(SubstructureStore {
            header,
            packs: ArenaVec::open(h.packs),
            bit_counts: Ptr::from_address(h.bit_counts),
        })
    }

    pub fn address(&self) -> Address {
        self.header.address()
    }

    /// Total fingerprints stored
    pub fn len(&self, arena: &Arena) -> Result<u64> {
        Ok(self.header.read(arena)?.total.get())
    }

    pub fn is_empty(&self, arena: &Arena) -> Result<bool> {
        Ok(self.len(arena)? == 0)
    }

    pub fn fp_bytes(&self, arena: &Arena) -> Result<usize> {
        Ok(self.header.read(arena)?.fp_bytes.get() as usize)
    }

    pub fn pack_size(&self, arena: &Arena) -> Result<u64> {
        Ok(self.header.read(arena)?.pack_size.get() as u64)
    }

    pub fn pack_count(&self, arena: &Arena) -> Result<u64> {
        self.packs.len(arena)
    }

    pub fn increment_len(&self, arena: &Arena) -> Result<u64> {
        Ok(self.header.read(arena)?.increment_len.get())
    }

    /// Append the fingerprint of the next record
    pub fn add(&self, arena: &mut Arena, fp: &[u8]) -> Result<()> {
        let mut header = self.header.read(arena)?;
        let fp_bytes = header.fp_bytes.get() as usize;
        if fp.len() != fp_bytes {
            return Err(ChemdexError::Chemistry(format!(
                "substructure fingerprint is {} bytes, index expects {}",
                fp.len(),
                fp_bytes
            )));
        }

        let slot = header.increment.add(header.increment_len.get() * fp_bytes as u64);
        arena.bytes_mut(slot, fp_bytes)?.copy_from_slice(fp);
        for bit in set_bits(fp) {
            self.bit_counts
                .at(bit as u64)
                .update(arena, |n| *n = U64::new(n.get() + 1))?;
        }

        header.increment_len = U64::new(header.increment_len.get() + 1);
        header.total = U64::new(header.total.get() + 1);
        if header.increment_len.get() == header.pack_size.get() as u64 {
            self.transpose_increment(arena, &header)?;
            header.increment_len = U64::new(0);
        }
        self.header.write(arena, &header)
    }

    fn transpose_increment(&self, arena: &mut Arena, header: &SubHeader) -> Result<()> {
        let fp_bytes = header.fp_bytes.get() as usize;
        let pack_size = header.pack_size.get() as usize;
        let column = pack_size / 8;

        let records = arena
            .bytes(header.increment, pack_size * fp_bytes)?
            .to_vec();
        let mut transposed = vec![0u8; fp_bytes * 8 * column];
        for (r, fp) in records.chunks_exact(fp_bytes).enumerate() {
            for bit in set_bits(fp) {
                transposed[bit * column + r / 8] |= 1 << (r % 8);
            }
        }

        let pack = arena.store_bytes(&transposed)?;
        let index = self.packs.push(arena, &pack)?;
        debug!("Transposed substructure pack {} ({} records)", index, pack_size);
        Ok(())
    }

    /// Set bits of `query`, rarest first across the whole store
    pub fn query_bit_order(&self, arena: &Arena, query: &[u8]) -> Result<Vec<usize>> {
        let fp_bytes = self.fp_bytes(arena)?;
        if query.len() != fp_bytes {
            return Err(ChemdexError::Chemistry(format!(
                "query fingerprint is {} bytes, index expects {}",
                query.len(),
                fp_bytes
            )));
        }
        let mut bits: Vec<(u64, usize)> = set_bits(query)
            .into_iter()
            .map(|bit| Ok((self.bit_counts.at(bit as u64).read(arena)?.get(), bit)))
            .collect::<Result<_>>()?;
        bits.sort_unstable();
        Ok(bits.into_iter().map(|(_, bit)| bit).collect())
    }

    /// Record indexes in pack `pack` that have all of `ordered_bits[..15]`
    ///
    /// Columns are ANDed inside a `[left, right]` byte window that shrinks
    /// past zero bytes, so later columns only touch the surviving range.
    pub fn screen_pack(
        &self,
        arena: &Arena,
        pack: u64,
        ordered_bits: &[usize],
    ) -> Result<Vec<u64>> {
        let header = self.header.read(arena)?;
        let pack_size = header.pack_size.get() as u64;
        let column = pack_size as usize / 8;
        let base = pack * pack_size;
        let pack_address = self.packs.get(arena, pack)?;

        let bits = &ordered_bits[..ordered_bits.len().min(MAX_SCREEN_BITS)];
        let Some((&first, rest)) = bits.split_first() else {
            return Ok((base..base + pack_size).collect());
        };

        let column_of = |bit: usize| pack_address.add((bit * column) as u64);
        let mut acc = arena.bytes(column_of(first), column)?.to_vec();
        let (mut left, mut right) = (0usize, column);
        while left < right && acc[left] == 0 {
            left += 1;
        }
        while right > left && acc[right - 1] == 0 {
            right -= 1;
        }

        for &bit in rest {
            let other = arena.bytes(column_of(bit), column)?;
            for i in left..right {
                acc[i] &= other[i];
            }
            while left < right && acc[left] == 0 {
                left += 1;
            }
            while right > left && acc[right - 1] == 0 {
                right -= 1;
            }
            if left == right {
                return Ok(Vec::new());
            }
        }

        let mut candidates = Vec::new();
        for (i, &byte) in acc[left..right].iter().enumerate() {
            let mut b = byte;
            while b != 0 {
                let r = ((left + i) * 8) as u64 + b.trailing_zeros() as u64;
                candidates.push(base + r);
                b &= b - 1;
            }
        }
        Ok(candidates)
    }

    /// Record indexes in the increment whose fingerprints contain `query`
    pub fn screen_increment(&self, arena: &Arena, query: &[u8]) -> Result<Vec<u64>> {
        let header = self.header.read(arena)?;
        let fp_bytes = header.fp_bytes.get() as usize;
        let len = header.increment_len.get() as usize;
        let base = self.packs.len(arena)? * header.pack_size.get() as u64;

        let records = arena.bytes(header.increment, len * fp_bytes)?;
        Ok(records
            .chunks_exact(fp_bytes)
            .enumerate()
            .filter(|(_, fp)| contains_bits(fp, query))
            .map(|(r, _)| base + r as u64)
            .collect())
    }

    /// Fingerprint of a record, reconstructed from its pack if transposed
    pub fn fingerprint(&self, arena: &Arena, index: u64) -> Result<Vec<u8>> {
        let header = self.header.read(arena)?;
        let fp_bytes = header.fp_bytes.get() as usize;
        let pack_size = header.pack_size.get() as u64;
        if index >= header.total.get() {
            return Err(ChemdexError::NotFound(index));
        }

        let pack = index / pack_size;
        let r = (index % pack_size) as usize;
        if pack >= self.packs.len(arena)? {
            let at = header.increment.add(r as u64 * fp_bytes as u64);
            return Ok(arena.bytes(at, fp_bytes)?.to_vec());
        }

        let column = pack_size as usize / 8;
        let pack_address = self.packs.get(arena, pack)?;
        let columns = arena.bytes(pack_address, fp_bytes * 8 * column)?;
        let mut fp = vec![0u8; fp_bytes];
        for bit in 0..fp_bytes * 8 {
            if has_bit(&columns[bit * column..(bit + 1) * column], r) {
                fp[bit / 8] |= 1 << (bit % 8);
            }
        }
        Ok(fp)
    }
}
