//! Gross formula store
//!
//! Canonical formula text per record, plus a hash index of the text so
//! equality queries avoid a scan. Range relations (`>=`, `<=`) scan.

use crate::core::arena::{Address, Arena};
use crate::core::container::{ArenaMap, Ptr};
use crate::core::error::Result;
use crate::core::formula::{FormulaQuery, FormulaRelation, GrossFormula};
use crate::core::store::byte_buffer::ByteBufferStore;
use xxhash_rust::xxh3::xxh3_64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FormulaHeader {
    texts: Address,
    by_hash: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct FormulaStore {
    header: Ptr<FormulaHeader>,
    texts: ByteBufferStore,
    by_hash: ArenaMap,
}

fn formula_key(canonical: &str) -> u64 {
    // TOMBSTONE is reserved in the map
    xxh3_64(canonical.as_bytes()) & (u64::MAX >> 1)
}

impl FormulaStore {
    pub fn create(arena: &mut Arena, block_size: u64, buckets: u64) -> Result<Self> {
        let texts = ByteBufferStore::create(arena, block_size)?;
        let by_hash = ArenaMap::with_buckets(arena, buckets)?;
        let header = Ptr::new_in(
            arena,
            &FormulaHeader {
                texts: texts.address(),
                by_hash: by_hash.address(),
            },
        )?;
        Ok(FormulaStore {
            header,
            texts,
            by_hash,
        })
    }

    pub fn open(arena: &Arena, address: Address) -> Result<Self> {
        let header = Ptr::<FormulaHeader>::from_address(address);
        let h = header.read(arena)?;
        Ok(FormulaStore {
            header,
            texts: ByteBufferStore::open(arena, h.texts)?,
            by_hash: ArenaMap::open(h.by_hash),
        })
    }

    pub fn address(&self) -> Address {
        self.header.address()
    }

    pub fn len(&self, arena: &Arena) -> Result<u64> {
        self.texts.len(arena)
    }

    pub fn is_empty(&self, arena: &Arena) -> Result<bool> {
        self.texts.is_empty(arena)
    }

    /// Store the canonical text of the next record's formula
    pub fn add(&self, arena: &mut Arena, formula: &GrossFormula) -> Result<u64> {
        let canonical = formula.to_string();
        let record = self.texts.add(arena, canonical.as_bytes())?;
        self.by_hash.add(arena, formula_key(&canonical), record)?;
        Ok(record)
    }

    /// Drop a removed record's text and hash entry
    pub fn remove(&self, arena: &mut Arena, record: u64) -> Result<()> {
        if let Some(canonical) = self.get(arena, record)? {
            self.by_hash
                .remove_pair(arena, formula_key(&canonical), record)?;
            self.texts.remove(arena, record)?;
        }
        Ok(())
    }

    pub fn get(&self, arena: &Arena, record: u64) -> Result<Option<String>> {
        Ok(self
            .texts
            .get(arena, record)?
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Records that may satisfy `query`; callers verify with [`FormulaQuery::matches`]
    pub fn candidates(&self, arena: &Arena, query: &FormulaQuery) -> Result<Vec<u64>> {
        match query.relation {
            FormulaRelation::Equal => self
                .by_hash
                .get_all(arena, formula_key(&query.formula.to_string())),
            FormulaRelation::AtLeast | FormulaRelation::AtMost => {
                Ok((0..self.texts.len(arena)?).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arena::header::make_tag;
    use tempfile::TempDir;

    #[test]
    fn test_equality_uses_hash_index() {
        let dir = TempDir::new().unwrap();
        let mut arena = Arena::create(dir.path(), 64 * 1024, 1 << 20, make_tag("T")).unwrap();
        let store = FormulaStore::create(&mut arena, 4096, 31).unwrap();

        for text in ["C6H6", "C6H6O", "H6C6"] {
            store
                .add(&mut arena, &GrossFormula::parse(text).unwrap())
                .unwrap();
        }

        let query = FormulaQuery::parse("C6 H6").unwrap();
        assert_eq!(store.candidates(&arena, &query).unwrap(), vec![0, 2]);
        assert_eq!(store.get(&arena, 2).unwrap().unwrap(), "C6 H6");
    }

    #[test]
    fn test_range_relations_scan() {
        let dir = TempDir::new().unwrap();
        let mut arena = Arena::create(dir.path(), 64 * 1024, 1 << 20, make_tag("T")).unwrap();
        let store = FormulaStore::create(&mut arena, 4096, 31).unwrap();
        for f in ["CH4", "C2H6", "C3H8"] {
            store
                .add(&mut arena, &GrossFormula::parse(f).unwrap())
                .unwrap();
        }

        let query = FormulaQuery::parse(">= C2").unwrap();
        let hits: Vec<u64> = store
            .candidates(&arena, &query)
            .unwrap()
            .into_iter()
            .filter(|&r| {
                let text = store.get(&arena, r).unwrap().unwrap();
                query.matches(&GrossFormula::parse(&text).unwrap())
            })
            .collect();
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn test_remove_drops_hash_entry() {
        let dir = TempDir::new().unwrap();
        let mut arena = Arena::create(dir.path(), 64 * 1024, 1 << 20, make_tag("T")).unwrap();
        let store = FormulaStore::create(&mut arena, 4096, 31).unwrap();
        let benzene = GrossFormula::parse("C6H6").unwrap();
        store.add(&mut arena, &benzene).unwrap();
        store.add(&mut arena, &benzene).unwrap();

        store.remove(&mut arena, 0).unwrap();
        store.remove(&mut arena, 0).unwrap();
        let query = FormulaQuery::parse("C6H6").unwrap();
        assert_eq!(store.candidates(&arena, &query).unwrap(), vec![1]);
        assert_eq!(store.get(&arena, 0).unwrap(), None);
        assert_eq!(store.len(&arena).unwrap(), 2);
    }
}
