//! Structural hash buckets for exact search

use crate::core::arena::{Address, Arena};
use crate::core::container::ArenaMap;
use crate::core::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct ExactStore {
    map: ArenaMap,
}

impl ExactStore {
    pub fn create(arena: &mut Arena, buckets: u64) -> Result<Self> {
        Ok(ExactStore {
            map: ArenaMap::with_buckets(arena, buckets)?,
        })
    }

    pub fn open(address: Address) -> Self {
        ExactStore {
            map: ArenaMap::open(address),
        }
    }

    pub fn address(&self) -> Address {
        self.map.address()
    }

    pub fn add(&self, arena: &mut Arena, hash: u32, record: u64) -> Result<()> {
        self.map.add(arena, hash as u64, record)
    }

    /// Records whose structure hashed to `hash`
    pub fn candidates(&self, arena: &Arena, hash: u32) -> Result<Vec<u64>> {
        self.map.get_all(arena, hash as u64)
    }

    pub fn remove(&self, arena: &mut Arena, hash: u32, record: u64) -> Result<bool> {
        self.map.remove_pair(arena, hash as u64, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arena::header::make_tag;
    use tempfile::TempDir;

    #[test]
    fn test_collisions_keep_every_record() {
        let dir = TempDir::new().unwrap();
        let mut arena = Arena::create(dir.path(), 64 * 1024, 1 << 20, make_tag("T")).unwrap();
        let store = ExactStore::create(&mut arena, 5).unwrap();

        store.add(&mut arena, 0xdead_beef, 1).unwrap();
        store.add(&mut arena, 0xdead_beef, 4).unwrap();
        store.add(&mut arena, 7, 2).unwrap();

        assert_eq!(store.candidates(&arena, 0xdead_beef).unwrap(), vec![1, 4]);
        assert!(store.remove(&mut arena, 0xdead_beef, 1).unwrap());
        assert_eq!(store.candidates(&arena, 0xdead_beef).unwrap(), vec![4]);
        assert!(store.candidates(&arena, 8).unwrap().is_empty());
    }
}
