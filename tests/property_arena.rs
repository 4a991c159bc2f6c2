//! Property-based tests for arena durability
//!
//! Whatever is written through the arena and its containers must read back
//! identically after the files are flushed, unmapped and mapped again.

use chemdex::core::arena::header::make_tag;
use chemdex::core::arena::{Address, Arena};
use chemdex::core::container::{ArenaMap, ArenaVec};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

const KB: u64 = 1024;

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct Roots {
    values: Address,
    lookup: Address,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_allocations_survive_reload(
        sizes in prop::collection::vec(1usize..200_000, 1..30),
        seed in any::<u8>(),
    ) {
        let dir = TempDir::new().unwrap();
        let mut written = Vec::new();
        {
            let mut arena = Arena::create(dir.path(), 64 * KB, KB * KB, make_tag("prop")).unwrap();
            for (i, &size) in sizes.iter().enumerate() {
                let fill = seed.wrapping_add(i as u8);
                let data: Vec<u8> = (0..size).map(|j| fill.wrapping_add(j as u8)).collect();
                let address = arena.store_bytes(&data).unwrap();
                written.push((address, data));
            }
            // Allocations never overlap
            for (address, data) in &written {
                prop_assert_eq!(arena.bytes(*address, data.len()).unwrap(), &data[..]);
            }
            arena.flush().unwrap();
        }

        let arena = Arena::load(dir.path(), true).unwrap();
        prop_assert!(arena.is_read_only());
        for (address, data) in &written {
            prop_assert_eq!(arena.bytes(*address, data.len()).unwrap(), &data[..]);
        }
    }

    #[test]
    fn prop_containers_survive_reload(
        values in prop::collection::vec(any::<u64>(), 0..400),
        pairs in prop::collection::vec((0u64..50, any::<u64>()), 0..200),
    ) {
        let dir = TempDir::new().unwrap();
        let mut model: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        {
            let mut arena = Arena::create(dir.path(), 64 * KB, 4 * KB * KB, make_tag("prop")).unwrap();
            let vec = ArenaVec::<U64>::with_block_size(&mut arena, 16).unwrap();
            let map = ArenaMap::with_buckets(&mut arena, 7).unwrap();
            for value in &values {
                vec.push(&mut arena, &U64::new(*value)).unwrap();
            }
            for &(key, value) in &pairs {
                map.add(&mut arena, key, value).unwrap();
                model.entry(key).or_default().push(value);
            }

            let roots = Roots { values: vec.address(), lookup: map.address() };
            let root = arena.allocate(std::mem::size_of::<Roots>() as u64).unwrap();
            arena.write(root, &roots).unwrap();
            arena.set_root(root).unwrap();
            arena.flush().unwrap();
        }

        let arena = Arena::load(dir.path(), true).unwrap();
        let roots: Roots = arena.read(arena.root().unwrap()).unwrap();
        let vec = ArenaVec::<U64>::open(roots.values);
        let map = ArenaMap::open(roots.lookup);

        let stored: Vec<u64> = vec.to_vec(&arena).unwrap().iter().map(|v| v.get()).collect();
        prop_assert_eq!(stored, values);
        prop_assert_eq!(map.len(&arena).unwrap(), pairs.len() as u64);
        for (key, expected) in &model {
            let mut found = map.get_all(&arena, *key).unwrap();
            let mut expected = expected.clone();
            found.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(found, expected);
        }
        prop_assert!(!map.contains(&arena, 50).unwrap());
    }
}

#[test]
fn test_reload_rejects_foreign_directory() {
    let dir = TempDir::new().unwrap();
    assert!(Arena::load(dir.path(), false).is_err());
}

#[test]
fn test_oversized_allocation_rejected() {
    let dir = TempDir::new().unwrap();
    let mut arena = Arena::create(dir.path(), 64 * KB, 256 * KB, make_tag("big")).unwrap();
    assert!(arena.allocate(256 * KB).is_err());
    assert!(arena.allocate(128 * KB).is_ok());
    assert!(arena.file_count() >= 2);
}
