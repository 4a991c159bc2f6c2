//! Multibit tree over similarity fingerprints
//!
//! Each internal node stores a set of bit positions chosen from its members.
//! Members having any of those bits go to the `ones` child, the rest to the
//! `zeros` child. Walking down, the search accumulates two counts that bound
//! the coefficient of every target below a node:
//!
//! * `missing_query`: query bits known absent from the targets (going to
//!   `zeros` adds every selected bit the query has);
//! * `extra_target`: target bits known absent from the query (going to
//!   `ones` when the query has none of the selected bits adds one).

use super::{common_bits, entry_fp, entry_id, popcount, SimQuery, SimWindow};
use crate::core::arena::{Address, Arena};
use crate::core::container::Ptr;
use crate::core::error::{ChemdexError, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Nodes with this many members or fewer become leaves
pub const LEAF_SIZE: usize = 32;

pub const MAX_DEPTH: usize = 32;

const LEAF: u32 = 0;
const SPLIT: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeRecord {
    kind: U32,
    count: U32,
    ones: Address,
    zeros: Address,
    data: Address,
}

/// Build a tree over `entries` (concatenated `[id][fp]` records) and return its root
pub fn build(arena: &mut Arena, entries: &[u8], entry_size: usize) -> Result<Address> {
    let count = entries.len() / entry_size;
    let fp_bits = (entry_size - 8) * 8;
    let members: Vec<usize> = (0..count).collect();
    let mut used = vec![false; fp_bits];
    build_node(arena, entries, entry_size, &members, &mut used, 0)
}

fn build_node(
    arena: &mut Arena,
    entries: &[u8],
    entry_size: usize,
    members: &[usize],
    used: &mut [bool],
    depth: usize,
) -> Result<Address> {
    if members.len() <= LEAF_SIZE || depth >= MAX_DEPTH {
        return write_leaf(arena, entries, entry_size, members);
    }

    let entry = |m: usize| &entries[m * entry_size..(m + 1) * entry_size];
    let n = members.len();
    let mut weights = vec![0u32; used.len()];
    for &m in members {
        let fp = entry_fp(entry(m));
        for (bit, weight) in weights.iter_mut().enumerate() {
            if fp[bit / 8] & (1 << (bit % 8)) != 0 {
                *weight += 1;
            }
        }
    }

    // Rarest usable bits first, until about half the members have one of them
    let mut candidates: Vec<usize> = (0..weights.len())
        .filter(|&bit| !used[bit] && weights[bit] > 0 && (weights[bit] as usize) < n)
        .collect();
    candidates.sort_by_key(|&bit| (weights[bit], bit));

    let mut selected = Vec::new();
    let mut none_set = 1.0f64;
    for bit in candidates {
        selected.push(bit);
        none_set *= 1.0 - weights[bit] as f64 / n as f64;
        if none_set < 0.5 {
            break;
        }
    }
    if selected.is_empty() {
        return write_leaf(arena, entries, entry_size, members);
    }

    let (ones, zeros): (Vec<usize>, Vec<usize>) = members.iter().partition(|&&m| {
        let fp = entry_fp(entry(m));
        selected.iter().any(|&bit| fp[bit / 8] & (1 << (bit % 8)) != 0)
    });
    if ones.is_empty() || zeros.is_empty() {
        return write_leaf(arena, entries, entry_size, members);
    }

    for &bit in &selected {
        used[bit] = true;
    }
    let ones_root = build_node(arena, entries, entry_size, &ones, used, depth + 1)?;
    let zeros_root = build_node(arena, entries, entry_size, &zeros, used, depth + 1)?;
    for &bit in &selected {
        used[bit] = false;
    }

    let bits: Vec<U16> = selected.iter().map(|&b| U16::new(b as u16)).collect();
    let data = arena.store_bytes(bits.as_slice().as_bytes())?;
    let node = Ptr::new_in(
        arena,
        &NodeRecord {
            kind: U32::new(SPLIT),
            count: U32::new(selected.len() as u32),
            ones: ones_root,
            zeros: zeros_root,
            data,
        },
    )?;
    Ok(node.address())
}

fn write_leaf(
    arena: &mut Arena,
    entries: &[u8],
    entry_size: usize,
    members: &[usize],
) -> Result<Address> {
    let mut data = Vec::with_capacity(members.len() * entry_size);
    for &m in members {
        data.extend_from_slice(&entries[m * entry_size..(m + 1) * entry_size]);
    }
    let data = arena.store_bytes(&data)?;
    let node = Ptr::new_in(
        arena,
        &NodeRecord {
            kind: U32::new(LEAF),
            count: U32::new(members.len() as u32),
            ones: Address::NULL,
            zeros: Address::NULL,
            data,
        },
    )?;
    Ok(node.address())
}

/// Append every `(id, similarity)` under `root` that falls in `window`
///
/// `min_bits..=max_bits` is the bit-count range of the cell the tree
/// belongs to. Subtrees whose bound cannot reach `window.min` are skipped.
#[allow(clippy::too_many_arguments)]
pub fn search(
    arena: &Arena,
    root: Address,
    entry_size: usize,
    query: &SimQuery<'_>,
    min_bits: u32,
    max_bits: u32,
    window: &SimWindow,
    out: &mut Vec<(u64, f64)>,
) -> Result<()> {
    let mut stack = vec![(root, 0u32, 0u32)];
    while let Some((address, missing_query, extra_target)) = stack.pop() {
        let node: NodeRecord = arena.read(address)?;
        match node.kind.get() {
            LEAF => {
                let count = node.count.get() as usize;
                let data = arena.bytes(node.data, count * entry_size)?;
                for entry in data.chunks_exact(entry_size) {
                    let fp = entry_fp(entry);
                    let sim = query.metric.coefficient(
                        common_bits(query.fp, fp),
                        query.bits,
                        popcount(fp),
                    );
                    if window.contains(sim) {
                        out.push((entry_id(entry), sim));
                    }
                }
            }
            SPLIT => {
                let count = node.count.get() as usize;
                let raw = arena.bytes(node.data, count * 2)?;
                let hits = raw
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
                    .filter(|&bit| query.fp[bit / 8] & (1 << (bit % 8)) != 0)
                    .count() as u32;

                let zeros = (missing_query + hits, extra_target);
                let ones = (missing_query, extra_target + u32::from(hits == 0));
                for (child, (m10, m01)) in [(node.zeros, zeros), (node.ones, ones)] {
                    let bound = query
                        .metric
                        .upper_bound(query.bits, min_bits, max_bits, m10, m01);
                    if window.reachable(bound) {
                        stack.push((child, m10, m01));
                    }
                }
            }
            other => {
                return Err(ChemdexError::Corrupted(format!(
                    "similarity tree node {:?} has kind {}",
                    address, other
                )))
            }
        }
    }
    Ok(())
}

/// Number of entries stored under `root`
pub fn count(arena: &Arena, root: Address) -> Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![root];
    while let Some(address) = stack.pop() {
        let node: NodeRecord = arena.read(address)?;
        if node.kind.get() == LEAF {
            total += node.count.get() as u64;
        } else {
            stack.push(node.ones);
            stack.push(node.zeros);
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::super::SimilarityMetric;
    use super::*;
    use crate::core::arena::header::make_tag;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn make_entries(count: usize, fp_bytes: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut out = Vec::new();
        for id in 0..count as u64 {
            out.extend_from_slice(&id.to_le_bytes());
            for _ in 0..fp_bytes {
                out.push(rng.gen::<u8>() & rng.gen::<u8>());
            }
        }
        out
    }

    #[test]
    fn test_tree_search_matches_brute_force() {
        let dir = TempDir::new().unwrap();
        let mut arena = Arena::create(dir.path(), 1 << 20, 8 << 20, make_tag("T")).unwrap();
        let fp_bytes = 8;
        let entry_size = 8 + fp_bytes;
        let entries = make_entries(500, fp_bytes, 11);
        let root = build(&mut arena, &entries, entry_size).unwrap();
        assert_eq!(count(&arena, root).unwrap(), 500);

        let metric = SimilarityMetric::Tanimoto;
        let query_fp = entry_fp(&entries[17 * entry_size..18 * entry_size]).to_vec();
        let query = SimQuery::new(&query_fp, metric);
        let window = SimWindow::inclusive(0.4, 1.0);

        let mut found = Vec::new();
        search(&arena, root, entry_size, &query, 0, 64, &window, &mut found).unwrap();
        found.sort_by_key(|(id, _)| *id);

        let expected: Vec<u64> = entries
            .chunks_exact(entry_size)
            .filter(|e| {
                let fp = entry_fp(e);
                window.contains(metric.coefficient(common_bits(&query_fp, fp), query.bits, popcount(fp)))
            })
            .map(entry_id)
            .collect();

        assert_eq!(found.iter().map(|(id, _)| *id).collect::<Vec<_>>(), expected);
        assert!(found.iter().any(|(id, sim)| *id == 17 && *sim == 1.0));
    }

    #[test]
    fn test_small_input_is_single_leaf() {
        let dir = TempDir::new().unwrap();
        let mut arena = Arena::create(dir.path(), 1 << 20, 8 << 20, make_tag("T")).unwrap();
        let entries = make_entries(5, 4, 3);
        let root = build(&mut arena, &entries, 12).unwrap();

        let node: NodeRecord = arena.read(root).unwrap();
        assert_eq!(node.kind.get(), LEAF);
        assert_eq!(node.count.get(), 5);
    }
}
