//! Similarity fingerprint store
//!
//! Records start in a flat small base. Once it outgrows
//! `small_base_limit` the records move into cells: disjoint, exhaustive
//! ranges of fingerprint bit count. Each cell buffers new records; a full
//! buffer either splits the cell at the median bit count (while the cell
//! has no trees and the cell cap is not reached) or becomes a multibit
//! tree. A split keeps the lower half in the old directory slot and appends
//! the upper half, so a cell's directory index never changes.

pub mod metric;
pub mod tree;

pub use metric::SimilarityMetric;

use crate::core::arena::{Address, Arena};
use crate::core::container::{ArenaVec, Ptr};
use crate::core::error::{ChemdexError, Result};
use crate::core::store::entries::EntryBuffer;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Slack applied when pruning by upper bound
pub const EPSILON: f64 = 1e-9;

const SMALL_BASE_CHUNK: u32 = 1024;

pub fn popcount(bytes: &[u8]) -> u32 {
    bytes.iter().map(|b| b.count_ones()).sum()
}

pub fn common_bits(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x & y).count_ones()).sum()
}

pub(crate) fn entry_id(entry: &[u8]) -> u64 {
    let mut id = [0u8; 8];
    id.copy_from_slice(&entry[..8]);
    u64::from_le_bytes(id)
}

pub(crate) fn entry_fp(entry: &[u8]) -> &[u8] {
    &entry[8..]
}

/// Accepted similarity range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimWindow {
    pub min: f64,
    pub max: f64,
    pub max_exclusive: bool,
}

impl SimWindow {
    pub fn inclusive(min: f64, max: f64) -> Self {
        SimWindow {
            min,
            max,
            max_exclusive: false,
        }
    }

    /// `[min, max)`
    pub fn half_open(min: f64, max: f64) -> Self {
        SimWindow {
            min,
            max,
            max_exclusive: true,
        }
    }

    pub fn contains(&self, sim: f64) -> bool {
        let below_max = if self.max_exclusive {
            sim < self.max
        } else {
            sim <= self.max
        };
        sim >= self.min && below_max
    }

    /// Whether a region with this upper bound may hold a hit
    pub fn reachable(&self, bound: f64) -> bool {
        bound + EPSILON >= self.min
    }
}

/// A similarity query, with its bit count precomputed
#[derive(Debug, Clone, Copy)]
pub struct SimQuery<'a> {
    pub fp: &'a [u8],
    pub bits: u32,
    pub metric: SimilarityMetric,
}

impl<'a> SimQuery<'a> {
    pub fn new(fp: &'a [u8], metric: SimilarityMetric) -> Self {
        SimQuery {
            fp,
            bits: popcount(fp),
            metric,
        }
    }
}

/// Tuning for cell construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    pub small_base_limit: u32,
    pub cell_build_size: u32,
    pub max_cells: u32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        SimilarityConfig {
            small_base_limit: 5_000,
            cell_build_size: 5_000,
            max_cells: 64,
        }
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cell_build_size < 2 || self.max_cells == 0 {
            return Err(ChemdexError::InvalidOption(
                "cell_build_size must be at least 2 and max_cells positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A unit of similarity screening, also the unit of partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimContainer {
    SmallBase,
    Cell(u64),
}

impl SimContainer {
    /// Index used for `part:p/n` assignment
    pub fn partition_index(&self) -> u64 {
        match self {
            SimContainer::SmallBase => 0,
            SimContainer::Cell(i) => *i,
        }
    }
}

/// A container with its bound for one query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedContainer {
    pub container: SimContainer,
    pub bound: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimilarityStats {
    pub records: u64,
    pub small_base: u64,
    pub cells: u64,
    pub trees: u64,
    pub buffered: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct CellRecord {
    min_bits: U32,
    max_bits: U32,
    count: U64,
    buffer: Address,
    trees: Address,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct SimHeader {
    fp_bytes: U32,
    small_base_limit: U32,
    cell_build_size: U32,
    max_cells: U32,
    total: U64,
    small: Address,
    cells: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct SimilarityStore {
    header: Ptr<SimHeader>,
    small: EntryBuffer,
    cells: ArenaVec<CellRecord>,
}

impl SimilarityStore {
    pub fn create(arena: &mut Arena, fp_bytes: usize, config: SimilarityConfig) -> Result<Self> {
        config.validate()?;
        let small = EntryBuffer::create(arena, 8 + fp_bytes, SMALL_BASE_CHUNK)?;
        let cells = ArenaVec::<CellRecord>::with_block_size(arena, 64)?;
        let header = Ptr::new_in(
            arena,
            &SimHeader {
                fp_bytes: U32::new(fp_bytes as u32),
                small_base_limit: U32::new(config.small_base_limit),
                cell_build_size: U32::new(config.cell_build_size),
                max_cells: U32::new(config.max_cells),
                total: U64::new(0),
                small: small.address(),
                cells: cells.address(),
            },
        )?;
        Ok(SimilarityStore {
            header,
            small,
            cells,
        })
    }

    pub fn open(arena: &Arena, address: Address) -> Result<Self> {
        let header = Ptr::<SimHeader>::from_address(address);
        let h = header.read(arena)?;
        Ok(SimilarityStore {
            header,
            small: EntryBuffer::open(h.small),
            cells: ArenaVec::open(h.cells),
        })
    }

    pub fn address(&self) -> Address {
        self.header.address()
    }

    pub fn len(&self, arena: &Arena) -> Result<u64> {
        Ok(self.header.read(arena)?.total.get())
    }

    pub fn is_empty(&self, arena: &Arena) -> Result<bool> {
        Ok(self.len(arena)? == 0)
    }

    pub fn fp_bytes(&self, arena: &Arena) -> Result<usize> {
        Ok(self.header.read(arena)?.fp_bytes.get() as usize)
    }

    fn fp_bits(header: &SimHeader) -> u32 {
        header.fp_bytes.get() * 8
    }

    pub fn add(&self, arena: &mut Arena, id: u64, fp: &[u8]) -> Result<()> {
        let mut header = self.header.read(arena)?;
        if fp.len() != header.fp_bytes.get() as usize {
            return Err(ChemdexError::Chemistry(format!(
                "similarity fingerprint is {} bytes, index expects {}",
                fp.len(),
                header.fp_bytes.get()
            )));
        }
        let mut entry = Vec::with_capacity(8 + fp.len());
        entry.extend_from_slice(&id.to_le_bytes());
        entry.extend_from_slice(fp);

        header.total = U64::new(header.total.get() + 1);
        self.header.write(arena, &header)?;

        if self.cells.is_empty(arena)? {
            self.small.push(arena, &entry)?;
            if self.small.len(arena)? > header.small_base_limit.get() as u64 {
                self.convert_small_base(arena, &header)?;
            }
            return Ok(());
        }
        self.add_to_cells(arena, &header, &entry)
    }

    fn convert_small_base(&self, arena: &mut Arena, header: &SimHeader) -> Result<()> {
        let entry_size = 8 + header.fp_bytes.get() as usize;
        let entries = self.small.read_all(arena)?;
        let cell = self.new_cell(arena, header, 0, Self::fp_bits(header))?;
        self.cells.push(arena, &cell)?;
        self.small.clear(arena)?;

        debug!(
            "Converting similarity small base ({} records) to cells",
            entries.len() / entry_size
        );
        for entry in entries.chunks_exact(entry_size) {
            self.add_to_cells(arena, header, entry)?;
        }
        Ok(())
    }

    fn new_cell(
        &self,
        arena: &mut Arena,
        header: &SimHeader,
        min_bits: u32,
        max_bits: u32,
    ) -> Result<CellRecord> {
        let buffer = EntryBuffer::create(
            arena,
            8 + header.fp_bytes.get() as usize,
            header.cell_build_size.get(),
        )?;
        let trees = ArenaVec::<Address>::with_block_size(arena, 32)?;
        Ok(CellRecord {
            min_bits: U32::new(min_bits),
            max_bits: U32::new(max_bits),
            count: U64::new(0),
            buffer: buffer.address(),
            trees: trees.address(),
        })
    }

    fn add_to_cells(&self, arena: &mut Arena, header: &SimHeader, entry: &[u8]) -> Result<()> {
        let bits = popcount(entry_fp(entry));
        let cells = self.cells.to_vec(arena)?;
        let index = cells
            .iter()
            .position(|c| c.min_bits.get() <= bits && bits <= c.max_bits.get())
            .ok_or_else(|| {
                ChemdexError::Corrupted(format!("no similarity cell covers {} bits", bits))
            })? as u64;

        let mut cell = cells[index as usize];
        let buffer = EntryBuffer::open(cell.buffer);
        buffer.push(arena, entry)?;
        cell.count = U64::new(cell.count.get() + 1);
        self.cells.set(arena, index, &cell)?;

        if buffer.len(arena)? >= header.cell_build_size.get() as u64 {
            self.handle_full_cell(arena, header, index, cells.len() as u32)?;
        }
        Ok(())
    }

    fn handle_full_cell(
        &self,
        arena: &mut Arena,
        header: &SimHeader,
        index: u64,
        cell_count: u32,
    ) -> Result<()> {
        let cell = self.cells.get(arena, index)?;
        let trees = ArenaVec::<Address>::open(cell.trees);
        let buffer = EntryBuffer::open(cell.buffer);
        let entry_size = 8 + header.fp_bytes.get() as usize;
        let entries = buffer.read_all(arena)?;

        if trees.is_empty(arena)? && cell_count < header.max_cells.get() {
            let (min, max) = (cell.min_bits.get(), cell.max_bits.get());
            if let Some(split) = split_point(&entries, entry_size, min, max) {
                return self.split_cell(arena, header, index, cell, &entries, split);
            }
        }

        let root = tree::build(arena, &entries, entry_size)?;
        trees.push(arena, &root)?;
        buffer.clear(arena)?;
        debug!(
            "Built similarity tree in cell {} ({} records)",
            index,
            entries.len() / entry_size
        );
        Ok(())
    }

    fn split_cell(
        &self,
        arena: &mut Arena,
        header: &SimHeader,
        index: u64,
        mut cell: CellRecord,
        entries: &[u8],
        split: u32,
    ) -> Result<()> {
        let entry_size = 8 + header.fp_bytes.get() as usize;
        let mut upper = self.new_cell(arena, header, split + 1, cell.max_bits.get())?;
        let lower_buffer = EntryBuffer::open(cell.buffer);
        let upper_buffer = EntryBuffer::open(upper.buffer);
        lower_buffer.clear(arena)?;

        let (mut lower_count, mut upper_count) = (0u64, 0u64);
        for entry in entries.chunks_exact(entry_size) {
            if popcount(entry_fp(entry)) <= split {
                lower_buffer.push(arena, entry)?;
                lower_count += 1;
            } else {
                upper_buffer.push(arena, entry)?;
                upper_count += 1;
            }
        }

        cell.max_bits = U32::new(split);
        cell.count = U64::new(lower_count);
        upper.count = U64::new(upper_count);
        self.cells.set(arena, index, &cell)?;
        let new_index = self.cells.push(arena, &upper)?;

        debug!(
            "Split similarity cell {} at {} bits ({} / {} records, new cell {})",
            index, split, lower_count, upper_count, new_index
        );
        Ok(())
    }

    /// Turn every non-empty cell buffer into a tree; returns trees built
    pub fn optimize(&self, arena: &mut Arena) -> Result<u64> {
        let header = self.header.read(arena)?;
        let entry_size = 8 + header.fp_bytes.get() as usize;
        let mut built = 0;
        for index in 0..self.cells.len(arena)? {
            let cell = self.cells.get(arena, index)?;
            let buffer = EntryBuffer::open(cell.buffer);
            if buffer.is_empty(arena)? {
                continue;
            }
            let entries = buffer.read_all(arena)?;
            let root = tree::build(arena, &entries, entry_size)?;
            ArenaVec::<Address>::open(cell.trees).push(arena, &root)?;
            buffer.clear(arena)?;
            built += 1;
        }
        Ok(built)
    }

    pub fn container_count(&self, arena: &Arena) -> Result<u64> {
        let cells = self.cells.len(arena)?;
        Ok(if cells == 0 { 1 } else { cells })
    }

    /// Containers that may hold hits for `query`, best-first
    ///
    /// Starts from the cell with the highest bound and steps outward through
    /// neighbouring bit-count ranges, always taking the better of the next
    /// cell on either side.
    pub fn ranked_containers(
        &self,
        arena: &Arena,
        query: &SimQuery<'_>,
        window: &SimWindow,
    ) -> Result<Vec<RankedContainer>> {
        let header = self.header.read(arena)?;
        let cells = self.cells.to_vec(arena)?;
        if cells.is_empty() {
            let bound = query
                .metric
                .upper_bound(query.bits, 0, Self::fp_bits(&header), 0, 0);
            let count = self.small.len(arena)?;
            return Ok(if count > 0 && window.reachable(bound) {
                vec![RankedContainer {
                    container: SimContainer::SmallBase,
                    bound,
                    count,
                }]
            } else {
                Vec::new()
            });
        }

        let mut sorted: Vec<RankedContainer> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| RankedContainer {
                container: SimContainer::Cell(i as u64),
                bound: query.metric.upper_bound(
                    query.bits,
                    c.min_bits.get(),
                    c.max_bits.get(),
                    0,
                    0,
                ),
                count: c.count.get(),
            })
            .collect();
        sorted.sort_by_key(|r| cells[r.container.partition_index() as usize].min_bits.get());

        let first = first_fit(&sorted);
        let mut order = vec![sorted[first]];
        let (mut left, mut right) = (first, first + 1);
        while left > 0 || right < sorted.len() {
            let take_right = match (left > 0, right < sorted.len()) {
                (true, true) => sorted[right].bound >= sorted[left - 1].bound,
                (false, true) => true,
                _ => false,
            };
            if take_right {
                order.push(sorted[right]);
                right += 1;
            } else {
                left -= 1;
                order.push(sorted[left]);
            }
        }

        order.retain(|r| r.count > 0 && window.reachable(r.bound));
        Ok(order)
    }

    /// Append hits of one container
    pub fn search_container(
        &self,
        arena: &Arena,
        container: SimContainer,
        query: &SimQuery<'_>,
        window: &SimWindow,
        out: &mut Vec<(u64, f64)>,
    ) -> Result<()> {
        let header = self.header.read(arena)?;
        let entry_size = 8 + header.fp_bytes.get() as usize;
        if query.fp.len() != header.fp_bytes.get() as usize {
            return Err(ChemdexError::Chemistry(format!(
                "query fingerprint is {} bytes, index expects {}",
                query.fp.len(),
                header.fp_bytes.get()
            )));
        }

        let (buffer, trees, min_bits, max_bits) = match container {
            SimContainer::SmallBase => (self.small, None, 0, Self::fp_bits(&header)),
            SimContainer::Cell(index) => {
                let cell = self.cells.get(arena, index)?;
                (
                    EntryBuffer::open(cell.buffer),
                    Some(ArenaVec::<Address>::open(cell.trees)),
                    cell.min_bits.get(),
                    cell.max_bits.get(),
                )
            }
        };

        let entries = buffer.read_all(arena)?;
        for entry in entries.chunks_exact(entry_size) {
            let fp = entry_fp(entry);
            let sim = query
                .metric
                .coefficient(common_bits(query.fp, fp), query.bits, popcount(fp));
            if window.contains(sim) {
                out.push((entry_id(entry), sim));
            }
        }

        if let Some(trees) = trees {
            for root in trees.to_vec(arena)? {
                tree::search(arena, root, entry_size, query, min_bits, max_bits, window, out)?;
            }
        }
        Ok(())
    }

    pub fn stats(&self, arena: &Arena) -> Result<SimilarityStats> {
        let mut stats = SimilarityStats {
            records: self.len(arena)?,
            small_base: self.small.len(arena)?,
            ..Default::default()
        };
        for cell in self.cells.to_vec(arena)? {
            stats.cells += 1;
            stats.trees += ArenaVec::<Address>::open(cell.trees).len(arena)?;
            stats.buffered += EntryBuffer::open(cell.buffer).len(arena)?;
        }
        Ok(stats)
    }

    /// Bit-count ranges of the cells, by directory index
    pub fn cell_ranges(&self, arena: &Arena) -> Result<Vec<(u32, u32)>> {
        Ok(self
            .cells
            .to_vec(arena)?
            .iter()
            .map(|c| (c.min_bits.get(), c.max_bits.get()))
            .collect())
    }
}

/// Index of the best-bounded container; ties go to the lower bit range
fn first_fit(sorted: &[RankedContainer]) -> usize {
    let mut best = 0;
    for (i, r) in sorted.iter().enumerate() {
        if r.bound > sorted[best].bound {
            best = i;
        }
    }
    best
}

/// Bit count to split at: records with at most this many bits stay low
fn split_point(entries: &[u8], entry_size: usize, min: u32, max: u32) -> Option<u32> {
    if min >= max {
        return None;
    }
    let mut counts: Vec<u32> = entries
        .chunks_exact(entry_size)
        .map(|e| popcount(entry_fp(e)))
        .collect();
    if counts.is_empty() {
        return None;
    }
    counts.sort_unstable();
    let median = counts[counts.len() / 2];
    let (lowest, highest) = (counts[0], counts[counts.len() - 1]);

    if lowest < median {
        Some((median - 1).clamp(min, max - 1))
    } else if highest > median {
        Some(median.clamp(min, max - 1))
    } else {
        None
    }
}
