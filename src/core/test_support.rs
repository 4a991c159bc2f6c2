//! Shared fixtures for unit tests

use crate::core::options::IndexOptions;

/// Options that keep test arenas small and force every store transition
/// (pack transposition, cells, trees) within a few hundred records
pub(crate) fn small_options() -> IndexOptions {
    let mut options = IndexOptions::default();
    options.min_mmf_size = 1 << 20;
    options.max_mmf_size = 16 << 20;
    options.hash_buckets = 101;
    options.byte_block_size = 16 * 1024;
    options.sub_pack_size = 16;
    options.similarity.small_base_limit = 20;
    options.similarity.cell_build_size = 16;
    options.similarity.max_cells = 4;
    options
}
