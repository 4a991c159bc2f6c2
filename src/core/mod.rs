//! Index engine
//!
//! Leaf to root:
//!
//! - [`arena`] - growable memory-mapped files forming one address space
//! - [`container`] - pointer, array, list and hash map over arena addresses
//! - [`store`] - byte buffer, substructure, similarity, exact and formula stores
//! - [`index`] - header, sub-stores and the external id mapping
//! - [`matcher`] - per-query cursors combining screening and verification
//!
//! [`chem`] is the boundary to the chemistry toolkit that parses, compares
//! and fingerprints structures.

pub mod arena;
pub mod chem;
pub mod container;
pub mod error;
pub mod formula;
pub mod index;
pub mod matcher;
pub mod options;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
