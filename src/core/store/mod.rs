//! Screening stores
//!
//! Every store is addressed by the same dense record number: the slot
//! index in the byte buffer, assigned in insertion order. All stores of an
//! index receive every record, in the same order.

pub mod byte_buffer;
pub mod entries;
pub mod exact;
pub mod formula;
pub mod similarity;
pub mod substructure;

pub use byte_buffer::ByteBufferStore;
pub use exact::ExactStore;
pub use formula::FormulaStore;
pub use similarity::{SimilarityConfig, SimilarityMetric, SimilarityStore};
pub use substructure::SubstructureStore;
