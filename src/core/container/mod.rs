//! Offset-pointer containers built on the arena
//!
//! - [`ptr`] - typed pointer resolved through an explicit arena
//! - [`vec`] - growable block array
//! - [`list`] - doubly linked list (hash bucket chains)
//! - [`map`] - open hash map `u64 -> u64` with tombstoned removal
//!
//! Every container is a small `Copy` handle holding only the address of its
//! persisted header; all state lives in the arena.

pub mod list;
pub mod map;
pub mod ptr;
pub mod vec;

pub use list::ArenaList;
pub use map::ArenaMap;
pub use ptr::Ptr;
pub use vec::ArenaVec;
