//! Index: header, sub-stores and id mapping
//!
//! Adding a record is two-phase. [`Index::prepare`] serializes the object
//! and computes its fingerprints, hash and formula without taking any lock,
//! so callers may prepare on many threads. [`Index::insert_prepared`] then
//! takes the write lock only for bookkeeping: append to every store, assign
//! the external id and update both id maps.
//!
//! Records get a dense record number (the byte-buffer slot). External ids
//! map to record numbers through `forward`; `back` maps the other way and
//! holds [`REMOVED_ID`] for removed records.

pub mod header;
pub mod properties;

use crate::core::arena::{read_tag, Arena};
use crate::core::chem::{Chemistry, FingerprintParams, Fingerprints, ObjectKind};
use crate::core::container::{ArenaMap, ArenaVec, Ptr};
use crate::core::error::{ChemdexError, Result};
use crate::core::formula::GrossFormula;
use crate::core::options::IndexOptions;
use crate::core::store::similarity::SimilarityStats;
use crate::core::store::{
    ByteBufferStore, ExactStore, FormulaStore, SimilarityStore, SubstructureStore,
};
use header::{index_tag, parse_tag, IndexHeader, FORMAT_VERSION};
use parking_lot::RwLock;
use properties::Properties;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zerocopy::little_endian::U64;

/// Back-map marker for a removed record
pub const REMOVED_ID: u64 = u64::MAX;

/// Access state of an open index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexState {
    ReadOnly,
    ReadWrite,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub kind: ObjectKind,
    /// Live records
    pub object_count: u64,
    /// Record slots, removed ones included
    pub record_slots: u64,
    pub arena_files: usize,
    pub mapped_bytes: u64,
    pub used_bytes: u64,
    pub substructure_packs: u64,
    pub substructure_increment: u64,
    pub similarity: SimilarityStats,
}

/// Everything computed for a record before the write lock is taken
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    serialized: Vec<u8>,
    fingerprints: Fingerprints,
    hash: u32,
    formula: GrossFormula,
    /// Id read from the `key` property, if configured and present
    property_id: Option<u64>,
}

impl PreparedRecord {
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    pub fn fingerprints(&self) -> &Fingerprints {
        &self.fingerprints
    }

    pub fn formula(&self) -> &GrossFormula {
        &self.formula
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Stores {
    pub objects: ByteBufferStore,
    pub substructure: SubstructureStore,
    pub similarity: SimilarityStore,
    pub exact: ExactStore,
    pub formula: FormulaStore,
    pub forward: ArenaMap,
    pub back: ArenaVec<U64>,
}

impl Stores {
    fn create(arena: &mut Arena, props: &Properties) -> Result<Self> {
        Ok(Stores {
            objects: ByteBufferStore::create(arena, props.byte_block_size)?,
            substructure: SubstructureStore::create(
                arena,
                props.fingerprint.sub_bytes(),
                props.sub_pack_size,
            )?,
            similarity: SimilarityStore::create(
                arena,
                props.fingerprint.sim_bytes(),
                props.similarity,
            )?,
            exact: ExactStore::create(arena, props.hash_buckets)?,
            formula: FormulaStore::create(arena, props.byte_block_size, props.hash_buckets)?,
            forward: ArenaMap::with_buckets(arena, props.hash_buckets)?,
            back: ArenaVec::create(arena)?,
        })
    }

    fn open(arena: &Arena, header: &IndexHeader) -> Result<Self> {
        Ok(Stores {
            objects: ByteBufferStore::open(arena, header.objects)?,
            substructure: SubstructureStore::open(arena, header.substructure)?,
            similarity: SimilarityStore::open(arena, header.similarity)?,
            exact: ExactStore::open(header.exact),
            formula: FormulaStore::open(arena, header.formula)?,
            forward: ArenaMap::open(header.forward),
            back: ArenaVec::open(header.back),
        })
    }

    fn record_in(&self, header: &mut IndexHeader) {
        header.objects = self.objects.address();
        header.substructure = self.substructure.address();
        header.similarity = self.similarity.address();
        header.exact = self.exact.address();
        header.formula = self.formula.address();
        header.forward = self.forward.address();
        header.back = self.back.address();
    }
}

struct Inner {
    arena: Arena,
    header: Ptr<IndexHeader>,
    stores: Stores,
}

impl Inner {
    fn commit(&mut self, record: &PreparedRecord, id: Option<u64>) -> Result<u64> {
        let arena = &mut self.arena;
        let stores = self.stores;
        let mut header = self.header.read(arena)?;

        let id = match id.or(record.property_id) {
            Some(REMOVED_ID) => {
                return Err(ChemdexError::InvalidOption(format!(
                    "id {} is reserved",
                    REMOVED_ID
                )))
            }
            Some(id) => {
                if stores.forward.contains(arena, id)? {
                    return Err(ChemdexError::DuplicateId(id));
                }
                id
            }
            None => {
                let mut candidate = header.first_free_id.get();
                while stores.forward.contains(arena, candidate)? {
                    candidate = next_id(candidate)?;
                }
                if candidate == REMOVED_ID {
                    return Err(ChemdexError::IdsExhausted);
                }
                candidate
            }
        };

        let number = stores.objects.add(arena, &record.serialized)?;
        stores.substructure.add(arena, &record.fingerprints.sub)?;
        stores.similarity.add(arena, number, &record.fingerprints.sim)?;
        stores.exact.add(arena, record.hash, number)?;
        let formula_number = stores.formula.add(arena, &record.formula)?;
        let back_number = stores.back.push(arena, &U64::new(id))?;
        if formula_number != number || back_number != number {
            return Err(ChemdexError::Corrupted(format!(
                "store record numbers diverged ({}, {}, {})",
                number, formula_number, back_number
            )));
        }
        stores.forward.add(arena, id, number)?;

        header.object_count = U64::new(header.object_count.get() + 1);
        if id == header.first_free_id.get() {
            header.first_free_id = U64::new(next_id(id)?);
        }
        self.header.write(arena, &header)?;
        Ok(id)
    }

    /// `hash_of` recomputes the structural hash from the stored bytes; it
    /// runs before anything is modified
    fn remove<H>(&mut self, id: u64, hash_of: H) -> Result<()>
    where
        H: FnOnce(&[u8]) -> Result<u32>,
    {
        let arena = &mut self.arena;
        let stores = self.stores;
        let number = stores
            .forward
            .get(arena, id)?
            .ok_or(ChemdexError::NotFound(id))?;
        let hash = match stores.objects.get(arena, number)? {
            Some(bytes) => hash_of(bytes)?,
            None => {
                return Err(ChemdexError::Corrupted(format!(
                    "id {} maps to removed record {}",
                    id, number
                )))
            }
        };

        stores.forward.remove_pair(arena, id, number)?;
        stores.objects.remove(arena, number)?;
        stores.back.set(arena, number, &U64::new(REMOVED_ID))?;
        stores.exact.remove(arena, hash, number)?;
        stores.formula.remove(arena, number)?;
        self.header
            .update(arena, |h| h.object_count = U64::new(h.object_count.get() - 1))?;
        Ok(())
    }
}

fn next_id(id: u64) -> Result<u64> {
    id.checked_add(1).ok_or(ChemdexError::IdsExhausted)
}

/// Read access to an open index, handed to matchers for one step
pub(crate) struct IndexView<'a> {
    pub arena: &'a Arena,
    pub stores: &'a Stores,
}

impl<'a> IndexView<'a> {
    /// Record slots, removed ones included
    pub fn record_count(&self) -> Result<u64> {
        self.stores.objects.len(self.arena)
    }

    /// External id of a live record
    pub fn external_id(&self, number: u64) -> Result<Option<u64>> {
        let id = self.stores.back.get(self.arena, number)?.get();
        Ok((id != REMOVED_ID).then_some(id))
    }

    pub fn is_live(&self, number: u64) -> Result<bool> {
        Ok(self.external_id(number)?.is_some())
    }

    /// External id and serialized bytes of a live record
    pub fn live_record(&self, number: u64) -> Result<Option<(u64, Vec<u8>)>> {
        let Some(id) = self.external_id(number)? else {
            return Ok(None);
        };
        Ok(self
            .stores
            .objects
            .get(self.arena, number)?
            .map(|bytes| (id, bytes.to_vec())))
    }
}

/// A chemical structure index stored in one arena directory
pub struct Index<C: Chemistry> {
    chemistry: Arc<C>,
    location: PathBuf,
    properties: Properties,
    read_only: bool,
    generation: AtomicU64,
    inner: RwLock<Option<Inner>>,
}

impl<C: Chemistry> Index<C> {
    /// Create a new index in `location`
    pub fn create<P: AsRef<Path>>(
        chemistry: Arc<C>,
        location: P,
        kind: ObjectKind,
        fingerprint: FingerprintParams,
        options: &IndexOptions,
    ) -> Result<Self> {
        let location = location.as_ref();
        options.validate()?;
        if options.read_only {
            return Err(ChemdexError::InvalidOption(
                "a new index cannot be created read-only".to_string(),
            ));
        }
        if location.join(crate::core::arena::storage_file_name(0)).exists() {
            return Err(ChemdexError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("an index already exists at {:?}", location),
            )));
        }

        let mut arena = Arena::create(
            location,
            options.min_mmf_size,
            options.max_mmf_size,
            index_tag(kind),
        )?;
        let properties = Properties::new(kind, fingerprint, options);

        let header_ptr = Ptr::<IndexHeader>::allocate(&mut arena, 1)?;
        let stores = Stores::create(&mut arena, &properties)?;
        let mut header = header_ptr.read(&arena)?;
        stores.record_in(&mut header);
        properties.store(&mut arena, &mut header)?;
        header_ptr.write(&mut arena, &header)?;
        arena.set_root(header_ptr.address())?;

        info!(
            "Created {} index at {:?} (sub {} bytes, sim {} bytes, {})",
            kind,
            location,
            fingerprint.sub_bytes(),
            fingerprint.sim_bytes(),
            properties.metric
        );

        Ok(Index {
            chemistry,
            location: location.to_path_buf(),
            properties,
            read_only: false,
            generation: AtomicU64::new(1),
            inner: RwLock::new(Some(Inner {
                arena,
                header: header_ptr,
                stores,
            })),
        })
    }

    /// Open an existing index of `kind`
    ///
    /// Only `read_only` is taken from `options`; everything else was fixed
    /// at creation.
    pub fn load<P: AsRef<Path>>(
        chemistry: Arc<C>,
        location: P,
        kind: ObjectKind,
        options: &IndexOptions,
    ) -> Result<Self> {
        let location = location.as_ref();
        if !location.is_dir() {
            return Err(ChemdexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no index directory at {:?}", location),
            )));
        }

        let (version, found) = parse_tag(&read_tag(location)?)?;
        if version != FORMAT_VERSION {
            return Err(ChemdexError::VersionMismatch {
                found: version,
                expected: FORMAT_VERSION.to_string(),
            });
        }
        if found != kind {
            return Err(ChemdexError::TypeMismatch {
                found: found.to_string(),
                expected: kind.to_string(),
            });
        }

        let arena = Arena::load(location, options.read_only)?;
        let root = arena.root()?;
        if root.is_null() {
            return Err(ChemdexError::Corrupted(
                "arena has no index header".to_string(),
            ));
        }
        let header_ptr = Ptr::<IndexHeader>::from_address(root);
        let header = header_ptr.read(&arena)?;
        let properties = Properties::load(&arena, &header)?;
        if properties.kind != kind {
            return Err(ChemdexError::TypeMismatch {
                found: properties.kind.to_string(),
                expected: kind.to_string(),
            });
        }
        let stores = Stores::open(&arena, &header)?;

        info!(
            "Loaded {} index at {:?} ({} records, {})",
            kind,
            location,
            header.object_count.get(),
            if options.read_only { "read-only" } else { "read-write" }
        );

        Ok(Index {
            chemistry,
            location: location.to_path_buf(),
            properties,
            read_only: options.read_only,
            generation: AtomicU64::new(1),
            inner: RwLock::new(Some(Inner {
                arena,
                header: header_ptr,
                stores,
            })),
        })
    }

    /// Classify an index directory without mapping it
    pub fn determine_type<P: AsRef<Path>>(location: P) -> Result<ObjectKind> {
        let (_, kind) = parse_tag(&read_tag(location)?)?;
        Ok(kind)
    }

    pub fn chemistry(&self) -> &Arc<C> {
        &self.chemistry
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn kind(&self) -> ObjectKind {
        self.properties.kind
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn fingerprint_params(&self) -> FingerprintParams {
        self.properties.fingerprint
    }

    pub fn state(&self) -> IndexState {
        if self.inner.read().is_none() {
            IndexState::Closed
        } else if self.read_only {
            IndexState::ReadOnly
        } else {
            IndexState::ReadWrite
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Bumped by [`Index::close`]; handles from an older generation are stale
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn check_generation(&self, generation: u64) -> Result<()> {
        if self.generation() != generation {
            return Err(ChemdexError::StaleHandle);
        }
        Ok(())
    }

    /// Run `f` against a read-locked view of the index
    pub(crate) fn view<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&IndexView<'_>) -> Result<R>,
    {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or(ChemdexError::Closed)?;
        f(&IndexView {
            arena: &inner.arena,
            stores: &inner.stores,
        })
    }

    fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Inner) -> Result<R>,
    {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(ChemdexError::Closed)?;
        if self.read_only {
            return Err(ChemdexError::ReadOnly);
        }
        f(inner)
    }

    /// Compute everything needed to store `object`; takes no lock
    ///
    /// `similarity` replaces the computed similarity fingerprint.
    pub fn prepare(&self, object: &C::Object, similarity: Option<&[u8]>) -> Result<PreparedRecord> {
        let kind = self.kind();
        let params = self.properties.fingerprint;
        let mut fingerprints = self.chemistry.fingerprints(kind, object, &params)?;
        if let Some(external) = similarity {
            fingerprints.sim = external.to_vec();
        }
        if fingerprints.sub.len() != params.sub_bytes() || fingerprints.sim.len() != params.sim_bytes() {
            return Err(ChemdexError::Chemistry(format!(
                "fingerprints are {}/{} bytes, index expects {}/{}",
                fingerprints.sub.len(),
                fingerprints.sim.len(),
                params.sub_bytes(),
                params.sim_bytes()
            )));
        }

        let formula = GrossFormula::parse(&self.chemistry.gross_formula(kind, object)?)?;

        let property_id = match &self.properties.id_key {
            Some(key) => match self.chemistry.property(kind, object, key) {
                Some(value) => Some(value.trim().parse::<u64>().map_err(|_| {
                    ChemdexError::InvalidOption(format!(
                        "property '{}' holds '{}', not an id",
                        key, value
                    ))
                })?),
                None => None,
            },
            None => None,
        };

        Ok(PreparedRecord {
            serialized: self.chemistry.serialize(kind, object)?,
            fingerprints,
            hash: self.chemistry.structural_hash(kind, object)?,
            formula,
            property_id,
        })
    }

    /// Commit a prepared record; `id` wins over an id from the `key` property
    pub fn insert_prepared(&self, record: &PreparedRecord, id: Option<u64>) -> Result<u64> {
        let id = self.write(|inner| inner.commit(record, id))?;
        debug!("Inserted record {} into {:?}", id, self.location);
        Ok(id)
    }

    pub fn insert(&self, object: &C::Object, id: Option<u64>) -> Result<u64> {
        let record = self.prepare(object, None)?;
        self.insert_prepared(&record, id)
    }

    /// Insert with a caller-computed similarity fingerprint
    pub fn insert_with_fingerprint(
        &self,
        object: &C::Object,
        id: Option<u64>,
        similarity: &[u8],
    ) -> Result<u64> {
        let record = self.prepare(object, Some(similarity))?;
        self.insert_prepared(&record, id)
    }

    /// Insert many records, preparing them on worker threads
    ///
    /// Records are committed in input order; ids are auto-assigned unless
    /// the `key` property supplies them. Stops at the first failure.
    pub fn insert_batch(&self, objects: &[C::Object]) -> Result<Vec<u64>>
    where
        C::Object: Sync,
    {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(objects.len());
        let chunk = (objects.len() + workers - 1) / workers;

        let worker_panic = || ChemdexError::Chemistry("record preparation panicked".to_string());
        let batches = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = objects
                .chunks(chunk)
                .map(|part| {
                    scope.spawn(move |_| {
                        part.iter()
                            .map(|object| self.prepare(object, None))
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        })
        .map_err(|_| worker_panic())?;

        let mut ids = Vec::with_capacity(objects.len());
        for batch in batches {
            for record in batch.map_err(|_| worker_panic())?? {
                ids.push(self.insert_prepared(&record, None)?);
            }
        }
        info!("Inserted batch of {} records into {:?}", ids.len(), self.location);
        Ok(ids)
    }

    /// Tombstone a record; its slot and fingerprints stay in place
    pub fn remove(&self, id: u64) -> Result<()> {
        let kind = self.kind();
        let chemistry = &self.chemistry;
        self.write(|inner| {
            inner.remove(id, |bytes| {
                let object = chemistry.deserialize(kind, bytes)?;
                chemistry.structural_hash(kind, &object)
            })
        })?;
        debug!("Removed record {} from {:?}", id, self.location);
        Ok(())
    }

    /// Serialized bytes of a live record
    pub fn get_object_cf(&self, id: u64) -> Result<Vec<u8>> {
        self.view(|view| {
            let number = view
                .stores
                .forward
                .get(view.arena, id)?
                .ok_or(ChemdexError::NotFound(id))?;
            view.stores
                .objects
                .get(view.arena, number)?
                .map(<[u8]>::to_vec)
                .ok_or(ChemdexError::NotFound(id))
        })
    }

    pub fn get_object(&self, id: u64) -> Result<C::Object> {
        let bytes = self.get_object_cf(id)?;
        self.chemistry.deserialize(self.kind(), &bytes)
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        self.view(|view| view.stores.forward.contains(view.arena, id))
    }

    pub fn object_count(&self) -> Result<u64> {
        self.view(|view| {
            let header_address = view.arena.root()?;
            let header: IndexHeader = view.arena.read(header_address)?;
            Ok(header.object_count.get())
        })
    }

    /// Turn pending similarity buffers into trees
    pub fn optimize(&self) -> Result<()> {
        let built = self.write(|inner| inner.stores.similarity.optimize(&mut inner.arena))?;
        info!("Optimized {:?}: built {} similarity trees", self.location, built);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.view(|view| view.arena.flush())
    }

    /// Flush and unmap; later calls fail with `Closed`, matchers with `StaleHandle`
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let Some(inner) = guard.take() else {
            return Ok(());
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        let flushed = if self.read_only { Ok(()) } else { inner.arena.flush() };
        drop(inner);
        match &flushed {
            Ok(()) => info!("Closed index at {:?}", self.location),
            Err(e) => warn!("Closed index at {:?} with flush error: {}", self.location, e),
        }
        flushed
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let kind = self.kind();
        self.view(|view| {
            let header: IndexHeader = view.arena.read(view.arena.root()?)?;
            let sub = view.stores.substructure;
            Ok(IndexStats {
                kind,
                object_count: header.object_count.get(),
                record_slots: view.record_count()?,
                arena_files: view.arena.file_count(),
                mapped_bytes: view.arena.mapped_bytes(),
                used_bytes: view.arena.used_bytes(),
                substructure_packs: sub.pack_count(view.arena)?,
                substructure_increment: sub.increment_len(view.arena)?,
                similarity: view.stores.similarity.stats(view.arena)?,
            })
        })
    }
}

impl<C: Chemistry> std::fmt::Debug for Index<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("location", &self.location)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}
