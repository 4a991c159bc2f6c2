//! Handle-based surface over indexes and searches
//!
//! A [`Session`] hands out numeric database and search ids, the way a host
//! language binding sees them. Every call returns a [`Result`]; the message
//! of the most recent failure is also kept for [`Session::last_error`].

use crate::core::chem::{Chemistry, FingerprintParams, ObjectKind};
use crate::core::error::{ChemdexError, Result};
use crate::core::index::Index;
use crate::core::matcher::{Estimate, Matcher, TimeEstimate};
use crate::core::options::{IndexOptions, SearchOptions};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub type DatabaseId = u64;
pub type SearchId = u64;

struct SearchEntry<C: Chemistry> {
    database: DatabaseId,
    matcher: Matcher<C>,
}

pub struct Session<C: Chemistry> {
    chemistry: Arc<C>,
    fingerprint: FingerprintParams,
    databases: HashMap<DatabaseId, Arc<Index<C>>>,
    searches: HashMap<SearchId, SearchEntry<C>>,
    next_database: DatabaseId,
    next_search: SearchId,
    last_error: Option<String>,
}

impl<C: Chemistry> Session<C> {
    pub fn new(chemistry: C) -> Self {
        Self::with_chemistry(Arc::new(chemistry))
    }

    pub fn with_chemistry(chemistry: Arc<C>) -> Self {
        Session {
            chemistry,
            fingerprint: FingerprintParams::default(),
            databases: HashMap::new(),
            searches: HashMap::new(),
            next_database: 1,
            next_search: 1,
            last_error: None,
        }
    }

    /// Fingerprint sizes for databases created from now on
    pub fn set_fingerprint_params(&mut self, params: FingerprintParams) {
        self.fingerprint = params;
    }

    /// Message of the most recent failed call
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            debug!("Session call failed: {}", e);
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn index(&self, database: DatabaseId) -> Result<Arc<Index<C>>> {
        self.databases
            .get(&database)
            .cloned()
            .ok_or(ChemdexError::UnknownDatabase(database))
    }

    /// Direct access to an open database
    pub fn database(&self, database: DatabaseId) -> Result<Arc<Index<C>>> {
        self.index(database)
    }

    fn register(&mut self, index: Index<C>) -> DatabaseId {
        let id = self.next_database;
        self.next_database += 1;
        self.databases.insert(id, Arc::new(index));
        id
    }

    pub fn create_database<P: AsRef<Path>>(
        &mut self,
        location: P,
        kind: ObjectKind,
        options: &str,
    ) -> Result<DatabaseId> {
        let result = IndexOptions::parse(options).and_then(|options| {
            Index::create(
                Arc::clone(&self.chemistry),
                location.as_ref(),
                kind,
                self.fingerprint,
                &options,
            )
        });
        let index = self.record(result)?;
        let id = self.register(index);
        info!("Session opened database {} at {:?}", id, location.as_ref());
        Ok(id)
    }

    /// Open an existing database; its kind is read from disk
    pub fn load_database<P: AsRef<Path>>(&mut self, location: P, options: &str) -> Result<DatabaseId> {
        let location = location.as_ref();
        let result = IndexOptions::parse(options).and_then(|options| {
            let kind = Index::<C>::determine_type(location)?;
            Index::load(Arc::clone(&self.chemistry), location, kind, &options)
        });
        let index = self.record(result)?;
        let id = self.register(index);
        info!("Session opened database {} at {:?}", id, location);
        Ok(id)
    }

    /// Close a database and drop the searches open on it
    pub fn close_database(&mut self, database: DatabaseId) -> Result<()> {
        let result = match self.databases.remove(&database) {
            Some(index) => {
                let before = self.searches.len();
                self.searches.retain(|_, entry| entry.database != database);
                let dropped = before - self.searches.len();
                if dropped > 0 {
                    debug!("Dropped {} searches of database {}", dropped, database);
                }
                index.close()
            }
            None => Err(ChemdexError::UnknownDatabase(database)),
        };
        self.record(result)
    }

    pub fn insert_record(
        &mut self,
        database: DatabaseId,
        object: &C::Object,
        id: Option<u64>,
        similarity_fingerprint: Option<&[u8]>,
    ) -> Result<u64> {
        let result = self.index(database).and_then(|index| match similarity_fingerprint {
            Some(fp) => index.insert_with_fingerprint(object, id, fp),
            None => index.insert(object, id),
        });
        self.record(result)
    }

    pub fn delete_record(&mut self, database: DatabaseId, id: u64) -> Result<()> {
        let result = self.index(database).and_then(|index| index.remove(id));
        self.record(result)
    }

    pub fn get_record(&mut self, database: DatabaseId, id: u64) -> Result<C::Object> {
        let result = self.index(database).and_then(|index| index.get_object(id));
        self.record(result)
    }

    fn start<F>(&mut self, database: DatabaseId, options: &str, build: F) -> Result<SearchId>
    where
        F: FnOnce(Arc<Index<C>>, &SearchOptions) -> Result<Matcher<C>>,
    {
        let result = self.index(database).and_then(|index| {
            let options = SearchOptions::parse(options)?;
            build(index, &options)
        });
        let matcher = self.record(result)?;
        let id = self.next_search;
        self.next_search += 1;
        debug!(
            "Started {} search {} on database {}",
            matcher.search_type(),
            id,
            database
        );
        self.searches.insert(id, SearchEntry { database, matcher });
        Ok(id)
    }

    pub fn search_substructure(
        &mut self,
        database: DatabaseId,
        query: C::Query,
        options: &str,
    ) -> Result<SearchId> {
        self.start(database, options, |index, options| {
            Matcher::substructure(index, query, options)
        })
    }

    pub fn search_exact(
        &mut self,
        database: DatabaseId,
        query: C::Object,
        options: &str,
    ) -> Result<SearchId> {
        self.start(database, options, |index, options| {
            Matcher::exact(index, query, options)
        })
    }

    pub fn search_similarity(
        &mut self,
        database: DatabaseId,
        query: &C::Object,
        min: f64,
        max: f64,
        options: &str,
    ) -> Result<SearchId> {
        self.start(database, options, |index, options| {
            Matcher::similarity(index, query, min, max, options)
        })
    }

    pub fn search_top_n(
        &mut self,
        database: DatabaseId,
        query: &C::Object,
        limit: usize,
        min: f64,
        options: &str,
    ) -> Result<SearchId> {
        self.start(database, options, |index, options| {
            Matcher::top_n(index, query, limit, min, options)
        })
    }

    pub fn search_formula(
        &mut self,
        database: DatabaseId,
        query: &str,
        options: &str,
    ) -> Result<SearchId> {
        self.start(database, options, |index, options| {
            Matcher::formula(index, query, options)
        })
    }

    pub fn enumerate(&mut self, database: DatabaseId, options: &str) -> Result<SearchId> {
        self.start(database, options, |index, options| {
            Matcher::enumerate(index, options)
        })
    }

    fn with_search<T, F>(&mut self, search: SearchId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Matcher<C>) -> Result<T>,
    {
        let result = match self.searches.get_mut(&search) {
            Some(entry) => f(&mut entry.matcher),
            None => Err(ChemdexError::UnknownSearch(search)),
        };
        self.record(result)
    }

    pub fn next(&mut self, search: SearchId) -> Result<bool> {
        self.with_search(search, |m| m.next())
    }

    pub fn current_id(&mut self, search: SearchId) -> Result<u64> {
        self.with_search(search, |m| m.current_id())
    }

    pub fn current_object(&mut self, search: SearchId) -> Result<C::Object> {
        self.with_search(search, |m| m.current_object())
    }

    pub fn current_similarity(&mut self, search: SearchId) -> Result<f64> {
        self.with_search(search, |m| m.current_similarity())
    }

    pub fn estimate_remaining_results(&mut self, search: SearchId) -> Result<Estimate> {
        self.with_search(search, |m| Ok(m.estimate_remaining_results()))
    }

    pub fn estimate_remaining_time(&mut self, search: SearchId) -> Result<TimeEstimate> {
        self.with_search(search, |m| Ok(m.estimate_remaining_time()))
    }

    pub fn end_search(&mut self, search: SearchId) -> Result<()> {
        let result = match self.searches.remove(&search) {
            Some(entry) => {
                debug!("Ended search {} on database {}", search, entry.database);
                Ok(())
            }
            None => Err(ChemdexError::UnknownSearch(search)),
        };
        self.record(result)
    }

    /// Searches still registered against `database`
    pub fn open_searches(&self, database: DatabaseId) -> usize {
        self.searches
            .values()
            .filter(|entry| entry.database == database)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chem::fragment::{FragmentChemistry, FragmentQuery, FragmentStructure};
    use tempfile::TempDir;

    const SMALL: &str = "min_mmf_size:1;max_mmf_size:16;hash_buckets:101";

    fn session() -> Session<FragmentChemistry> {
        let mut session = Session::new(FragmentChemistry);
        session.set_fingerprint_params(FingerprintParams::new(2, 1).unwrap());
        session
    }

    #[test]
    fn test_database_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let mut session = session();

        let db = session
            .create_database(&path, ObjectKind::Molecule, SMALL)
            .unwrap();
        let mol = FragmentStructure::new("C2H6", [1, 2]);
        let id = session.insert_record(db, &mol, None, None).unwrap();
        assert_eq!(session.get_record(db, id).unwrap(), mol);
        session.close_database(db).unwrap();

        let db = session.load_database(&path, "read_only:true").unwrap();
        assert_eq!(session.get_record(db, id).unwrap(), mol);
        assert!(session.delete_record(db, id).is_err());
        assert_eq!(session.last_error(), Some("Index is read-only"));
    }

    #[test]
    fn test_search_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut session = session();
        let db = session
            .create_database(dir.path().join("db"), ObjectKind::Molecule, SMALL)
            .unwrap();
        for i in 0..10u32 {
            session
                .insert_record(db, &FragmentStructure::new("CH4", [i, 50]), Some(i as u64), None)
                .unwrap();
        }

        let search = session
            .search_substructure(db, FragmentQuery::new([3, 50]), "")
            .unwrap();
        assert_eq!(session.open_searches(db), 1);
        assert!(session.next(search).unwrap());
        assert_eq!(session.current_id(search).unwrap(), 3);
        assert_eq!(
            session.current_object(search).unwrap().fragments.len(),
            2
        );
        assert!(session.current_similarity(search).is_err());
        assert!(!session.next(search).unwrap());
        assert_eq!(session.estimate_remaining_results(search).unwrap().value, 0.0);
        session.end_search(search).unwrap();

        assert!(matches!(
            session.next(search),
            Err(ChemdexError::UnknownSearch(_))
        ));
        assert_eq!(session.last_error(), Some("Unknown search id: 1"));
    }

    #[test]
    fn test_close_drops_searches() {
        let dir = TempDir::new().unwrap();
        let mut session = session();
        let db = session
            .create_database(dir.path().join("db"), ObjectKind::Molecule, SMALL)
            .unwrap();
        session
            .insert_record(db, &FragmentStructure::new("CH4", [1]), None, None)
            .unwrap();

        let other = session
            .create_database(dir.path().join("other"), ObjectKind::Molecule, SMALL)
            .unwrap();
        let search = session.enumerate(db, "").unwrap();
        let kept = session.enumerate(other, "").unwrap();
        assert_eq!(session.open_searches(db), 1);

        session.close_database(db).unwrap();
        assert_eq!(session.open_searches(db), 0);
        assert!(matches!(
            session.next(search),
            Err(ChemdexError::UnknownSearch(_))
        ));
        assert!(!session.next(kept).unwrap());
        assert!(matches!(
            session.insert_record(db, &FragmentStructure::new("C", [2]), None, None),
            Err(ChemdexError::UnknownDatabase(_))
        ));
    }

    #[test]
    fn test_bad_options_reported() {
        let dir = TempDir::new().unwrap();
        let mut session = session();
        assert!(session
            .create_database(dir.path().join("db"), ObjectKind::Molecule, "colour:blue")
            .is_err());
        assert!(session.last_error().unwrap().contains("colour"));

        let db = session
            .create_database(dir.path().join("db2"), ObjectKind::Reaction, SMALL)
            .unwrap();
        let query = FragmentStructure::new("C", [1]);
        assert!(session
            .search_similarity(db, &query, 0.5, 1.0, "part:0/2")
            .is_err());
        assert!(session.search_top_n(db, &query, 3, 0.0, "part:1/2").is_err());
        assert!(session.search_formula(db, ">= C2", "").is_ok());
    }
}
