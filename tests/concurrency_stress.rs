//! Concurrent readers/writers stress tests

use chemdex::{
    ChemdexError, FingerprintParams, FragmentChemistry, FragmentQuery, FragmentStructure, Index,
    IndexBuilder, Matcher, SearchOptions,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn stress_index(dir: &TempDir) -> Arc<Index<FragmentChemistry>> {
    Arc::new(
        IndexBuilder::new(FragmentChemistry)
            .path(dir.path().join("stress"))
            .fingerprint(FingerprintParams::new(1, 1).unwrap())
            .file_sizes(1 << 20, 32 << 20)
            .option_string("hash_buckets:1009;sub_pack_size:64;small_base_limit:40;cell_build_size:32")
            .unwrap()
            .create()
            .unwrap(),
    )
}

fn record(i: u64) -> FragmentStructure {
    FragmentStructure::new("C2H6O", [(i % 60) as u32, 61, 62 + (i % 2) as u32])
}

#[test]
fn test_4_writers_8_readers() {
    let dir = TempDir::new().unwrap();
    let index = stress_index(&dir);
    let searches = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..12u64)
        .map(|thread_id| {
            let index = Arc::clone(&index);
            let searches = Arc::clone(&searches);
            std::thread::spawn(move || {
                if thread_id < 4 {
                    // Writer thread: ids are disjoint per writer
                    for i in 0..250 {
                        let id = thread_id * 1000 + i;
                        index.insert(&record(id), Some(id)).unwrap();
                    }
                } else {
                    // Reader thread
                    for round in 0..10 {
                        let screened = round % 2 == 0;
                        let mut matcher = if screened {
                            Matcher::substructure(
                                Arc::clone(&index),
                                FragmentQuery::new([61]),
                                &SearchOptions::default(),
                            )
                            .unwrap()
                        } else {
                            Matcher::similarity(
                                Arc::clone(&index),
                                &record(thread_id),
                                0.5,
                                1.0,
                                &SearchOptions::default(),
                            )
                            .unwrap()
                        };
                        // Similarity cells may split under a running search, so
                        // only the substructure walk is checked for duplicates
                        let mut seen = BTreeSet::new();
                        while matcher.next().unwrap() {
                            let fresh = seen.insert(matcher.current_id().unwrap());
                            assert!(fresh || !screened);
                        }
                        searches.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(searches.load(Ordering::Relaxed), 80);

    // Verify integrity
    assert_eq!(index.object_count().unwrap(), 1000);
    let mut all = Matcher::substructure(
        Arc::clone(&index),
        FragmentQuery::new([61]),
        &SearchOptions::default(),
    )
    .unwrap();
    let mut count = 0;
    while all.next().unwrap() {
        let id = all.current_id().unwrap();
        assert_eq!(all.current_object().unwrap(), record(id));
        count += 1;
    }
    assert_eq!(count, 1000);
}

#[test]
fn test_removal_during_top_n() {
    let dir = TempDir::new().unwrap();
    let index = stress_index(&dir);
    for i in 0..600 {
        index.insert(&record(i), Some(i)).unwrap();
    }
    index.optimize().unwrap();

    let remover = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || {
            for i in (0..600).step_by(2) {
                index.remove(i).unwrap();
            }
        })
    };

    for _ in 0..20 {
        let mut top = Matcher::top_n(
            Arc::clone(&index),
            &record(7),
            25,
            0.0,
            &SearchOptions::default(),
        )
        .unwrap();
        let mut last = f64::INFINITY;
        while top.next().unwrap() {
            let sim = top.current_similarity().unwrap();
            assert!(sim <= last);
            last = sim;
        }
    }
    remover.join().unwrap();
    assert_eq!(index.object_count().unwrap(), 300);
}

#[test]
fn test_close_under_readers() {
    let dir = TempDir::new().unwrap();
    let index = stress_index(&dir);
    for i in 0..400 {
        index.insert(&record(i), Some(i)).unwrap();
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            std::thread::spawn(move || loop {
                let mut matcher = match Matcher::enumerate(
                    Arc::clone(&index),
                    &SearchOptions::default(),
                ) {
                    Ok(matcher) => matcher,
                    Err(ChemdexError::Closed) => return,
                    Err(e) => panic!("unexpected error: {}", e),
                };
                loop {
                    match matcher.next() {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(ChemdexError::StaleHandle) | Err(ChemdexError::Closed) => return,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    std::thread::sleep(std::time::Duration::from_millis(20));
    index.close().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(matches!(index.object_count(), Err(ChemdexError::Closed)));
}
