//! Property-based tests for search results
//!
//! Every matcher is checked against a brute-force scan of the same records.

use chemdex::{
    FingerprintParams, FragmentChemistry, FragmentQuery, FragmentStructure, Index, IndexBuilder,
    Matcher, SearchOptions, SimilarityMetric,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::TempDir;

const FRAGMENTS: u32 = 64;

fn build_index(dir: &TempDir, records: &[BTreeSet<u32>]) -> Arc<Index<FragmentChemistry>> {
    let index = IndexBuilder::new(FragmentChemistry)
        .path(dir.path().join("db"))
        .fingerprint(FingerprintParams::new(1, 1).unwrap())
        .file_sizes(1 << 20, 16 << 20)
        .option_string("hash_buckets:101;sub_pack_size:16;small_base_limit:10;cell_build_size:8;max_cells:4")
        .unwrap()
        .create()
        .unwrap();
    for (i, fragments) in records.iter().enumerate() {
        index
            .insert(
                &FragmentStructure::new("C", fragments.iter().copied()),
                Some(i as u64),
            )
            .unwrap();
    }
    Arc::new(index)
}

fn drain(mut matcher: Matcher<FragmentChemistry>) -> Vec<(u64, Option<f64>)> {
    let mut out = Vec::new();
    while matcher.next().unwrap() {
        let sim = matcher.current_similarity().ok();
        out.push((matcher.current_id().unwrap(), sim));
    }
    out
}

fn coefficient(metric: SimilarityMetric, query: &BTreeSet<u32>, target: &BTreeSet<u32>) -> f64 {
    let common = query.intersection(target).count() as u32;
    metric.coefficient(common, query.len() as u32, target.len() as u32)
}

fn tanimoto(query: &BTreeSet<u32>, target: &BTreeSet<u32>) -> f64 {
    coefficient(SimilarityMetric::Tanimoto, query, target)
}

fn fragment_set(max_len: usize) -> impl Strategy<Value = BTreeSet<u32>> {
    prop::collection::btree_set(0..FRAGMENTS, 0..max_len)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_substructure_partitions_cover_brute_force(
        records in prop::collection::vec(fragment_set(8), 1..80),
        query in prop::collection::btree_set(0..FRAGMENTS, 1..3),
        parts in 1u64..5,
    ) {
        let dir = TempDir::new().unwrap();
        let index = build_index(&dir, &records);

        let expected: BTreeSet<u64> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| query.is_subset(r))
            .map(|(i, _)| i as u64)
            .collect();

        let mut union = Vec::new();
        for p in 1..=parts {
            let options = SearchOptions::parse(&format!("part:{}/{}", p, parts)).unwrap();
            let matcher = Matcher::substructure(
                Arc::clone(&index),
                FragmentQuery::new(query.iter().copied()),
                &options,
            )
            .unwrap();
            union.extend(drain(matcher).into_iter().map(|(id, _)| id));
        }
        let found: BTreeSet<u64> = union.iter().copied().collect();
        prop_assert_eq!(found.len(), union.len(), "a record appeared in two partitions");
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prop_similarity_matches_brute_force(
        records in prop::collection::vec(fragment_set(12), 1..120),
        query in fragment_set(12),
        min in 0.0f64..1.0,
        optimize in any::<bool>(),
        parts in 1u64..4,
        metric_text in prop::sample::select(vec!["tanimoto", "euclid-sub", "tversky 0.9 0.1", "tversky 0.3 0.7"]),
    ) {
        let metric = SimilarityMetric::parse(metric_text).unwrap();
        let dir = TempDir::new().unwrap();
        let index = build_index(&dir, &records);
        if optimize {
            index.optimize().unwrap();
        }

        let expected: BTreeMap<u64, f64> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i as u64, coefficient(metric, &query, r)))
            .filter(|&(_, s)| s >= min)
            .collect();

        let mut found = BTreeMap::new();
        for p in 1..=parts {
            let options =
                SearchOptions::parse(&format!("part:{}/{};metric:{}", p, parts, metric_text)).unwrap();
            let matcher = Matcher::similarity(
                Arc::clone(&index),
                &FragmentStructure::new("C", query.iter().copied()),
                min,
                1.0,
                &options,
            )
            .unwrap();
            for (id, sim) in drain(matcher) {
                prop_assert!(found.insert(id, sim.unwrap()).is_none());
            }
        }
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prop_top_n_returns_best(
        records in prop::collection::vec(fragment_set(10), 1..150),
        query in prop::collection::btree_set(0..FRAGMENTS, 1..10),
        limit in 0usize..25,
        min in 0.0f64..0.6,
    ) {
        let dir = TempDir::new().unwrap();
        let index = build_index(&dir, &records);
        index.optimize().unwrap();

        let matcher = Matcher::top_n(
            Arc::clone(&index),
            &FragmentStructure::new("C", query.iter().copied()),
            limit,
            min,
            &SearchOptions::default(),
        )
        .unwrap();
        let hits = drain(matcher);

        let scores: Vec<f64> = records.iter().map(|r| tanimoto(&query, r)).collect();
        let eligible = scores.iter().filter(|&&s| s >= min).count();
        prop_assert_eq!(hits.len(), limit.min(eligible));

        let returned: BTreeSet<u64> = hits.iter().map(|(id, _)| *id).collect();
        prop_assert_eq!(returned.len(), hits.len());
        for pair in hits.windows(2) {
            prop_assert!(pair[0].1.unwrap() >= pair[1].1.unwrap());
        }
        if let Some(worst) = hits.last().and_then(|(_, s)| *s) {
            for (i, score) in scores.iter().enumerate() {
                if !returned.contains(&(i as u64)) {
                    prop_assert!(*score <= worst, "record {} scored {} above {}", i, score, worst);
                }
            }
        }
        for (id, sim) in &hits {
            prop_assert_eq!(sim.unwrap(), scores[*id as usize]);
        }
    }

    #[test]
    fn prop_ids_stay_bound_to_their_records(
        ops in prop::collection::vec((any::<bool>(), 0u32..200), 1..120),
    ) {
        let dir = TempDir::new().unwrap();
        let index = build_index(&dir, &[]);
        let mut model: BTreeMap<u64, FragmentStructure> = BTreeMap::new();

        for (insert, value) in ops {
            if insert || model.is_empty() {
                let record = FragmentStructure::new("C", [value % FRAGMENTS, value / 4])
                    .with_property("value", &value.to_string());
                let id = index.insert(&record, None).unwrap();
                prop_assert!(!model.contains_key(&id), "id {} reused while live", id);
                model.insert(id, record);
            } else {
                let victim = *model.keys().nth(value as usize % model.len()).unwrap();
                index.remove(victim).unwrap();
                model.remove(&victim);
                prop_assert!(index.get_object(victim).is_err());
            }
        }

        prop_assert_eq!(index.object_count().unwrap(), model.len() as u64);
        for (id, record) in &model {
            prop_assert_eq!(&index.get_object(*id).unwrap(), record);
        }

        let walked: BTreeSet<u64> = drain(
            Matcher::enumerate(Arc::clone(&index), &SearchOptions::default()).unwrap(),
        )
        .into_iter()
        .map(|(id, _)| id)
        .collect();
        prop_assert_eq!(walked, model.keys().copied().collect::<BTreeSet<u64>>());
    }
}
