//! Property-based invariant tests for the filter rebuild cycle.
//!
//! For arbitrary datasets and sequences of filters:
//!
//! 1. Queryable ids equal the dataset ids intersected with the filter.
//! 2. `None` exposes every dataset id; an empty set exposes none.
//! 3. Each (layer, event) pair carries at most one handler after every cycle.
//! 4. No binding outlives its layer.
//! 5. The source filter expression lists exactly the requested ids, sorted,
//!    and is absent when no filter was requested.
//! 6. Unmount leaves no source, layer, or binding behind.

use std::collections::BTreeSet;
use std::rc::Rc;

use futures::executor::LocalPool;
use pinmap_core::{FilterPredicate, IdSet, LifecyclePolicy, LngLat, MapConfig, Spawner, UserId};
use pinmap_harness::HeadlessMap;
use pinmap_runtime::{PointClickCallback, UserClusterMap};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

fn dataset_strategy() -> impl Strategy<Value = Vec<(UserId, LngLat)>> {
    proptest::collection::btree_map(1i64..500, (-170.0f64..170.0, -70.0f64..70.0), 0..120)
        .prop_map(|points| {
            points
                .into_iter()
                .map(|(id, (lng, lat))| (UserId(id), LngLat::new(lng, lat)))
                .collect()
        })
}

fn filter_strategy() -> impl Strategy<Value = Option<BTreeSet<i64>>> {
    prop_oneof![
        1 => Just(None),
        1 => Just(Some(BTreeSet::new())),
        4 => proptest::collection::btree_set(1i64..600, 0..40).prop_map(Some),
    ]
}

fn to_id_set(ids: &BTreeSet<i64>) -> IdSet {
    ids.iter().copied().map(UserId).collect()
}

fn setup(points: Vec<(UserId, LngLat)>) -> (Rc<HeadlessMap>, UserClusterMap) {
    let config = MapConfig {
        lifecycle: LifecyclePolicy::Strict,
        ..MapConfig::default()
    };
    let map = Rc::new(HeadlessMap::new());
    map.serve(config.data_url(), points);
    let spawner: Spawner = Rc::new(LocalPool::new().spawner());
    let clusters = UserClusterMap::new(map.clone(), config, spawner);
    (map, clusters)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn queryable_ids_match_filter(
        points in dataset_strategy(),
        filters in proptest::collection::vec(filter_strategy(), 1..6),
    ) {
        let dataset: BTreeSet<i64> = points.iter().map(|(id, _)| id.get()).collect();
        let (map, clusters) = setup(points);
        let callback: PointClickCallback = Rc::new(|_: UserId| {});

        for filter in &filters {
            let ids = filter.as_ref().map(to_id_set);
            let _ = clusters.apply_filter(ids, Some(Rc::clone(&callback))).unwrap();

            let expected: Vec<UserId> = match filter {
                None => dataset.iter().copied().map(UserId).collect(),
                Some(wanted) => dataset.intersection(wanted).copied().map(UserId).collect(),
            };
            prop_assert_eq!(map.source_points("users"), expected);

            for (layer, kind) in map.bindings() {
                prop_assert_eq!(map.binding_count(&layer, kind), 1);
            }
            prop_assert!(map.dangling_bindings().is_empty());

            let source = map.source("users").unwrap();
            match filter {
                None => {
                    prop_assert_eq!(&source.filter, &FilterPredicate::All);
                    prop_assert!(source.to_style_json().get("filter").is_none());
                }
                Some(wanted) => {
                    let literal: Vec<i64> = source
                        .filter
                        .members()
                        .map(|set| set.literal().iter().map(|id| id.get()).collect())
                        .unwrap_or_else(|| vec![-1]);
                    let requested: Vec<i64> = wanted.iter().copied().collect();
                    prop_assert_eq!(literal, requested);
                }
            }
        }

        clusters.unmount().unwrap();
        prop_assert!(map.source_ids().is_empty());
        prop_assert!(map.layer_ids().is_empty());
        prop_assert!(map.bindings().is_empty());
    }
}
