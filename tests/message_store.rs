use std::collections::{BTreeMap, BTreeSet};

use pie_engine::{AtomicBitset, MessageStore};
use proptest::prelude::*;

fn sum(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

#[test]
fn messages_across_segments_stay_separate() {
    let store = MessageStore::new(200, 200);
    let next = AtomicBitset::new(200);
    store.add_messages([(63, 1), (64, 2), (127, 3), (128, 4), (199, 5)], &sum, &next);
    assert_eq!(store.get(63), Some(1));
    assert_eq!(store.get(64), Some(2));
    assert_eq!(store.get(128), Some(4));
    assert_eq!(store.get(199), Some(5));
    assert_eq!(store.get(0), None);
    assert_eq!(next.cardinality(), 5);
}

proptest! {
    #[test]
    fn merge_is_independent_of_arrival_order(
        inner in 1usize..150,
        outer in 0usize..50,
        raw in proptest::collection::vec((any::<usize>(), -1000i64..1000), 0..400),
        threads in 1usize..6,
    ) {
        let total = inner + outer;
        let messages: Vec<(usize, i64)> = raw.into_iter().map(|(lid, m)| (lid % total, m)).collect();

        let mut expected: BTreeMap<usize, i64> = BTreeMap::new();
        for &(lid, m) in &messages {
            expected.entry(lid).and_modify(|v| *v = sum(*v, m)).or_insert(m);
        }

        let store = MessageStore::new(inner, total);
        let next = AtomicBitset::new(total);
        let per_thread = messages.len().div_ceil(threads).max(1);
        std::thread::scope(|s| {
            for chunk in messages.chunks(per_thread) {
                let (store, next) = (&store, &next);
                // Reverse each chunk so arrival order differs from the fold above.
                s.spawn(move || store.add_messages(chunk.iter().rev().copied(), &sum, next));
            }
        });

        for lid in 0..total {
            prop_assert_eq!(store.get(lid), expected.get(&lid).copied());
        }
        let inner_hit: BTreeSet<usize> = expected.keys().copied().filter(|&lid| lid < inner).collect();
        let outer_hit = expected.keys().filter(|&&lid| lid >= inner).count();
        prop_assert_eq!(next.iter_ones().collect::<BTreeSet<_>>(), inner_hit);
        prop_assert_eq!(store.pending_outer(), outer_hit);
    }
}
