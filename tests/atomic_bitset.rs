use std::collections::BTreeSet;
use std::sync::Arc;

use pie_engine::AtomicBitset;
use proptest::prelude::*;

#[test]
fn atomic_bitset_basic() {
    let b = AtomicBitset::new(130);
    assert_eq!(b.len_bits(), 130);

    assert!(!b.get(0));
    assert!(b.set(0));
    assert!(b.get(0));
    assert!(!b.set(0));

    assert!(b.set(129));
    assert!(b.get(129));
    assert_eq!(b.cardinality(), 2);
    assert_eq!(b.next_set_bit(1), Some(129));
    assert_eq!(b.next_set_bit(130), None);

    b.clear_all();
    assert!(!b.get(0));
    assert!(!b.get(129));
    assert!(b.is_empty());
}

#[test]
fn concurrent_sets_are_not_lost() {
    let b = Arc::new(AtomicBitset::new(4096));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                // Overlapping strides: every bit is hit by several threads.
                for i in (t..4096).step_by(3) {
                    b.set(i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(b.cardinality(), 4096);
}

fn bitset_of(bits: usize, ones: &BTreeSet<usize>) -> AtomicBitset {
    let b = AtomicBitset::new(bits);
    for &i in ones {
        b.set(i);
    }
    b
}

proptest! {
    #[test]
    fn matches_std_set(bits in 1usize..300, raw in proptest::collection::vec(any::<usize>(), 0..200)) {
        let ones: BTreeSet<usize> = raw.into_iter().map(|i| i % bits).collect();
        let b = bitset_of(bits, &ones);

        prop_assert_eq!(b.cardinality(), ones.len());
        prop_assert_eq!(b.iter_ones().collect::<Vec<_>>(), ones.iter().copied().collect::<Vec<_>>());
        for from in 0..bits {
            prop_assert_eq!(b.next_set_bit(from), ones.range(from..).next().copied());
        }
    }

    #[test]
    fn union_matches_std_union(
        bits in 1usize..300,
        left in proptest::collection::vec(any::<usize>(), 0..100),
        right in proptest::collection::vec(any::<usize>(), 0..100),
    ) {
        let left: BTreeSet<usize> = left.into_iter().map(|i| i % bits).collect();
        let right: BTreeSet<usize> = right.into_iter().map(|i| i % bits).collect();
        let expected: Vec<usize> = left.union(&right).copied().collect();

        let a = bitset_of(bits, &left);
        let b = bitset_of(bits, &right);

        let fresh = a.or_into(&b);
        prop_assert_eq!(fresh.iter_ones().collect::<Vec<_>>(), expected.clone());
        // The operands are untouched.
        prop_assert_eq!(a.cardinality(), left.len());

        a.union_with(&b);
        prop_assert_eq!(a.iter_ones().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn range_scan_matches_filter(
        bits in 1usize..300,
        raw in proptest::collection::vec(any::<usize>(), 0..100),
        start in 0usize..300,
        len in 0usize..300,
    ) {
        let ones: BTreeSet<usize> = raw.into_iter().map(|i| i % bits).collect();
        let b = bitset_of(bits, &ones);
        let start = start % bits;
        let end = (start + len).min(bits);
        let expected: Vec<usize> = ones.range(start..end).copied().collect();
        prop_assert_eq!(b.iter_ones_in(start, end).collect::<Vec<_>>(), expected);
    }
}
