use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, HashSet};

/// Walk the tree independently of its stored heights and check every structural
/// invariant. Returns nothing; panics on the first violation.
fn validate_tree<T: Ord + fmt::Debug>(t: &UnrolledAvlTree<T>) {
    fn check<T: Ord + fmt::Debug>(
        t: &UnrolledAvlTree<T>,
        idx: NodeIdx,
        parent: Option<NodeIdx>,
        lo: Option<&T>,
        hi: Option<&T>,
        seen: &mut HashSet<NodeIdx>,
    ) -> (u8, usize) {
        assert!(seen.insert(idx), "node {idx} reachable twice");
        let node = t.arena.node(idx);
        assert_eq!(node.parent, parent, "stale parent link at node {idx}");
        assert!(!node.elements.is_empty(), "empty node {idx} is reachable");
        assert!(node.elements.len() <= node.capacity as usize);
        assert_eq!(node.capacity as usize, t.node_capacity());
        assert!(
            node.elements.windows(2).all(|w| w[0] <= w[1]),
            "run not sorted: {:?}",
            node.elements
        );
        if let Some(lo) = lo {
            assert!(lo <= node.first(), "{lo:?} > {:?}", node.first());
        }
        if let Some(hi) = hi {
            assert!(node.last() <= hi, "{:?} > {hi:?}", node.last());
        }

        let (lh, lc) = match node.left {
            Some(l) => check(t, l, Some(idx), lo, Some(node.first()), seen),
            None => (0, 0),
        };
        let (rh, rc) = match node.right {
            Some(r) => check(t, r, Some(idx), Some(node.last()), hi, seen),
            None => (0, 0),
        };
        assert_eq!(node.left_height, lh, "left height of node {idx}");
        assert_eq!(node.right_height, rh, "right height of node {idx}");
        assert!(lh.abs_diff(rh) <= 1, "node {idx} unbalanced: {lh} vs {rh}");
        (lh.max(rh) + 1, lc + rc + node.elements.len())
    }

    let mut seen = HashSet::new();
    let count = match t.root {
        Some(root) => check(t, root, None, None, None, &mut seen).1,
        None => 0,
    };
    assert_eq!(count, t.len(), "reachable element count must match len");

    let free: HashSet<NodeIdx> = t.arena.free.iter().copied().collect();
    assert_eq!(free.len(), t.arena.free.len(), "free list holds duplicates");
    assert!(free.is_disjoint(&seen), "recycled node still reachable");
    assert_eq!(seen.len() + free.len(), t.arena.nodes.len(), "leaked node");
    for &idx in &free {
        let node = t.arena.node(idx);
        assert!(node.elements.is_empty());
        assert_eq!((node.left, node.right, node.parent), (None, None, None));
        assert_eq!((node.left_height, node.right_height), (0, 0));
    }
    assert!(t.arena.free.capacity() >= t.arena.nodes.len());

    let n = seen.len() as f64;
    assert!(t.height() as f64 <= 1.44 * (n + 2.0).log2());
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Insert(#[proptest(strategy = "0u16..128")] u16),
    #[proptest(weight = 3)]
    Remove(#[proptest(strategy = "0u16..128")] u16),
    #[proptest(weight = 2)]
    Get(#[proptest(strategy = "0u16..128")] u16),
    Compact,
}

/// Multiset model: value -> multiplicity.
fn model_insert(m: &mut BTreeMap<u16, usize>, v: u16) {
    *m.entry(v).or_default() += 1;
}

fn model_remove(m: &mut BTreeMap<u16, usize>, v: u16) -> Option<u16> {
    let count = m.get_mut(&v)?;
    *count -= 1;
    if *count == 0 {
        m.remove(&v);
    }
    Some(v)
}

fn model_sorted(m: &BTreeMap<u16, usize>) -> Vec<u16> {
    m.iter()
        .flat_map(|(v, n)| std::iter::repeat(*v).take(*n))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_with_multiset(
        capacity in 1usize..=6,
        ops in prop::collection::vec(any::<Op>(), 0..=600),
    ) {
        let mut t = UnrolledAvlTree::with_node_capacity(capacity).unwrap();
        let mut m: BTreeMap<u16, usize> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(v) => {
                    prop_assert_eq!(*t.insert(v).unwrap(), v);
                    model_insert(&mut m, v);
                }
                Op::Remove(v) => {
                    prop_assert_eq!(t.remove(&v), model_remove(&mut m, v));
                }
                Op::Get(v) => {
                    let height = t.height();
                    prop_assert_eq!(t.get(&v).copied(), m.contains_key(&v).then_some(v));
                    prop_assert_eq!(t.min().copied(), m.keys().next().copied());
                    prop_assert_eq!(t.max().copied(), m.keys().next_back().copied());
                    prop_assert_eq!(t.height(), height);
                }
                Op::Compact => {
                    t.compact();
                }
            }

            prop_assert_eq!(t.len(), m.values().sum::<usize>());
            validate_tree(&t);
        }

        prop_assert_eq!(t.iter().copied().collect::<Vec<_>>(), model_sorted(&m));
    }

    #[test]
    fn prop_duplicate_heavy_inserts(
        capacity in 1usize..=4,
        values in prop::collection::vec(0u8..3, 0..=300),
    ) {
        let mut t = UnrolledAvlTree::with_node_capacity(capacity).unwrap();
        for &v in &values {
            prop_assert_eq!(*t.insert(v).unwrap(), v);
        }
        validate_tree(&t);

        let mut sorted = values.clone();
        sorted.sort_unstable();
        prop_assert_eq!(t.iter().copied().collect::<Vec<_>>(), sorted);
    }

    #[test]
    fn prop_insert_then_remove_all(
        capacity in 1usize..=8,
        values in prop::collection::vec(any::<i32>(), 0..=400),
        seed in any::<u64>(),
    ) {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut t = UnrolledAvlTree::with_node_capacity(capacity).unwrap();
        for &v in &values {
            t.insert(v).unwrap();
        }

        let mut order = values.clone();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        for v in order {
            prop_assert_eq!(t.remove(&v), Some(v));
            validate_tree(&t);
        }
        prop_assert!(t.is_empty());
        prop_assert_eq!(t.height(), 0);
        prop_assert!(t.root.is_none());
    }
}

/// Visit every ordering of `items` in place (Heap's algorithm).
fn for_each_permutation<T>(items: &mut [T], mut f: impl FnMut(&[T])) {
    let mut counters = vec![0usize; items.len()];
    f(items);
    let mut i = 1;
    while i < items.len() {
        if counters[i] < i {
            let j = if i % 2 == 0 { 0 } else { counters[i] };
            items.swap(j, i);
            f(items);
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn permutations_are_distinct_and_complete() {
    let mut seen = HashSet::new();
    for_each_permutation(&mut [1, 2, 3, 4], |p| {
        assert!(seen.insert(p.to_vec()), "repeated {p:?}");
    });
    assert_eq!(seen.len(), 24);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let values = [10, 20, 30, 40, 50, 60, 20];
    let mut expected = values.to_vec();
    expected.sort_unstable();

    for capacity in 1..=3 {
        let mut order = values;
        for_each_permutation(&mut order, |perm| {
            let mut t = UnrolledAvlTree::with_node_capacity(capacity).unwrap();
            for &v in perm {
                t.insert(v).unwrap();
                validate_tree(&t);
            }
            assert_eq!(t.iter().copied().collect::<Vec<_>>(), expected);
        });
    }
}

#[test]
fn exhaustive_remove_order_small_set() {
    let values = [1, 2, 3, 4, 5, 6, 7];

    for capacity in 1..=3 {
        // Insert in a fixed order, then remove in all permutations.
        let mut base = UnrolledAvlTree::with_node_capacity(capacity).unwrap();
        for v in values {
            base.insert(v).unwrap();
        }

        let mut order = values;
        for_each_permutation(&mut order, |perm| {
            let mut t = base.clone();
            for (removed, v) in perm.iter().enumerate() {
                assert_eq!(t.remove(v), Some(*v));
                assert_eq!(t.len(), values.len() - removed - 1);
                validate_tree(&t);
            }
            assert!(t.root.is_none());
            assert_eq!(t.free_node_count(), t.arena.nodes.len());
        });
    }
}
