// tests/util/bitset_test.rs
use quillsql::util::{GospersHack, SmallBitset, SubsetEnumerator};

fn binomial(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let mut res = 1u64;
    for i in 0..k {
        res = res * (n - i) / (i + 1);
    }
    res
}

#[test]
fn test_basic_set_operations() {
    let mut s = SmallBitset::empty();
    assert!(s.is_empty());
    s.set(3);
    s.set(17);
    s.set(63);
    assert_eq!(s.len(), 3);
    assert!(s.contains(17));
    assert!(!s.contains(4));
    assert_eq!(s.least_element(), Some(3));
    s.clear(3);
    assert_eq!(s.least_element(), Some(17));

    let a = SmallBitset::from_raw(0b1100);
    let b = SmallBitset::from_raw(0b1010);
    assert_eq!((a | b).raw(), 0b1110);
    assert_eq!((a & b).raw(), 0b1000);
    assert_eq!((a - b).raw(), 0b0100);
    assert!(SmallBitset::from_raw(0b1000).is_subset(a));
    assert!(!a.is_subset(b));
}

#[test]
fn test_iteration_is_ascending() {
    let s = SmallBitset::from_raw(0b1010_0110);
    let bits: Vec<usize> = s.iter().collect();
    assert_eq!(bits, vec![1, 2, 5, 7]);
}

#[test]
fn test_gosper_emits_all_k_subsets_in_increasing_order() {
    for n in 1..=8usize {
        for k in 1..=n {
            let subsets: Vec<SmallBitset> = GospersHack::enumerate_all(k, n).collect();
            assert_eq!(
                subsets.len() as u64,
                binomial(n as u64, k as u64),
                "C({n}, {k})"
            );
            for s in &subsets {
                assert_eq!(s.len(), k);
                assert!(s.is_subset(SmallBitset::all(n)));
            }
            // strictly increasing numerical order
            for w in subsets.windows(2) {
                assert!(w[0].raw() < w[1].raw());
            }
            // all distinct follows from strict ordering
        }
    }
}

#[test]
fn test_gosper_resumes_from_a_given_subset() {
    let all: Vec<SmallBitset> = GospersHack::enumerate_all(2, 5).collect();
    let resumed: Vec<SmallBitset> = GospersHack::enumerate_from(all[4], 5).collect();
    assert_eq!(&all[4..], &resumed[..]);
}

#[test]
fn test_subset_enumerator_maps_into_sparse_sets() {
    let set = SmallBitset::from_raw(0b1011010);
    for k in 1..=set.len() {
        let subsets: Vec<SmallBitset> = SubsetEnumerator::new(set, k).collect();
        assert_eq!(subsets.len() as u64, binomial(set.len() as u64, k as u64));
        for s in &subsets {
            assert_eq!(s.len(), k);
            assert!(s.is_subset(set), "{s} within {set}");
        }
        let mut dedup = subsets.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), subsets.len());
    }
}

#[test]
fn test_next_subset_recurrence() {
    let sup = SmallBitset::from_raw(0b1101);
    let mut subsets = Vec::new();
    let mut s = SmallBitset::empty().next_subset(sup);
    while !s.is_empty() {
        subsets.push(s.raw());
        s = s.next_subset(sup);
    }
    assert_eq!(subsets, vec![0b0001, 0b0100, 0b0101, 0b1000, 0b1001, 0b1100, 0b1101]);
}
