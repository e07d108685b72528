use blockidx_parser::bloom::BloomFilter;
use blockidx_primitives::{hash160, Hash160};

fn key(n: u32) -> Hash160 {
    hash160(&n.to_le_bytes())
}

#[test]
fn added_keys_are_always_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("pubkey");
    let mut filter = BloomFilter::open(&prefix, 10_000, 0.01).expect("open");
    for n in 0..10_000 {
        filter.add(&key(n)).expect("add");
    }
    assert!(filter.is_full());
    assert!((0..10_000).all(|n| filter.possibly_contains(&key(n))));

    let false_positives = (10_000..20_000)
        .filter(|&n| filter.possibly_contains(&key(n)))
        .count();
    assert!(false_positives < 300, "{false_positives} false positives");
}

#[test]
fn saved_filter_reopens_with_its_contents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("scripthash");
    {
        let mut filter = BloomFilter::open(&prefix, 100, 0.001).expect("open");
        for n in 0..50 {
            filter.add(&key(n)).expect("add");
        }
        filter.save().expect("save");
    }
    assert!(dir.path().join("scripthashMeta.json").exists());
    assert!(dir.path().join("scripthashStore.dat").exists());

    // Capacity arguments only apply to brand-new filters.
    let mut filter = BloomFilter::open(&prefix, 5, 0.5).expect("reopen");
    assert_eq!(filter.added(), 50);
    assert_eq!(filter.meta().max_items, 100);
    assert!((0..50).all(|n| filter.possibly_contains(&key(n))));

    filter.reset(1_000, 0.01).expect("reset");
    assert_eq!(filter.added(), 0);
    assert!(!filter.is_full());
    assert!(!(0..50).any(|n| filter.possibly_contains(&key(n))));
}
