use helpers::index::TestIndex;
use hrl_bitmap::{
    options::BitmapOptions,
    scan::{search::ScanDirection, IndexScanDesc, ScanKey, StrategyNumber},
};
use log::info;
use ntest::timeout;
use rstest::rstest;

/// Initialize the logger
fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn all_tuples(scan: &mut IndexScanDesc) -> Vec<u64> {
    let mut tids = Vec::new();
    while scan
        .get_tuple(ScanDirection::Forward)
        .expect("Error while scanning")
    {
        tids.push(scan.heap_tid.expect("no tuple id").number());
    }
    tids
}

#[rstest]
#[case(StrategyNumber::Equal, 3)]
#[case(StrategyNumber::Less, 2)]
#[case(StrategyNumber::LessEqual, 0)]
#[case(StrategyNumber::GreaterEqual, 5)]
#[case(StrategyNumber::Greater, 9)]
fn test_get_tuple(
    #[case] strategy: StrategyNumber,
    #[case] argument: i64,
    #[values(64, 1000, 16384)] batch_tids: usize,
) {
    init_logger();
    let options = BitmapOptions {
        batch_tids,
        ..Default::default()
    };
    let data = TestIndex::new(200, 30., 1, 10, Some(42), options);

    let keys = vec![ScanKey::new(1, strategy, argument)];
    let expected = data.expected(&keys);
    info!(
        "{:?} {}: expecting {} tuples",
        strategy,
        argument,
        expected.len()
    );

    let mut scan = IndexScanDesc::begin(data.index.clone(), keys).expect("begin");
    assert_eq!(all_tuples(&mut scan), expected);
    assert!(!scan.recheck);
    scan.end();
    assert_eq!(data.index.pool().total_pins(), 0);
}

#[test]
#[timeout(60000)]
fn test_multicolumn() {
    init_logger();
    let data = TestIndex::new(100, 20., 2, 4, Some(7), BitmapOptions::default());

    for keys in [
        vec![ScanKey::equal(1, 1), ScanKey::equal(2, 3)],
        vec![ScanKey::equal(2, 0)],
        vec![ScanKey::new(1, StrategyNumber::Greater, 1), ScanKey::new(2, StrategyNumber::Less, 2)],
        vec![],
    ] {
        let expected = data.expected(&keys);
        let mut scan = IndexScanDesc::begin(data.index.clone(), keys).expect("begin");
        assert_eq!(all_tuples(&mut scan), expected);
    }
}

#[test]
fn test_no_keys() {
    init_logger();
    let data = TestIndex::new(50, 10., 1, 3, Some(1), BitmapOptions::default());
    let mut scan = IndexScanDesc::begin(data.index.clone(), vec![]).expect("begin");

    // Rows with a NULL value have their own vector and are returned too
    let everything: Vec<u64> = data.heap.rows.iter().map(|row| row.tid.number()).collect();
    assert_eq!(all_tuples(&mut scan), everything);
}

#[rstest]
#[case(vec![ScanKey::equal(1, 2)])]
#[case(vec![ScanKey::new(1, StrategyNumber::GreaterEqual, 1)])]
fn test_mark_restore(#[case] keys: Vec<ScanKey>) {
    init_logger();
    let data = TestIndex::new(100, 20., 1, 5, Some(3), BitmapOptions::default());
    let pool = data.index.pool();
    let nvectors = data.index.find_keys(|key| keys.iter().all(|k| k.matches(key))).len();
    let expected = data.expected(&keys);
    assert!(expected.len() > 10);

    let mut scan = IndexScanDesc::begin(data.index.clone(), keys).expect("begin");
    assert_eq!(pool.total_pins(), 0);
    for _ in 0..10 {
        assert!(scan.get_tuple(ScanDirection::Forward).expect("tuple"));
    }
    assert_eq!(pool.total_pins(), nvectors);

    scan.mark_pos();
    assert_eq!(pool.total_pins(), 2 * nvectors);
    // Marking again releases the previous mark
    scan.mark_pos();
    assert_eq!(pool.total_pins(), 2 * nvectors);

    let rest = all_tuples(&mut scan);
    assert_eq!(rest, expected[10..]);

    // Restoring twice gives the same tuples
    for _ in 0..2 {
        scan.restore_pos();
        assert_eq!(pool.total_pins(), 2 * nvectors);
        assert_eq!(all_tuples(&mut scan), rest);
    }

    scan.end();
    assert_eq!(pool.total_pins(), 0);
}

#[test]
fn test_copy_independence() {
    init_logger();
    let data = TestIndex::new(100, 20., 1, 3, Some(5), BitmapOptions::default());
    let keys = vec![ScanKey::new(1, StrategyNumber::LessEqual, 1)];
    let expected = data.expected(&keys);

    let mut scan = IndexScanDesc::begin(data.index.clone(), keys).expect("begin");
    for _ in 0..5 {
        assert!(scan.get_tuple(ScanDirection::Forward).expect("tuple"));
    }

    let mut copy = scan.copy_scan_desc();
    assert!(copy.marked_position().is_none());

    // Exhausting the copy does not move the original
    let copied = all_tuples(&mut copy);
    assert_eq!(copied, expected[5..]);
    assert_eq!(all_tuples(&mut scan), expected[5..]);

    drop(copy);
    scan.end();
    assert_eq!(data.index.pool().total_pins(), 0);
}

#[test]
fn test_rescan() {
    init_logger();
    let data = TestIndex::new(30, 10., 1, 4, Some(9), BitmapOptions::default());
    let keys = vec![ScanKey::equal(1, 1)];

    let mut scan = IndexScanDesc::begin(data.index.clone(), keys.clone()).expect("begin");
    let first = all_tuples(&mut scan);
    assert_eq!(first, data.expected(&keys));

    scan.rescan(None).expect("rescan");
    assert!(scan.current_position().is_none());
    assert_eq!(all_tuples(&mut scan), first);

    let other = vec![ScanKey::equal(1, 2)];
    scan.rescan(Some(other.clone())).expect("rescan");
    assert_eq!(all_tuples(&mut scan), data.expected(&other));
}

#[test]
fn test_no_movement() {
    init_logger();
    let data = TestIndex::new(10, 5., 1, 2, Some(2), BitmapOptions::default());
    let keys = vec![ScanKey::equal(1, 0)];
    let expected = data.expected(&keys);

    // Treated as a forward scan
    let mut scan = IndexScanDesc::begin(data.index.clone(), keys).expect("begin");
    let mut tids = Vec::new();
    while scan.get_tuple(ScanDirection::NoMovement).expect("tuple") {
        tids.push(scan.heap_tid.expect("tid").number());
    }
    assert_eq!(tids, expected);
}
