use helpers::{
    heap::{create_heap, TestHeap},
    index::TestIndex,
};
use hrl_bitmap::{
    am::{handler, IndexInfo, VacuumInfo},
    base::{Datum, ItemPointer},
    error::BitmapError,
    index::BitmapIndex,
    interrupt::Interrupts,
    options::BitmapOptions,
    scan::{search::ScanDirection, ScanKey},
};
use rand::{rngs::StdRng, SeedableRng};

/// Initialize the logger
fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn info(ncolumns: usize) -> IndexInfo {
    IndexInfo {
        attributes: (1..=ncolumns).collect(),
        ..Default::default()
    }
}

#[test]
fn test_build_errors() {
    init_logger();
    let routine = handler();
    let heap = create_heap(5, 5., 1, 2, 0., &mut StdRng::seed_from_u64(1));

    let index = BitmapIndex::create("idx", 1);
    let concurrent = IndexInfo {
        concurrent: true,
        ..info(1)
    };
    assert!(matches!(
        routine.am.build(&heap, &index, &concurrent),
        Err(BitmapError::ConcurrentBuild)
    ));

    let result = routine.am.build(&heap, &index, &info(1)).expect("build");
    assert_eq!(result.heap_tuples, heap.rows.len() as f64);
    assert_eq!(result.index_tuples, heap.rows.len() as f64);

    // Only once
    assert!(matches!(
        routine.am.build(&heap, &index, &info(1)),
        Err(BitmapError::IndexNotEmpty(_))
    ));
}

#[test]
fn test_build_cancel() {
    init_logger();
    let routine = handler();
    let heap = create_heap(100, 20., 1, 5, 0., &mut StdRng::seed_from_u64(2));
    let index = BitmapIndex::create("idx", 1);

    let interrupts = Interrupts::new();
    interrupts.cancel();
    let info = IndexInfo {
        interrupts,
        options: BitmapOptions {
            interrupt_interval: 10,
            ..Default::default()
        },
        ..info(1)
    };
    assert!(matches!(
        routine.am.build(&heap, &index, &info),
        Err(BitmapError::Cancelled)
    ));

    // Nothing was kept: the build can be run again
    assert!(!index.is_built());
    assert_eq!(index.nblocks(), 0);
    let info = IndexInfo {
        interrupts: Interrupts::new(),
        ..info
    };
    let result = routine.am.build(&heap, &index, &info).expect("build");
    assert_eq!(result.index_tuples, heap.rows.len() as f64);
    assert!(index.is_built());
}

#[test]
fn test_build_invalid_options() {
    init_logger();
    let routine = handler();
    let heap = create_heap(5, 5., 1, 2, 0., &mut StdRng::seed_from_u64(3));
    let index = BitmapIndex::create("idx", 1);

    let info = IndexInfo {
        options: BitmapOptions {
            interrupt_interval: 0,
            ..Default::default()
        },
        ..info(1)
    };
    assert!(matches!(
        routine.am.build(&heap, &index, &info),
        Err(BitmapError::InvalidOption(_, _))
    ));
    assert!(!index.is_built());
}

#[test]
fn test_build_empty() {
    init_logger();
    let routine = handler();
    let index = std::sync::Arc::new(BitmapIndex::create("idx", 2));
    routine
        .am
        .build_empty(&index, BitmapOptions::default())
        .expect("build empty");
    assert!(index.is_built());
    assert_eq!(index.nkeys(), 0);

    let mut scan = routine
        .am
        .begin_scan(index.clone(), vec![ScanKey::equal(1, 1)])
        .expect("begin");
    assert!(!routine
        .am
        .get_tuple(&mut scan, ScanDirection::Forward)
        .expect("tuple"));
    routine.am.end_scan(scan);

    // Tuples can be inserted in an empty index
    let heap = TestHeap::new("heap");
    routine
        .am
        .insert(&index, &[Some(Datum::Int(1)), None], ItemPointer::new(4, 2), &heap)
        .expect("insert");
    let mut scan = routine
        .am
        .begin_scan(index.clone(), vec![ScanKey::equal(1, 1)])
        .expect("begin");
    assert!(routine
        .am
        .get_tuple(&mut scan, ScanDirection::Forward)
        .expect("tuple"));
    assert_eq!(scan.heap_tid, Some(ItemPointer::new(4, 2)));
}

#[test]
fn test_unbuilt_scan() {
    init_logger();
    let routine = handler();
    let index = std::sync::Arc::new(BitmapIndex::create("idx", 1));
    let mut scan = routine.am.begin_scan(index, vec![]).expect("begin");
    assert!(matches!(
        routine.am.get_tuple(&mut scan, ScanDirection::Forward),
        Err(BitmapError::Uninitialized(_))
    ));
    assert!(matches!(
        routine.am.get_bitmap(&mut scan, None),
        Err(BitmapError::Uninitialized(_))
    ));
}

#[test]
fn test_vacuum() {
    init_logger();
    let options = BitmapOptions {
        batch_tids: 256,
        ..Default::default()
    };
    let mut data = TestIndex::new(100, 20., 1, 4, Some(31), options.clone());
    let keys = vec![ScanKey::equal(1, 2)];

    // Some tuples are deleted from the heap
    data.heap.rows.retain(|row| row.tid.block % 3 != 0);
    let num_heap_tuples = data.heap.rows.len() as f64;

    let vacuum = VacuumInfo {
        index: &data.index,
        heap: &data.heap,
        index_info: &data.info,
        num_heap_tuples,
    };
    let stats = data
        .routine
        .am
        .bulk_delete(&vacuum, None)
        .expect("bulk delete");
    assert_eq!(stats.tuples_removed, 0.);
    assert_eq!(stats.num_index_tuples, num_heap_tuples);
    assert_eq!(stats.num_pages, data.index.nblocks());

    let stats = data
        .routine
        .am
        .vacuum_cleanup(&vacuum, Some(stats))
        .expect("cleanup");
    assert_eq!(stats.pages_deleted, 0);
    assert_eq!(stats.pages_free, 0);

    // The index only holds the remaining tuples, with its options
    assert_eq!(data.index.options().expect("options"), options);
    let mut scan = data
        .routine
        .am
        .begin_scan(data.index.clone(), keys.clone())
        .expect("begin");
    let mut tids = Vec::new();
    while data
        .routine
        .am
        .get_tuple(&mut scan, ScanDirection::Forward)
        .expect("tuple")
    {
        tids.push(scan.heap_tid.expect("tid").number());
    }
    assert_eq!(tids, data.expected(&keys));
}

#[test]
fn test_bulk_delete_cancel() {
    init_logger();
    let options = BitmapOptions {
        interrupt_interval: 10,
        tid_buffer_threshold: 5,
        ..Default::default()
    };
    let data = TestIndex::new(50, 20., 1, 3, Some(7), options);
    let am = &data.routine.am;
    let keys = vec![ScanKey::equal(1, 1)];
    let nblocks = data.index.nblocks();

    data.info.interrupts.cancel();
    let vacuum = VacuumInfo {
        index: &data.index,
        heap: &data.heap,
        index_info: &data.info,
        num_heap_tuples: data.heap.rows.len() as f64,
    };
    assert!(matches!(
        am.bulk_delete(&vacuum, None),
        Err(BitmapError::Cancelled)
    ));

    // The index content is the one before the rebuild
    assert!(data.index.is_built());
    assert_eq!(data.index.nblocks(), nblocks);
    let mut scan = am.begin_scan(data.index.clone(), keys.clone()).expect("begin");
    let mut tids = Vec::new();
    while am.get_tuple(&mut scan, ScanDirection::Forward).expect("tuple") {
        tids.push(scan.heap_tid.expect("tid").number());
    }
    am.end_scan(scan);
    assert_eq!(tids, data.expected(&keys));
    assert_eq!(data.index.pool().total_pins(), 0);
}

#[test]
fn test_mark_restore() {
    init_logger();
    let data = TestIndex::new(20, 10., 1, 2, Some(32), BitmapOptions::default());
    let am = &data.routine.am;
    let keys = vec![ScanKey::equal(1, 0)];
    let expected = data.expected(&keys);

    let mut scan = am.begin_scan(data.index.clone(), keys).expect("begin");
    assert!(am.get_tuple(&mut scan, ScanDirection::Forward).expect("tuple"));
    am.mark_pos(&mut scan);
    assert!(am.get_tuple(&mut scan, ScanDirection::Forward).expect("tuple"));
    assert!(am.get_tuple(&mut scan, ScanDirection::Forward).expect("tuple"));

    am.restore_pos(&mut scan);
    assert!(am.get_tuple(&mut scan, ScanDirection::Forward).expect("tuple"));
    assert_eq!(scan.heap_tid.map(|tid| tid.number()), Some(expected[1]));

    am.rescan(&mut scan, None).expect("rescan");
    assert!(am.get_tuple(&mut scan, ScanDirection::Forward).expect("tuple"));
    assert_eq!(scan.heap_tid.map(|tid| tid.number()), Some(expected[0]));
    am.end_scan(scan);
}
