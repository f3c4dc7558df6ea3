use std::collections::BTreeSet;
use std::sync::Arc;

use log::info;
use rand::{rngs::StdRng, SeedableRng};
use temp_dir::TempDir;

use crate::heap::{create_heap, TestHeap};
use hrl_bitmap::{
    am::{handler, IndexAmRoutine, IndexInfo},
    base::ItemPointer,
    index::BitmapIndex,
    options::BitmapOptions,
    scan::ScanKey,
    stream::Bitmap,
};

pub struct TestIndex {
    pub dir: TempDir,
    pub heap: TestHeap,
    pub info: IndexInfo,
    pub routine: IndexAmRoutine,
    pub index: Arc<BitmapIndex>,
}

impl TestIndex {
    pub fn new(
        nblocks: u32,
        lambda_tuples: f64,
        ncolumns: usize,
        cardinality: i64,
        seed: Option<u64>,
        options: BitmapOptions,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let heap = create_heap(nblocks, lambda_tuples, ncolumns, cardinality, 0.1, &mut rng);
        Self::from_heap(heap, ncolumns, options)
    }

    /// Builds an index over all the columns of `heap`
    pub fn from_heap(heap: TestHeap, ncolumns: usize, options: BitmapOptions) -> Self {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let info = IndexInfo {
            attributes: (1..=ncolumns).collect(),
            options,
            ..Default::default()
        };

        let routine = handler();
        let index = BitmapIndex::create("test_idx", ncolumns);
        let result = routine
            .am
            .build(&heap, &index, &info)
            .expect("Error while building the index");
        info!(
            "Built index with {} tuples ({} heap tuples) in {} blocks",
            result.index_tuples,
            result.heap_tuples,
            index.nblocks()
        );

        Self {
            dir,
            heap,
            info,
            routine,
            index: Arc::new(index),
        }
    }

    /// Tuple numbers of the heap rows satisfying all the keys
    pub fn expected(&self, keys: &[ScanKey]) -> Vec<u64> {
        self.heap
            .rows
            .iter()
            .filter(|row| {
                let values = TestHeap::index_values(row, &self.info);
                keys.iter().all(|key| key.matches(&values))
            })
            .map(|row| row.tid.number())
            .collect()
    }
}

/// The tuple numbers of a bitmap, in increasing order
pub fn bitmap_tuples(bitmap: &Bitmap) -> Vec<u64> {
    let mut tids = Vec::new();
    for page in bitmap.pages().expect("Error while iterating") {
        let page = page.expect("Error while reading a page");
        assert!(!page.recheck, "Bitmap index results are exact");
        tids.extend(
            page.offsets
                .iter()
                .map(|offset| ItemPointer::new(page.blockno, *offset).number()),
        );
    }
    tids
}

pub fn union(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter().chain(b.iter()).copied().collect::<BTreeSet<_>>().into_iter().collect()
}

pub fn intersection(a: &[u64], b: &[u64]) -> Vec<u64> {
    let b: BTreeSet<_> = b.iter().copied().collect();
    a.iter().copied().filter(|tid| b.contains(tid)).collect()
}
