use rand::{Rng, RngCore};
use rand_distr::{Distribution, Poisson};

use hrl_bitmap::{
    am::{HeapRelation, IndexInfo},
    base::{Datum, ItemPointer, OffsetNumber, MAX_TUPLES_PER_PAGE},
    error::Result,
};

pub struct TestRow {
    pub tid: ItemPointer,
    pub values: Vec<Option<Datum>>,
}

/// An in-memory heap, scanned in tuple id order
pub struct TestHeap {
    pub name: String,
    pub rows: Vec<TestRow>,
}

impl TestHeap {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, tid: ItemPointer, values: Vec<Option<Datum>>) {
        self.rows.push(TestRow { tid, values });
    }

    /// Values of the indexed attributes of a row
    pub fn index_values(row: &TestRow, info: &IndexInfo) -> Vec<Option<Datum>> {
        info.attributes
            .iter()
            .map(|attno| row.values[attno - 1].clone())
            .collect()
    }
}

impl HeapRelation for TestHeap {
    fn name(&self) -> &str {
        &self.name
    }

    fn ntuples(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }

    fn index_build_scan(
        &self,
        info: &IndexInfo,
        callback: &mut dyn FnMut(ItemPointer, &[Option<Datum>]) -> Result<()>,
    ) -> Result<f64> {
        for row in self.rows.iter() {
            callback(row.tid, &Self::index_values(row, info))?;
        }
        Ok(self.rows.len() as f64)
    }
}

/// Generates a heap of `nblocks` pages
///
/// Each page holds about `lambda_tuples` tuples; every column takes a
/// value in `0..cardinality` or is NULL with probability `null_ratio`.
/// Some pages are left empty so that vectors contain zero fills.
pub fn create_heap(
    nblocks: u32,
    lambda_tuples: f64,
    ncolumns: usize,
    cardinality: i64,
    null_ratio: f64,
    rng: &mut dyn RngCore,
) -> TestHeap {
    let poi = Poisson::new(lambda_tuples).unwrap();
    let mut heap = TestHeap::new("heap");

    for block in 0..nblocks {
        if rng.gen_bool(0.2) {
            continue;
        }

        let ntuples = (1 + poi.sample(rng) as u64).min(MAX_TUPLES_PER_PAGE);
        for offset in 1..=ntuples {
            let values = (0..ncolumns)
                .map(|_| {
                    if rng.gen_bool(null_ratio) {
                        None
                    } else {
                        Some(Datum::Int(rng.gen_range(0..cardinality)))
                    }
                })
                .collect();
            heap.push(ItemPointer::new(block, offset as OffsetNumber), values);
        }
    }

    heap
}
