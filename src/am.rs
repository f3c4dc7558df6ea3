//! Access method entry points
//!
//! [`handler`] returns the routine table of the bitmap access method:
//! its capabilities and the object implementing [`IndexAccessMethod`].

use std::sync::Arc;

use derivative::Derivative;
use log::{info, warn};

use crate::base::{BlockNumber, Datum, ItemPointer};
use crate::error::{BitmapError, Result};
use crate::index::BitmapIndex;
use crate::insert::{doinsert, BuildState};
use crate::interrupt::Interrupts;
use crate::options::{parse_options, BitmapOptions};
use crate::scan::search::ScanDirection;
use crate::scan::{IndexScanDesc, ScanKey, StrategyNumber};
use crate::stream::index::get_bitmap;
use crate::stream::Bitmap;

/// Number of support functions of the B-tree operator classes (used by
/// bitmap indexes as well)
pub const BTREE_NPROCS: u16 = 3;

/// Information about the index being built
#[derive(Derivative, Clone, Debug)]
#[derivative(Default)]
pub struct IndexInfo {
    /// Heap attributes (starting at 1) of the index columns
    pub attributes: Vec<usize>,
    /// CREATE INDEX CONCURRENTLY
    pub concurrent: bool,
    pub options: BitmapOptions,
    pub interrupts: Interrupts,
}

/// The table being indexed
pub trait HeapRelation {
    fn name(&self) -> &str;

    /// Estimated number of tuples
    fn ntuples(&self) -> Option<u64> {
        None
    }

    /// Calls `callback` with the id and the indexed values of each live
    /// tuple; returns the number of heap tuples
    fn index_build_scan(
        &self,
        info: &IndexInfo,
        callback: &mut dyn FnMut(ItemPointer, &[Option<Datum>]) -> Result<()>,
    ) -> Result<f64>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexBuildResult {
    pub heap_tuples: f64,
    pub index_tuples: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexBulkDeleteResult {
    pub num_pages: BlockNumber,
    pub num_index_tuples: f64,
    pub tuples_removed: f64,
    pub pages_deleted: BlockNumber,
    pub pages_free: BlockNumber,
}

pub struct VacuumInfo<'a> {
    pub index: &'a BitmapIndex,
    pub heap: &'a dyn HeapRelation,
    pub index_info: &'a IndexInfo,
    pub num_heap_tuples: f64,
}

/// Planner estimate inputs
#[derive(Clone, Debug)]
pub struct IndexPath {
    pub index_pages: BlockNumber,
    pub index_tuples: f64,
    /// Fraction of the tuples selected by the quals
    pub selectivity: f64,
    pub nquals: usize,
    /// Number of times the scan is repeated
    pub loop_count: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexCost {
    pub startup_cost: f64,
    pub total_cost: f64,
    pub selectivity: f64,
    pub correlation: f64,
    pub pages: f64,
}

const RANDOM_PAGE_COST: f64 = 4.0;
const CPU_INDEX_TUPLE_COST: f64 = 0.005;
const CPU_OPERATOR_COST: f64 = 0.0025;

/// An operator of an operator class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpClassOperator {
    pub strategy: u16,
    pub left_type: String,
    pub right_type: String,
}

/// A support function of an operator class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpClassProc {
    pub number: u16,
    pub left_type: String,
    pub right_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpClass {
    pub name: String,
    pub input_type: String,
    pub operators: Vec<OpClassOperator>,
    pub procs: Vec<OpClassProc>,
}

/// The entry points of an index access method
pub trait IndexAccessMethod: Send + Sync {
    fn build(
        &self,
        heap: &dyn HeapRelation,
        index: &BitmapIndex,
        info: &IndexInfo,
    ) -> Result<IndexBuildResult>;

    fn build_empty(&self, index: &BitmapIndex, options: BitmapOptions) -> Result<()>;

    fn insert(
        &self,
        index: &BitmapIndex,
        values: &[Option<Datum>],
        tid: ItemPointer,
        heap: &dyn HeapRelation,
    ) -> Result<bool>;

    fn bulk_delete(
        &self,
        info: &VacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
    ) -> Result<IndexBulkDeleteResult>;

    fn vacuum_cleanup(
        &self,
        info: &VacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
    ) -> Result<IndexBulkDeleteResult>;

    fn cost_estimate(&self, path: &IndexPath) -> IndexCost;

    fn options(&self, reloptions: &[String], validate: bool) -> Result<BitmapOptions>;

    fn validate(&self, opclass: &OpClass) -> bool;

    fn begin_scan(&self, index: Arc<BitmapIndex>, keys: Vec<ScanKey>) -> Result<IndexScanDesc>;

    fn rescan(&self, scan: &mut IndexScanDesc, keys: Option<Vec<ScanKey>>) -> Result<()>;

    fn get_tuple(&self, scan: &mut IndexScanDesc, direction: ScanDirection) -> Result<bool>;

    fn get_bitmap(&self, scan: &mut IndexScanDesc, existing: Option<Bitmap>) -> Result<Bitmap>;

    fn end_scan(&self, scan: IndexScanDesc);

    fn mark_pos(&self, scan: &mut IndexScanDesc);

    fn restore_pos(&self, scan: &mut IndexScanDesc);
}

/// Capabilities and entry points of an access method
pub struct IndexAmRoutine {
    pub strategies: u16,
    pub support: u16,
    pub can_order: bool,
    pub can_order_by_op: bool,
    pub can_backward: bool,
    pub can_unique: bool,
    pub can_multicol: bool,
    pub optional_key: bool,
    pub search_array: bool,
    pub search_nulls: bool,
    pub storage: bool,
    pub clusterable: bool,
    pub predlocks: bool,
    pub am: Box<dyn IndexAccessMethod>,
}

/// The bitmap access method
pub fn handler() -> IndexAmRoutine {
    IndexAmRoutine {
        strategies: StrategyNumber::MAX,
        support: BTREE_NPROCS,
        can_order: false,
        can_order_by_op: false,
        can_backward: false,
        can_unique: true,
        can_multicol: true,
        optional_key: true,
        search_array: false,
        search_nulls: false,
        storage: false,
        clusterable: false,
        predlocks: false,
        am: Box::new(BitmapAccessMethod),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BitmapAccessMethod;

/// Builds a new index with the layout of `index` from the heap
///
/// The caller swaps it in with [`BitmapIndex::replace_with`], so a build
/// failing midway leaves `index` untouched.
fn build_separately(
    heap: &dyn HeapRelation,
    index: &BitmapIndex,
    info: &IndexInfo,
) -> Result<(BitmapIndex, IndexBuildResult)> {
    let built = BitmapIndex::create(index.name(), index.natts());
    built.init(info.options.clone())?;

    let mut state = BuildState::new(&built, info.interrupts.clone(), heap.ntuples())?;
    let reltuples = heap.index_build_scan(info, &mut |tid, values| {
        state.buildinsert(tid, values)
    })?;
    let ituples = state.finish()?;

    Ok((
        built,
        IndexBuildResult {
            heap_tuples: reltuples,
            index_tuples: ituples as f64,
        },
    ))
}

/// Builds the index again from the heap, with its stored options
fn reindex(index: &BitmapIndex, heap: &dyn HeapRelation, info: &IndexInfo) -> Result<()> {
    let mut info = info.clone();
    info.concurrent = false;
    if let Ok(options) = index.options() {
        info.options = options;
    }

    info!("Rebuilding bitmap index {}", index.name());
    let (built, _) = build_separately(heap, index, &info)?;
    index.replace_with(built)
}

impl IndexAccessMethod for BitmapAccessMethod {
    fn build(
        &self,
        heap: &dyn HeapRelation,
        index: &BitmapIndex,
        info: &IndexInfo,
    ) -> Result<IndexBuildResult> {
        if info.concurrent {
            return Err(BitmapError::ConcurrentBuild);
        }

        // Called exactly once
        if index.nblocks() != 0 {
            return Err(BitmapError::IndexNotEmpty(index.name().to_string()));
        }

        let (built, result) = build_separately(heap, index, info)?;
        index.replace_with(built)?;
        Ok(result)
    }

    fn build_empty(&self, index: &BitmapIndex, options: BitmapOptions) -> Result<()> {
        index.init(options)
    }

    fn insert(
        &self,
        index: &BitmapIndex,
        values: &[Option<Datum>],
        tid: ItemPointer,
        _heap: &dyn HeapRelation,
    ) -> Result<bool> {
        doinsert(index, tid, values)?;
        Ok(true)
    }

    /// No tuple is deleted: the index is rebuilt from the heap
    fn bulk_delete(
        &self,
        info: &VacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
    ) -> Result<IndexBulkDeleteResult> {
        let mut stats = stats.unwrap_or_default();
        reindex(info.index, info.heap, info.index_info)?;

        stats.num_pages = info.index.nblocks();
        // Everything has been rebuilt
        stats.num_index_tuples = info.num_heap_tuples;
        stats.tuples_removed = 0.;
        Ok(stats)
    }

    fn vacuum_cleanup(
        &self,
        info: &VacuumInfo,
        stats: Option<IndexBulkDeleteResult>,
    ) -> Result<IndexBulkDeleteResult> {
        let mut stats = stats.unwrap_or_default();
        stats.num_pages = info.index.nblocks();
        stats.pages_deleted = 0;
        stats.pages_free = 0;
        stats.num_index_tuples = info.num_heap_tuples;
        Ok(stats)
    }

    fn cost_estimate(&self, path: &IndexPath) -> IndexCost {
        let selectivity = path.selectivity.clamp(0., 1.);
        let num_index_tuples = (selectivity * path.index_tuples).round().max(1.);

        let pages = if path.index_tuples > 1. && path.index_pages > 1 {
            (num_index_tuples * path.index_pages as f64 / path.index_tuples).ceil()
        } else {
            1.
        };

        let loop_count = path.loop_count.max(1.);
        let io_cost = pages * RANDOM_PAGE_COST;
        let cpu_cost = num_index_tuples
            * (CPU_INDEX_TUPLE_COST + CPU_OPERATOR_COST * path.nquals as f64);

        IndexCost {
            startup_cost: 0.,
            total_cost: (io_cost + cpu_cost) * loop_count,
            selectivity,
            correlation: 0.,
            pages,
        }
    }

    fn options(&self, reloptions: &[String], validate: bool) -> Result<BitmapOptions> {
        parse_options(reloptions, validate)
    }

    /// Operator classes are the B-tree ones: every strategy is a B-tree
    /// strategy, every support function a B-tree one, and the
    /// comparison function as well as all the strategies exist for the
    /// input type
    fn validate(&self, opclass: &OpClass) -> bool {
        let mut result = true;

        for operator in opclass.operators.iter() {
            if operator.strategy < 1 || operator.strategy > StrategyNumber::MAX {
                warn!(
                    "bitmap operator class \"{}\" contains operator with invalid strategy number {}",
                    opclass.name, operator.strategy
                );
                result = false;
            }
        }

        for proc in opclass.procs.iter() {
            if proc.number < 1 || proc.number > BTREE_NPROCS {
                warn!(
                    "bitmap operator class \"{}\" contains function with invalid support number {}",
                    opclass.name, proc.number
                );
                result = false;
            }
        }

        let has_order_proc = opclass.procs.iter().any(|proc| {
            proc.number == 1
                && proc.left_type == opclass.input_type
                && proc.right_type == opclass.input_type
        });
        if !has_order_proc {
            warn!(
                "bitmap operator class \"{}\" is missing the comparison function for type {}",
                opclass.name, opclass.input_type
            );
            result = false;
        }

        for strategy in 1..=StrategyNumber::MAX {
            let found = opclass.operators.iter().any(|operator| {
                operator.strategy == strategy
                    && operator.left_type == opclass.input_type
                    && operator.right_type == opclass.input_type
            });
            if !found {
                warn!(
                    "bitmap operator class \"{}\" is missing operator with strategy {} for type {}",
                    opclass.name, strategy, opclass.input_type
                );
                result = false;
            }
        }

        result
    }

    fn begin_scan(&self, index: Arc<BitmapIndex>, keys: Vec<ScanKey>) -> Result<IndexScanDesc> {
        IndexScanDesc::begin(index, keys)
    }

    fn rescan(&self, scan: &mut IndexScanDesc, keys: Option<Vec<ScanKey>>) -> Result<()> {
        scan.rescan(keys)
    }

    fn get_tuple(&self, scan: &mut IndexScanDesc, direction: ScanDirection) -> Result<bool> {
        scan.get_tuple(direction)
    }

    fn get_bitmap(&self, scan: &mut IndexScanDesc, existing: Option<Bitmap>) -> Result<Bitmap> {
        get_bitmap(scan, existing)
    }

    fn end_scan(&self, scan: IndexScanDesc) {
        scan.end()
    }

    fn mark_pos(&self, scan: &mut IndexScanDesc) {
        scan.mark_pos()
    }

    fn restore_pos(&self, scan: &mut IndexScanDesc) {
        scan.restore_pos()
    }
}
