//! Index scans
//!
//! An [`IndexScanDesc`] holds the scan keys and two independent scan
//! positions: the current one and the marked one. Positions own pins on
//! the LOV pages of their vectors; copying a position pins the pages
//! again and dropping it releases exactly the pins it holds.

pub mod position;
pub mod search;

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::base::{Datum, IndexKey, ItemPointer};
use crate::error::{BitmapError, Result};
use crate::index::BitmapIndex;
use crate::interrupt::Interrupts;

pub use position::{BitmapVector, ScanPosition, VectorSet};

/// B-tree strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyNumber {
    Less = 1,
    LessEqual = 2,
    Equal = 3,
    GreaterEqual = 4,
    Greater = 5,
}

impl StrategyNumber {
    pub const MAX: u16 = 5;

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            StrategyNumber::Less => ordering == Ordering::Less,
            StrategyNumber::LessEqual => ordering != Ordering::Greater,
            StrategyNumber::Equal => ordering == Ordering::Equal,
            StrategyNumber::GreaterEqual => ordering != Ordering::Less,
            StrategyNumber::Greater => ordering == Ordering::Greater,
        }
    }
}

/// A condition `attribute <op> argument` on one indexed attribute
#[derive(Clone, Debug, PartialEq)]
pub struct ScanKey {
    /// Attribute number (starts at 1)
    pub attno: usize,
    pub strategy: StrategyNumber,
    pub argument: Datum,
}

impl ScanKey {
    pub fn new(attno: usize, strategy: StrategyNumber, argument: impl Into<Datum>) -> Self {
        Self {
            attno,
            strategy,
            argument: argument.into(),
        }
    }

    pub fn equal(attno: usize, argument: impl Into<Datum>) -> Self {
        Self::new(attno, StrategyNumber::Equal, argument)
    }

    /// Whether the values of `key` satisfy the condition (NULL never
    /// does)
    pub fn matches(&self, key: &IndexKey) -> bool {
        match key.get(self.attno - 1) {
            Some(Some(value)) => self.strategy.accepts(value.cmp(&self.argument)),
            _ => false,
        }
    }
}

fn check_keys(index: &BitmapIndex, keys: &[ScanKey]) -> Result<()> {
    for key in keys {
        if key.attno == 0 || key.attno > index.natts() {
            return Err(BitmapError::InvalidScanKey(key.attno, index.natts()));
        }
    }
    Ok(())
}

pub struct IndexScanDesc {
    pub index: Arc<BitmapIndex>,
    pub keys: Vec<ScanKey>,

    pub(crate) curr: Option<ScanPosition>,
    pub(crate) mark: Option<ScanPosition>,

    /// Whether the returned tuples have to be rechecked (never for this
    /// index)
    pub recheck: bool,
    /// The last tuple returned
    pub heap_tid: Option<ItemPointer>,

    pub interrupts: Interrupts,
}

impl IndexScanDesc {
    /// Starts a scan; no vector is read until the first tuple or bitmap
    /// is requested
    pub fn begin(index: Arc<BitmapIndex>, keys: Vec<ScanKey>) -> Result<Self> {
        check_keys(&index, &keys)?;
        Ok(Self {
            index,
            keys,
            curr: None,
            mark: None,
            recheck: false,
            heap_tid: None,
            interrupts: Interrupts::new(),
        })
    }

    /// Restarts the scan, with new keys if given
    pub fn rescan(&mut self, keys: Option<Vec<ScanKey>>) -> Result<()> {
        self.curr = None;
        self.mark = None;
        self.heap_tid = None;

        if let Some(keys) = keys {
            check_keys(&self.index, &keys)?;
            self.keys = keys;
        }
        Ok(())
    }

    /// Ends the scan, releasing the pins of both positions
    pub fn end(self) {
        debug!("Ending scan on {}", self.index.name());
    }

    pub fn current_position(&self) -> Option<&ScanPosition> {
        self.curr.as_ref()
    }

    pub fn marked_position(&self) -> Option<&ScanPosition> {
        self.mark.as_ref()
    }

    /// Saves the current position (the previous mark is released)
    pub fn mark_pos(&mut self) {
        self.mark = self.curr.clone();
    }

    /// Goes back to the marked position (the current one is released);
    /// the mark is kept
    pub fn restore_pos(&mut self) {
        self.curr = self.mark.clone();
    }

    /// A copy of the scan decoding independently from the current
    /// position; the copy holds its own pins and has no mark
    pub fn copy_scan_desc(&self) -> IndexScanDesc {
        IndexScanDesc {
            index: self.index.clone(),
            keys: self.keys.clone(),
            curr: self.curr.clone(),
            mark: None,
            recheck: self.recheck,
            heap_tid: self.heap_tid,
            interrupts: self.interrupts.clone(),
        }
    }

    /// Releases the pins of the current position, whose words can still
    /// be decoded
    pub fn release_lov_buffers(&mut self) {
        if let Some(position) = &mut self.curr {
            position.release_lov_buffers();
        }
    }
}
