//! Building and updating bitmap vectors
//!
//! During a build, tuple ids are buffered per key and appended to their
//! vector in increasing order once enough of them have been collected.
//! Inserting a tuple id below the last bit set in its vector re-encodes
//! that vector.

use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::base::{Datum, IndexKey, ItemPointer};
use crate::error::{BitmapError, Result};
use crate::index::BitmapIndex;
use crate::interrupt::Interrupts;
use crate::options::BitmapOptions;

const DEFAULT_PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})";

fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(DEFAULT_PROGRESS_TEMPLATE)
        .progress_chars("=> ")
}

fn index_key(index: &BitmapIndex, values: &[Option<Datum>]) -> Result<IndexKey> {
    if values.len() != index.natts() {
        return Err(BitmapError::AttributeCount(index.natts(), values.len()));
    }
    Ok(values.to_vec())
}

fn tid_number(tid: ItemPointer) -> Result<u64> {
    if tid.is_valid() {
        Ok(tid.number())
    } else {
        Err(BitmapError::InvalidTid(tid))
    }
}

/// Sets the tuple numbers `tids` (sorted) in the vector of `key`
fn insert_tids(index: &BitmapIndex, key: IndexKey, tids: &[u64]) -> Result<()> {
    let location = match index.lookup(&key) {
        Some(location) => location,
        None => index.add_lov_item(key)?,
    };

    let pool = index.pool();
    let mut item = index.read_lov_item(location)?;
    for tid in tids {
        if *tid > item.last_setbit {
            item.append_tid(pool, *tid)?;
        } else {
            item.rewrite_with(pool, *tid)?;
        }
    }
    index.write_lov_item(location, &item)
}

/// Inserts one tuple in a built index
pub fn doinsert(index: &BitmapIndex, tid: ItemPointer, values: &[Option<Datum>]) -> Result<()> {
    let key = index_key(index, values)?;
    let number = tid_number(tid)?;
    insert_tids(index, key, &[number])?;
    index.flush()
}

/// State of an index build
pub struct BuildState<'a> {
    index: &'a BitmapIndex,
    options: BitmapOptions,
    interrupts: Interrupts,

    /// Tuple numbers not yet written, per key
    buffers: BTreeMap<IndexKey, Vec<u64>>,
    nbuffered: usize,

    /// Number of tuples inserted
    pub ituples: u64,

    progress: Option<ProgressBar>,
}

impl<'a> BuildState<'a> {
    /// `expected` is the number of tuples the build should process (used
    /// for progress reporting)
    pub fn new(
        index: &'a BitmapIndex,
        interrupts: Interrupts,
        expected: Option<u64>,
    ) -> Result<Self> {
        let options = index.options()?;
        let progress = if options.show_progress {
            let progress = ProgressBar::new(expected.unwrap_or(0));
            progress.set_style(pb_style());
            Some(progress)
        } else {
            None
        };

        Ok(Self {
            index,
            options,
            interrupts,
            buffers: BTreeMap::new(),
            nbuffered: 0,
            ituples: 0,
            progress,
        })
    }

    /// Adds a heap tuple to the index
    pub fn buildinsert(&mut self, tid: ItemPointer, values: &[Option<Datum>]) -> Result<()> {
        let key = index_key(self.index, values)?;
        let number = tid_number(tid)?;

        self.buffers.entry(key).or_default().push(number);
        self.nbuffered += 1;
        if self.nbuffered >= self.options.tid_buffer_threshold {
            self.flush_buffers()?;
        }

        self.ituples += 1;
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }
        if self.ituples % self.options.interrupt_interval == 0 {
            self.interrupts.check()?;
        }
        Ok(())
    }

    /// Writes the buffered tuple ids to their vectors
    pub fn flush_buffers(&mut self) -> Result<()> {
        if self.nbuffered == 0 {
            return Ok(());
        }
        debug!(
            "Flushing {} tuple ids over {} keys",
            self.nbuffered,
            self.buffers.len()
        );

        for (key, mut tids) in std::mem::take(&mut self.buffers) {
            tids.sort_unstable();
            tids.dedup();
            insert_tids(self.index, key, &tids)?;
        }
        self.nbuffered = 0;
        Ok(())
    }

    /// Ends the build; returns the number of tuples inserted
    pub fn finish(mut self) -> Result<u64> {
        self.flush_buffers()?;
        self.index.flush()?;
        if let Some(progress) = &self.progress {
            progress.finish();
        }
        info!(
            "Built bitmap index {}: {} tuples, {} keys, {} blocks",
            self.index.name(),
            self.ituples,
            self.index.nkeys(),
            self.index.nblocks()
        );
        Ok(self.ituples)
    }
}
