//! Scan positions
//!
//! A scan position decodes the bitmap vectors of the keys matching the
//! scan. Each vector keeps its LOV page pinned and reads its compressed
//! words page by page, then the two words kept in the LOV item. With a
//! single vector, the words are decoded from the vector's own batch;
//! with several vectors, their batches are ORed into a merged batch.

use log::debug;

use crate::base::{BlockNumber, HrlWord};
use crate::error::Result;
use crate::hrl::{find_next_tids, is_fill_word, BatchWords, IterateResult};
use crate::lov::{LovItem, LovLocation};
use crate::matcher::{words_get_match, EntryState, MatchOutcome};
use crate::storage::pages::{lov_page_read_item, BitmapPage, BITMAP_PAGE_WORDS};
use crate::storage::{Buffer, BufferPool};
use crate::stream::PagetableEntry;

/// Decoding state of one bitmap vector
#[derive(Clone, Debug)]
pub struct BitmapVector {
    /// Pin on the LOV page holding the item of the vector; None when the
    /// release of the pin has been handed over to another scan
    pub lov_buffer: Option<Buffer>,
    pub lov_location: LovLocation,

    /// Next bitmap page to read
    pub next_block: Option<BlockNumber>,

    /// The last words kept in the LOV item have been read
    pub read_last_words: bool,

    pub batch: BatchWords,
}

impl BitmapVector {
    /// Pins the LOV page of the vector and positions it on its first
    /// bitmap page
    pub fn open(pool: &BufferPool, location: LovLocation) -> Result<Self> {
        let lov_buffer = pool.read_buffer(location.block)?;
        let item = lov_buffer
            .with_page(|page| lov_page_read_item(location.block, page, location.offset))??;

        Ok(Self {
            lov_buffer: Some(lov_buffer),
            lov_location: location,
            next_block: item.head,
            read_last_words: false,
            batch: BatchWords::new(BITMAP_PAGE_WORDS),
        })
    }

    /// All the words of the vector have been read
    pub fn is_finished(&self) -> bool {
        self.next_block.is_none() && self.read_last_words
    }

    fn read_item(&self, pool: &BufferPool) -> Result<LovItem> {
        let location = self.lov_location;
        let read = |page: &[u8]| lov_page_read_item(location.block, page, location.offset);
        match &self.lov_buffer {
            Some(buffer) => buffer.with_page(read)?,
            None => pool.read_buffer(location.block)?.with_page(read)?,
        }
    }

    /// Replaces the content of the batch with the next words of the
    /// vector
    pub fn read_words(&mut self, pool: &BufferPool) -> Result<()> {
        self.batch.reset();

        if let Some(block) = self.next_block {
            let page = pool
                .read_buffer(block)?
                .with_page(|page| BitmapPage::decode(block, page))??;
            for (wordno, word) in page.cwords.iter().enumerate() {
                self.batch.push(*word, is_fill_word(&page.hwords, wordno));
            }
            self.next_block = page.next;
            debug!(
                "Read {} words from bitmap page {} (next {:?})",
                page.cwords.len(),
                block,
                page.next
            );
        }

        if !self.read_last_words
            && self.next_block.is_none()
            && self.batch.nwords + 2 <= self.batch.max_words
        {
            let item = self.read_item(pool)?;
            if item.has_compword() {
                self.batch.push(item.last_compword, item.compword_is_fill());
            }
            self.batch.push(item.last_word, false);
            self.read_last_words = true;
        }

        Ok(())
    }
}

/// The vectors decoded by a scan position
#[derive(Clone, Debug)]
pub enum VectorSet {
    /// No key matches the scan
    Empty,
    /// Words are decoded straight from the batch of the vector
    Single(BitmapVector),
    /// The batches of the vectors are ORed into `merged`
    Multi {
        vectors: Vec<BitmapVector>,
        merged: BatchWords,
    },
}

impl VectorSet {
    pub fn new(mut vectors: Vec<BitmapVector>) -> Self {
        match vectors.len() {
            0 => VectorSet::Empty,
            1 => match vectors.pop() {
                Some(vector) => VectorSet::Single(vector),
                None => VectorSet::Empty,
            },
            _ => VectorSet::Multi {
                vectors,
                merged: BatchWords::new(BITMAP_PAGE_WORDS),
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorSet::Empty => 0,
            VectorSet::Single(_) => 1,
            VectorSet::Multi { vectors, .. } => vectors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &BitmapVector> + '_> {
        match self {
            VectorSet::Empty => Box::new(std::iter::empty()),
            VectorSet::Single(vector) => Box::new(std::iter::once(vector)),
            VectorSet::Multi { vectors, .. } => Box::new(vectors.iter()),
        }
    }

    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut BitmapVector> + '_> {
        match self {
            VectorSet::Empty => Box::new(std::iter::empty()),
            VectorSet::Single(vector) => Box::new(std::iter::once(vector)),
            VectorSet::Multi { vectors, .. } => Box::new(vectors.iter_mut()),
        }
    }
}

/// The complete resumable state of a scan
#[derive(Clone, Debug)]
pub struct ScanPosition {
    pub vectors: VectorSet,
    pub result: IterateResult,
    /// No more words can be read
    pub done: bool,
}

impl ScanPosition {
    pub fn new(vectors: Vec<BitmapVector>) -> Self {
        Self {
            vectors: VectorSet::new(vectors),
            result: IterateResult::new(0),
            done: false,
        }
    }

    /// The batch the words are decoded from
    pub fn batch_words(&self) -> Option<&BatchWords> {
        match &self.vectors {
            VectorSet::Empty => None,
            VectorSet::Single(vector) => Some(&vector.batch),
            VectorSet::Multi { merged, .. } => Some(merged),
        }
    }

    fn split_mut(&mut self) -> (Option<&mut BatchWords>, &mut IterateResult) {
        let words = match &mut self.vectors {
            VectorSet::Empty => None,
            VectorSet::Single(vector) => Some(&mut vector.batch),
            VectorSet::Multi { merged, .. } => Some(merged),
        };
        (words, &mut self.result)
    }

    /// Number of words left to decode in the current batch
    pub fn nwords(&self) -> usize {
        self.batch_words().map_or(0, |words| words.nwords)
    }

    /// Drops the pins on the LOV pages; a copy of the position holding
    /// its own pins keeps the pages pinned
    pub fn release_lov_buffers(&mut self) {
        for vector in self.vectors.iter_mut() {
            vector.lov_buffer = None;
        }
    }

    /// Makes sure that words are available for decoding, reading or
    /// merging new ones if needed; returns false once all the words have
    /// been consumed
    pub fn next_batch_words(&mut self, pool: &BufferPool) -> Result<bool> {
        if self.done {
            return Ok(false);
        }

        let available = match &mut self.vectors {
            VectorSet::Empty => false,

            VectorSet::Single(vector) => {
                if vector.batch.nwords > 0 {
                    return Ok(true);
                }
                if vector.is_finished() {
                    false
                } else {
                    vector.read_words(pool)?;
                    self.result.last_scan_word_no = 0;
                    vector.batch.nwords > 0
                }
            }

            VectorSet::Multi { vectors, merged } => {
                if merged.nwords > 0 {
                    return Ok(true);
                }

                // Catch up with the merge position, refilling the
                // batches emptied on the way
                loop {
                    let mut refilled = false;
                    for vector in vectors.iter_mut() {
                        vector.batch.skip_to(vector.batch.nextread);
                        if vector.batch.nwords == 0 && !vector.is_finished() {
                            vector.read_words(pool)?;
                            refilled = true;
                        }
                    }
                    if !refilled {
                        break;
                    }
                }

                merged.reset();
                self.result.last_scan_word_no = 0;
                let mut batches: Vec<&mut BatchWords> = vectors
                    .iter_mut()
                    .map(|vector| &mut vector.batch)
                    .filter(|batch| batch.nwords > 0)
                    .collect();
                BatchWords::union_into(&mut batches, merged);
                merged.nwords > 0
            }
        };

        if !available {
            self.done = true;
        }
        Ok(available)
    }

    /// Decodes the words of block `blockno` into `entry`
    pub fn get_match(
        &mut self,
        blockno: BlockNumber,
        entry: &mut PagetableEntry,
        state: EntryState,
    ) -> MatchOutcome {
        match self.split_mut() {
            (Some(words), result) => words_get_match(words, result, blockno, entry, state),
            (None, _) => MatchOutcome::NeedRefill,
        }
    }

    /// Expands the next tuple numbers of the batch
    pub fn find_next_tids(&mut self, max_tids: usize) {
        if let (Some(words), result) = self.split_mut() {
            find_next_tids(words, result, max_tids);
        }
    }

    /// The words of the current batch not yet decoded
    pub fn remaining_words(&self) -> Vec<(HrlWord, bool)> {
        match self.batch_words() {
            Some(words) => {
                let start = self.result.last_scan_word_no;
                (start..start + words.nwords)
                    .map(|i| (words.cwords[i], is_fill_word(&words.hwords, i)))
                    .collect()
            }
            None => Vec::new(),
        }
    }
}
