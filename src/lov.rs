//! List Of Values (LOV)
//!
//! Each distinct key of the index owns one LOV item, which locates its
//! bitmap vector: a chain of bitmap pages holding the complete compressed
//! words, followed by the last complete word and the last (partial)
//! literal word kept in the item itself.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::base::{BlockNumber, HrlWord, IndexKey, HRL_WORD_SIZE};
use crate::error::Result;
use crate::hrl::{
    fill_bit, fill_length, is_fill_word, make_fill_word, LITERAL_ALL_ONE, LITERAL_ALL_ZERO,
    MAX_FILL_LENGTH,
};
use crate::storage::pages::{
    bitmap_page_append, bitmap_page_init, bitmap_page_set_next, BitmapPage,
};
use crate::storage::BufferPool;

/// Flag of [`LovItem::words_header`]: the last complete word is a fill
pub const LAST_COMPWORD_IS_FILL: u8 = 2;

/// Position of a LOV item (offsets start at 1)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LovLocation {
    pub block: BlockNumber,
    pub offset: u16,
}

/// Maps each key to its LOV item
pub type LovDirectory = BTreeMap<IndexKey, LovLocation>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LovItem {
    /// First and last bitmap pages of the vector
    pub head: Option<BlockNumber>,
    pub tail: Option<BlockNumber>,

    /// Last complete word, not yet written to a bitmap page
    /// ([`LITERAL_ALL_ONE`] with a clear header when there is none)
    pub last_compword: HrlWord,

    /// Literal word covering the tuples after `last_tid_location`
    pub last_word: HrlWord,

    pub words_header: u8,

    /// Number of tuples covered by the bitmap pages and the last
    /// complete word
    pub last_tid_location: u64,

    /// Highest tuple number set in the vector
    pub last_setbit: u64,
}

impl Default for LovItem {
    fn default() -> Self {
        Self::new()
    }
}

impl LovItem {
    pub fn new() -> Self {
        Self {
            head: None,
            tail: None,
            last_compword: LITERAL_ALL_ONE,
            last_word: LITERAL_ALL_ZERO,
            words_header: 0,
            last_tid_location: 0,
            last_setbit: 0,
        }
    }

    #[inline]
    pub fn compword_is_fill(&self) -> bool {
        self.words_header & LAST_COMPWORD_IS_FILL != 0
    }

    #[inline]
    pub fn has_compword(&self) -> bool {
        self.compword_is_fill() || self.last_compword != LITERAL_ALL_ONE
    }

    /// Sets the bit of tuple `tid`, which must be above the last set bit
    pub fn append_tid(&mut self, pool: &BufferPool, tid: u64) -> Result<()> {
        debug_assert!(tid > self.last_setbit);

        if tid > self.last_tid_location + HRL_WORD_SIZE {
            let word = std::mem::take(&mut self.last_word);
            self.push_word(pool, word, false)?;
            self.last_tid_location += HRL_WORD_SIZE;

            let gap = (tid - self.last_tid_location - 1) / HRL_WORD_SIZE;
            if gap > 0 {
                self.push_fill(pool, 0, gap)?;
                self.last_tid_location += gap * HRL_WORD_SIZE;
            }
        }

        self.last_word |= 1 << (tid - self.last_tid_location - 1);
        self.last_setbit = tid;
        Ok(())
    }

    fn push_fill(&mut self, pool: &BufferPool, bit: u8, mut length: u64) -> Result<()> {
        while length > 0 {
            let chunk = length.min(MAX_FILL_LENGTH);
            self.push_word(pool, make_fill_word(bit, chunk), true)?;
            length -= chunk;
        }
        Ok(())
    }

    /// Appends a complete word to the vector; uniform literals become
    /// fills and consecutive fills of the same bit are merged
    fn push_word(&mut self, pool: &BufferPool, word: HrlWord, is_fill: bool) -> Result<()> {
        let (word, is_fill) = match (word, is_fill) {
            (_, true) => (word, true),
            (LITERAL_ALL_ZERO, false) => (make_fill_word(0, 1), true),
            (LITERAL_ALL_ONE, false) => (make_fill_word(1, 1), true),
            _ => (word, false),
        };

        if self.has_compword() {
            if is_fill
                && self.compword_is_fill()
                && fill_bit(self.last_compword) == fill_bit(word)
            {
                let length = fill_length(self.last_compword) + fill_length(word);
                if length <= MAX_FILL_LENGTH {
                    self.last_compword = make_fill_word(fill_bit(word), length);
                    return Ok(());
                }
            }
            self.flush_compword(pool)?;
        }

        self.last_compword = word;
        self.words_header = if is_fill { LAST_COMPWORD_IS_FILL } else { 0 };
        Ok(())
    }

    /// Writes the last complete word at the end of the bitmap page chain
    fn flush_compword(&mut self, pool: &BufferPool) -> Result<()> {
        let (word, is_fill) = (self.last_compword, self.compword_is_fill());

        let appended = match self.tail {
            Some(block) => pool
                .read_buffer(block)?
                .with_page_mut(|page| bitmap_page_append(page, word, is_fill))?,
            None => false,
        };

        if !appended {
            let buffer = pool.extend()?;
            let block = buffer.block_number();
            buffer.with_page_mut(|page| {
                bitmap_page_init(page);
                bitmap_page_append(page, word, is_fill)
            })?;

            match self.tail {
                Some(tail) => {
                    pool.read_buffer(tail)?
                        .with_page_mut(|page| bitmap_page_set_next(page, Some(block)))?;
                }
                None => self.head = Some(block),
            }
            self.tail = Some(block);
            debug!("New bitmap page {} (head {:?})", block, self.head);
        }

        self.last_compword = LITERAL_ALL_ONE;
        self.words_header = 0;
        Ok(())
    }

    /// All the words of the vector with their fill flag, in order
    pub fn words(&self, pool: &BufferPool) -> Result<Vec<(HrlWord, bool)>> {
        let mut words = Vec::new();
        let mut next = self.head;
        while let Some(block) = next {
            let page = pool
                .read_buffer(block)?
                .with_page(|page| BitmapPage::decode(block, page))??;
            words.extend(
                page.cwords
                    .iter()
                    .enumerate()
                    .map(|(i, word)| (*word, is_fill_word(&page.hwords, i))),
            );
            next = page.next;
        }

        if self.has_compword() {
            words.push((self.last_compword, self.compword_is_fill()));
        }
        words.push((self.last_word, false));
        Ok(words)
    }

    /// The tuple numbers set in the vector
    pub fn tids(&self, pool: &BufferPool) -> Result<Vec<u64>> {
        let mut tids = Vec::new();
        let mut location = 0u64;
        for (word, is_fill) in self.words(pool)? {
            if is_fill {
                let covered = fill_length(word) * HRL_WORD_SIZE;
                if fill_bit(word) == 1 {
                    tids.extend(location + 1..=location + covered);
                }
                location += covered;
            } else {
                tids.extend(
                    (0..HRL_WORD_SIZE)
                        .filter(|bit| word & (1 << bit) != 0)
                        .map(|bit| location + bit + 1),
                );
                location += HRL_WORD_SIZE;
            }
        }
        Ok(tids)
    }

    /// Adds a tuple number below the last set bit by re-encoding the whole
    /// vector into new bitmap pages; returns false if it was already set
    pub fn rewrite_with(&mut self, pool: &BufferPool, tid: u64) -> Result<bool> {
        let mut tids = self.tids(pool)?;
        match tids.binary_search(&tid) {
            Ok(_) => return Ok(false),
            Err(position) => tids.insert(position, tid),
        }

        debug!(
            "Rewriting a vector of {} tuples (previous head {:?})",
            tids.len(),
            self.head
        );
        let mut item = LovItem::new();
        for tid in tids {
            item.append_tid(pool, tid)?;
        }
        *self = item;
        Ok(true)
    }
}
