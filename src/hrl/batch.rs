//! Batches of compressed words
//!
//! A [`BatchWords`] holds a window of HRL words read from one bitmap
//! vector (or produced by merging several of them) together with the
//! cursor state needed to decode it incrementally.

use crate::base::HrlWord;

use super::{
    calc_h_words, fill_bit, fill_length, is_fill_word, make_fill_word, set_fill_word,
    LITERAL_ALL_ZERO,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchWords {
    /// Content words
    pub cwords: Vec<HrlWord>,
    /// Header words (one bit per content word, set for fill words)
    pub hwords: Vec<HrlWord>,

    /// Number of words not yet consumed
    pub nwords: usize,
    pub max_words: usize,

    /// Position of the next word to read when merging batches
    pub start_no: usize,
    /// Number of uncompressed words consumed when merging batches
    pub nwordsread: u64,
    /// Uncompressed position (1-based) of the next word the merge reads
    pub nextread: u64,
}

impl BatchWords {
    pub fn new(max_words: usize) -> Self {
        Self {
            cwords: vec![0; max_words],
            hwords: vec![0; calc_h_words(max_words)],
            nwords: 0,
            max_words,
            start_no: 0,
            nwordsread: 0,
            nextread: 1,
        }
    }

    /// Empties the batch so that it can be refilled; merge positions are
    /// kept
    pub fn reset(&mut self) {
        self.start_no = 0;
        self.nwords = 0;
        self.hwords.fill(0);
    }

    /// Number of words stored since the last reset
    #[inline]
    fn len(&self) -> usize {
        self.start_no + self.nwords
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_words
    }

    /// Adds a word at the end of the batch
    pub fn push(&mut self, word: HrlWord, is_fill: bool) {
        let wordno = self.len();
        debug_assert!(wordno < self.max_words);
        self.cwords[wordno] = word;
        if is_fill {
            set_fill_word(&mut self.hwords, wordno);
        }
        self.nwords += 1;
    }

    #[inline]
    fn current_is_fill(&self) -> bool {
        is_fill_word(&self.hwords, self.start_no)
    }

    /// Consumes words until `nwordsread` reaches `nextread - 1`; a fill
    /// word straddling the position is shortened in place
    pub fn skip_to(&mut self, nextread: u64) {
        while self.nwords > 0 && self.nwordsread + 1 < nextread {
            let gap = nextread - self.nwordsread - 1;
            if self.current_is_fill() {
                let length = fill_length(self.cwords[self.start_no]);
                if length <= gap {
                    self.nwordsread += length;
                    self.start_no += 1;
                    self.nwords -= 1;
                } else {
                    self.cwords[self.start_no] -= gap;
                    self.nwordsread = nextread - 1;
                }
            } else {
                self.nwordsread += 1;
                self.start_no += 1;
                self.nwords -= 1;
            }
        }
    }

    /// ORs several batches aligned on their uncompressed positions into
    /// `result`, until `result` is full or one batch runs out of words
    ///
    /// Ones fills of any batch are copied as such, zero fills common to
    /// all the batches are copied with their shortest length, and the
    /// other words are ORed as literals. The position reached is stored
    /// in the `nextread` of every batch, the batches consuming their
    /// words lazily through [`BatchWords::skip_to`].
    pub fn union_into(batches: &mut [&mut BatchWords], result: &mut BatchWords) {
        let mut nextread = match batches.iter().map(|b| b.nextread).max() {
            Some(nextread) => nextread,
            None => return,
        };

        'merge: while !result.is_full() {
            let mut or_word = LITERAL_ALL_ZERO;
            let mut all_zero_fills = true;
            let mut zero_length = u64::MAX;
            let mut ones_length = None;

            for batch in batches.iter_mut() {
                batch.skip_to(nextread);
                if batch.nwords == 0 {
                    break 'merge;
                }

                let word = batch.cwords[batch.start_no];
                if batch.current_is_fill() {
                    let length = fill_length(word);
                    if fill_bit(word) == 1 {
                        all_zero_fills = false;
                        ones_length = Some(ones_length.map_or(length, |l: u64| l.max(length)));
                    } else {
                        zero_length = zero_length.min(length);
                    }
                } else {
                    all_zero_fills = false;
                    or_word |= word;
                }
            }

            let length = if all_zero_fills {
                result.push(make_fill_word(0, zero_length), true);
                zero_length
            } else if let Some(length) = ones_length {
                result.push(make_fill_word(1, length), true);
                length
            } else {
                result.push(or_word, false);
                1
            };
            nextread += length;
        }

        for batch in batches.iter_mut() {
            batch.nextread = nextread;
        }
    }
}
