//! Decoding compressed words into page bitmaps
//!
//! [`words_get_match`] decodes the words of a batch that cover one heap
//! block into a [`PagetableEntry`]. A batch rarely ends on a block
//! boundary: when the words run out before the end of the block, the
//! caller refills the batch and calls again with the same, partially
//! filled, entry.

use crate::base::{
    block_of, BlockNumber, TbmWord, HRL_WORD_SIZE, MAX_TUPLES_PER_PAGE, TBM_BITS_PER_BITMAPWORD,
};
use crate::hrl::{
    consume_fill_unit, fill_bit, fill_length, is_fill_word, BatchWords, IterateResult,
    LITERAL_ALL_ONE,
};
use crate::stream::PagetableEntry;

/// Number of HRL words in a page bitmap word
const HRL_WORDS_PER_TBM_WORD: usize = (TBM_BITS_PER_BITMAPWORD / HRL_WORD_SIZE) as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The entry holds the bitmap of `entry.blockno`
    Matched,
    /// The batch ran out of words before the end of the block
    NeedRefill,
}

/// Whether the entry passed to [`words_get_match`] is empty or holds the
/// beginning of a block decoded by a previous call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    Partial,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MatchState {
    /// Computing the bounds of the block
    Idle,
    /// Consuming the words before the block
    SkippingAhead,
    /// Copying the words of the block into the entry
    Decoding,
}

#[inline]
fn block_bounds(blockno: BlockNumber) -> (u64, u64) {
    (
        blockno as u64 * MAX_TUPLES_PER_PAGE + 1,
        (blockno as u64 + 1) * MAX_TUPLES_PER_PAGE,
    )
}

#[inline]
fn consume(words: &mut BatchWords, result: &mut IterateResult) {
    result.last_scan_word_no += 1;
    words.nwords -= 1;
}

/// Decodes the words of the block `blockno` into `entry`
///
/// Zero fills spanning past the block make the decoding jump to the
/// first block with possible matches, so `entry.blockno` can be greater
/// than `blockno` on return.
pub fn words_get_match(
    words: &mut BatchWords,
    result: &mut IterateResult,
    mut blockno: BlockNumber,
    entry: &mut PagetableEntry,
    entry_state: EntryState,
) -> MatchOutcome {
    let mut state = MatchState::Idle;
    let (mut start, mut end) = block_bounds(blockno);

    loop {
        match state {
            MatchState::Idle => {
                (start, end) = block_bounds(blockno);

                if result.next_tid > end {
                    return MatchOutcome::Matched;
                }

                if result.last_scan_word_no >= words.max_words {
                    result.last_scan_word_no = 0;
                    return if result.next_tid < end {
                        MatchOutcome::NeedRefill
                    } else {
                        MatchOutcome::Matched
                    };
                }

                debug_assert!(
                    result.next_tid >= start || (start - result.next_tid) % HRL_WORD_SIZE == 0
                );
                state = MatchState::SkippingAhead;
            }

            MatchState::SkippingAhead => {
                let mut moved = false;
                while words.nwords > 0 && result.next_tid < start {
                    let wordno = result.last_scan_word_no;
                    let word = words.cwords[wordno];

                    if !is_fill_word(&words.hwords, wordno) {
                        result.next_tid += HRL_WORD_SIZE;
                        consume(words, result);
                        continue;
                    }

                    let covered = fill_length(word).saturating_mul(HRL_WORD_SIZE);
                    if fill_bit(word) == 1 {
                        if start - result.next_tid >= covered {
                            result.next_tid += covered;
                            consume(words, result);
                        } else {
                            // Split the fill: only keep the part in the block
                            words.cwords[wordno] -= (start - result.next_tid) / HRL_WORD_SIZE;
                            result.next_tid = start;
                        }
                    } else {
                        consume(words, result);
                        let past_block = covered > end - result.next_tid;
                        result.next_tid = result.next_tid.saturating_add(covered);
                        if past_block {
                            blockno = block_of(result.next_tid);
                            moved = true;
                            break;
                        }
                    }
                }

                if moved {
                    state = MatchState::Idle;
                    continue;
                }

                if words.nwords == 0 {
                    result.last_scan_word_no = 0;
                    return MatchOutcome::NeedRefill;
                }

                let wordno = result.last_scan_word_no;
                let word = words.cwords[wordno];
                if is_fill_word(&words.hwords, wordno) && fill_bit(word) == 0 {
                    let covered = fill_length(word).saturating_mul(HRL_WORD_SIZE);
                    if covered > end - result.next_tid {
                        result.next_tid = result.next_tid.saturating_add(covered);
                        blockno = block_of(result.next_tid);
                        consume(words, result);

                        match entry_state {
                            EntryState::Fresh => {
                                state = MatchState::Idle;
                                continue;
                            }
                            EntryState::Partial => return MatchOutcome::Matched,
                        }
                    }
                }

                state = MatchState::Decoding;
            }

            MatchState::Decoding => {
                let mut new_word: TbmWord = 0;
                let mut hrl_word_no =
                    ((result.next_tid - start) / HRL_WORD_SIZE) as usize % HRL_WORDS_PER_TBM_WORD;
                let mut new_word_no = ((result.next_tid - start) / TBM_BITS_PER_BITMAPWORD) as usize;

                while words.nwords > 0 && result.next_tid < end {
                    let wordno = result.last_scan_word_no;
                    let word = words.cwords[wordno];
                    let shift = (hrl_word_no as u64 * HRL_WORD_SIZE) as u32;

                    if is_fill_word(&words.hwords, wordno) {
                        if fill_bit(word) == 1 {
                            new_word |= (LITERAL_ALL_ONE as TbmWord) << shift;
                        }
                        // One word of the fill at a time
                        if consume_fill_unit(&mut words.cwords[wordno]) {
                            consume(words, result);
                        }
                    } else {
                        new_word |= (word as TbmWord) << shift;
                        consume(words, result);
                    }

                    hrl_word_no = (hrl_word_no + 1) % HRL_WORDS_PER_TBM_WORD;
                    result.next_tid += HRL_WORD_SIZE;

                    if hrl_word_no == 0 {
                        entry.words[new_word_no] |= new_word;
                        new_word_no += 1;
                        new_word = 0;
                    }
                }

                if hrl_word_no != 0 {
                    entry.words[new_word_no] |= new_word;
                }

                entry.blockno = blockno;
                if words.nwords == 0 {
                    result.last_scan_word_no = 0;
                    if result.next_tid < end {
                        return MatchOutcome::NeedRefill;
                    }
                }
                return MatchOutcome::Matched;
            }
        }
    }
}

/// A page bitmap being decoded, possibly across several batches
#[derive(Clone, Debug)]
pub struct BlockMatcher {
    pub entry: PagetableEntry,
    pub state: EntryState,
}

impl BlockMatcher {
    pub fn new(blockno: BlockNumber) -> Self {
        Self {
            entry: PagetableEntry::new(blockno),
            state: EntryState::Fresh,
        }
    }

    /// Decodes the next words; after [`MatchOutcome::NeedRefill`] the
    /// entry is kept and continued by the next call (with a refilled
    /// batch)
    pub fn advance(
        &mut self,
        words: &mut BatchWords,
        result: &mut IterateResult,
        blockno: BlockNumber,
    ) -> MatchOutcome {
        let outcome = words_get_match(words, result, blockno, &mut self.entry, self.state);
        self.state = match outcome {
            MatchOutcome::Matched => EntryState::Fresh,
            MatchOutcome::NeedRefill => EntryState::Partial,
        };
        outcome
    }

    /// The block being decoded (it moves forward over zero fills)
    pub fn blockno(&self) -> BlockNumber {
        self.entry.blockno
    }
}
