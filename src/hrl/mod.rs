//! Hybrid Run-Length (HRL) word encoding
//!
//! A bitmap vector is a sequence of 64-bit words. Each word is either a
//! *literal* (bit `i` stands for one tuple) or a *fill* word standing for
//! a run of words that are all zeros or all ones. Whether the word at
//! position `i` is a fill is not stored in the word itself but in a
//! separate header bitmap (`hwords`), bit `i % 64` of header word `i / 64`
//! (most significant bit first).
//!
//! Fill word layout: the highest bit is the fill bit, the 63 remaining
//! bits hold the run length in words. A fill word equal to `0` is read as
//! a zero-fill of length 1.

pub mod batch;
pub mod tids;

pub use batch::BatchWords;
pub use tids::{find_next_tid, find_next_tids, IterateResult};

use crate::base::{HrlWord, HRL_WORD_SIZE};

pub const LITERAL_ALL_ZERO: HrlWord = 0;
pub const LITERAL_ALL_ONE: HrlWord = HrlWord::MAX;

const FILL_BIT_MASK: HrlWord = 1 << (HRL_WORD_SIZE - 1);

/// Longest run a single fill word can hold
pub const MAX_FILL_LENGTH: HrlWord = FILL_BIT_MASK - 1;

/// Number of header words needed for `nwords` content words
#[inline]
pub const fn calc_h_words(nwords: usize) -> usize {
    if nwords == 0 {
        0
    } else {
        (nwords - 1) / HRL_WORD_SIZE as usize + 1
    }
}

/// The header bit flagging word `wordno` as a fill word
#[inline]
pub const fn header_bit(wordno: usize) -> HrlWord {
    1 << (HRL_WORD_SIZE as usize - 1 - wordno % HRL_WORD_SIZE as usize)
}

#[inline]
pub fn is_fill_word(hwords: &[HrlWord], wordno: usize) -> bool {
    hwords[wordno / HRL_WORD_SIZE as usize] & header_bit(wordno) != 0
}

#[inline]
pub fn set_fill_word(hwords: &mut [HrlWord], wordno: usize) {
    hwords[wordno / HRL_WORD_SIZE as usize] |= header_bit(wordno);
}

#[inline]
pub fn clear_fill_word(hwords: &mut [HrlWord], wordno: usize) {
    hwords[wordno / HRL_WORD_SIZE as usize] &= !header_bit(wordno);
}

/// The repeated bit of a fill word (0 or 1)
#[inline]
pub const fn fill_bit(word: HrlWord) -> u8 {
    (word >> (HRL_WORD_SIZE - 1)) as u8
}

/// Raw length field of a fill word
#[inline]
pub const fn raw_fill_length(word: HrlWord) -> HrlWord {
    word & MAX_FILL_LENGTH
}

/// Run length of a fill word, in words (`0` is a zero-fill of length 1)
#[inline]
pub const fn fill_length(word: HrlWord) -> u64 {
    if word == 0 {
        1
    } else {
        raw_fill_length(word)
    }
}

#[inline]
pub const fn make_fill_word(bit: u8, length: u64) -> HrlWord {
    debug_assert!(length <= MAX_FILL_LENGTH);
    ((bit as HrlWord) << (HRL_WORD_SIZE - 1)) | length
}

/// Consumes one word of a fill run in place; returns true when the run
/// is exhausted (and the caller has to move to the next word)
#[inline]
pub fn consume_fill_unit(word: &mut HrlWord) -> bool {
    if fill_length(*word) <= 1 {
        true
    } else {
        *word -= 1;
        false
    }
}
