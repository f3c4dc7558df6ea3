//! Decoding position shared by the consumers of a batch

use crate::base::{HrlWord, HRL_WORD_SIZE};

use super::{fill_bit, fill_length, is_fill_word, BatchWords};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterateResult {
    /// Next tuple number. When decoding into page bitmaps this is the
    /// number of the next bit to decode; when expanding tuple numbers it
    /// is the number of tuples before the current position
    pub next_tid: u64,

    /// Current word of the batch
    pub last_scan_word_no: usize,

    /// Last bit (1-based) read in the current literal word, 0 when the
    /// word has not been started
    pub last_scan_pos: u8,

    /// Expanded tuple numbers and the position of the next one to return
    pub next_tids: Vec<u64>,
    pub next_tid_loc: usize,
}

impl IterateResult {
    pub fn new(next_tid: u64) -> Self {
        Self {
            next_tid,
            ..Default::default()
        }
    }

    #[inline]
    fn advance(&mut self, words: &mut BatchWords) {
        self.last_scan_word_no += 1;
        self.last_scan_pos = 0;
        words.nwords -= 1;
    }
}

/// Position (1 is the least significant bit) of the first set bit after
/// `last_pos`, or 0 if there is none
pub fn find_bitset(word: HrlWord, last_pos: u8) -> u8 {
    if last_pos as u64 >= HRL_WORD_SIZE {
        return 0;
    }
    let rest = word >> last_pos;
    if rest == 0 {
        0
    } else {
        last_pos + rest.trailing_zeros() as u8 + 1
    }
}

/// Expands at most `max_tids` tuple numbers from `words` into
/// `result.next_tids`
///
/// Ones fills are expanded one word at a time (decreasing the fill
/// length in place) and only when all the 64 tuple numbers fit; literal
/// words can be left in the middle and are resumed from
/// `result.last_scan_pos`.
pub fn find_next_tids(words: &mut BatchWords, result: &mut IterateResult, max_tids: usize) {
    result.next_tids.clear();
    result.next_tid_loc = 0;

    while words.nwords > 0 && result.next_tids.len() < max_tids {
        let wordno = result.last_scan_word_no;
        let word = words.cwords[wordno];
        let is_fill = is_fill_word(&words.hwords, wordno);
        let old_pos = result.last_scan_pos;

        if old_pos == 0 && ((is_fill && fill_bit(word) == 0) || word == 0) {
            // No match in these words
            result.next_tid += fill_length(word) * HRL_WORD_SIZE;
            result.advance(words);
            continue;
        }

        if is_fill {
            let mut remaining = fill_length(word);
            while result.next_tids.len() + HRL_WORD_SIZE as usize <= max_tids && remaining > 0 {
                let first = result.next_tid + 1;
                result.next_tid += HRL_WORD_SIZE;
                result.next_tids.extend(first..=result.next_tid);
                remaining -= 1;
                words.cwords[wordno] -= 1;
            }

            if remaining > 0 {
                break;
            }
            result.advance(words);
            continue;
        }

        let mut pos = old_pos;
        while result.next_tids.len() < max_tids {
            let found = find_bitset(word, pos);
            if found == 0 {
                result.next_tid += HRL_WORD_SIZE - pos as u64;
                result.advance(words);
                break;
            }
            result.next_tid += (found - pos) as u64;
            result.next_tids.push(result.next_tid);
            result.last_scan_pos = found;
            pos = found;
        }
    }
}

/// Returns the next tuple number, expanding a new set of them when the
/// previous one has been exhausted
pub fn find_next_tid(
    words: &mut BatchWords,
    result: &mut IterateResult,
    max_tids: usize,
) -> Option<u64> {
    if result.next_tid_loc >= result.next_tids.len() {
        find_next_tids(words, result, max_tids);
    }

    let tid = result.next_tids.get(result.next_tid_loc).copied();
    if tid.is_some() {
        result.next_tid_loc += 1;
    }
    tid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrl::make_fill_word;

    fn batch(words: &[(HrlWord, bool)]) -> BatchWords {
        let mut batch = BatchWords::new(16);
        for (word, is_fill) in words {
            batch.push(*word, *is_fill);
        }
        batch
    }

    #[test]
    fn test_find_bitset() {
        assert_eq!(find_bitset(0b1, 0), 1);
        assert_eq!(find_bitset(0b1, 1), 0);
        assert_eq!(find_bitset(0b10000, 3), 5);
        assert_eq!(find_bitset(1 << 63, 0), 64);
        assert_eq!(find_bitset(HrlWord::MAX, 64), 0);
    }

    #[test]
    fn test_expand() {
        let mut words = batch(&[
            (make_fill_word(0, 2), true),
            (0b101, false),
            (make_fill_word(1, 2), true),
        ]);
        let mut result = IterateResult::new(0);
        find_next_tids(&mut words, &mut result, 1000);

        let mut expected = vec![129, 131];
        expected.extend(193..=320);
        assert_eq!(result.next_tids, expected);
        assert_eq!(words.nwords, 0);
        assert_eq!(result.next_tid, 320);
    }

    #[test]
    fn test_resume() {
        let mut words = batch(&[(0b1011, false), (make_fill_word(1, 3), true)]);
        let mut result = IterateResult::new(0);

        // Stops inside the literal word
        find_next_tids(&mut words, &mut result, 2);
        assert_eq!(result.next_tids, vec![1, 2]);
        assert_eq!(result.last_scan_pos, 2);

        // The fill does not fit after the literal
        find_next_tids(&mut words, &mut result, 64);
        assert_eq!(result.next_tids, vec![4]);
        assert_eq!(result.next_tid, 64);

        // One word of the fill at a time
        find_next_tids(&mut words, &mut result, 66);
        assert_eq!(result.next_tids, (65..=128).collect::<Vec<_>>());
        assert_eq!(words.cwords[1], make_fill_word(1, 2));
        assert_eq!(words.nwords, 1);
    }

    #[test]
    fn test_next_tid() {
        let mut words = batch(&[(0b11, false)]);
        let mut result = IterateResult::new(0);
        assert_eq!(find_next_tid(&mut words, &mut result, 16), Some(1));
        assert_eq!(find_next_tid(&mut words, &mut result, 16), Some(2));
        assert_eq!(find_next_tid(&mut words, &mut result, 16), None);
    }
}
