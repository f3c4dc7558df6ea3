use std::fmt;

use serde::{Deserialize, Serialize};

pub type BlockNumber = u32;
pub type OffsetNumber = u16;

/// A compressed bitmap word (literal or fill)
pub type HrlWord = u64;

/// A word of an uncompressed page bitmap
pub type TbmWord = u64;

pub const INVALID_BLOCK_NUMBER: BlockNumber = BlockNumber::MAX;

/// Size of a page
pub const BLCKSZ: usize = 8192;

/// Number of bits in a HRL word
pub const HRL_WORD_SIZE: u64 = HrlWord::BITS as u64;

/// Number of bits in a page bitmap word
pub const TBM_BITS_PER_BITMAPWORD: u64 = TbmWord::BITS as u64;

/// Largest offset a heap page can hold; tuple numbers of block `b` range
/// over `b * MAX_TUPLES_PER_PAGE + 1 ..= (b + 1) * MAX_TUPLES_PER_PAGE`
pub const MAX_TUPLES_PER_PAGE: u64 = 32768;

/// Number of words in a page bitmap
pub const WORDS_PER_PAGE: usize = (MAX_TUPLES_PER_PAGE / TBM_BITS_PER_BITMAPWORD) as usize;

const _: () = assert!(MAX_TUPLES_PER_PAGE % HRL_WORD_SIZE == 0);
const _: () = assert!(HRL_WORD_SIZE <= TBM_BITS_PER_BITMAPWORD);

/// Block holding the tuple numbers just above `number`; saturates at
/// [`BlockNumber::MAX`] when the number lies past the last block
pub fn block_of(number: u64) -> BlockNumber {
    BlockNumber::try_from(number / MAX_TUPLES_PER_PAGE).unwrap_or(BlockNumber::MAX)
}

/// Address of a heap tuple
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemPointer {
    pub block: BlockNumber,
    pub offset: OffsetNumber,
}

impl ItemPointer {
    pub fn new(block: BlockNumber, offset: OffsetNumber) -> Self {
        Self { block, offset }
    }

    pub fn is_valid(&self) -> bool {
        self.offset >= 1 && (self.offset as u64) <= MAX_TUPLES_PER_PAGE
    }

    /// Position of the tuple in the linear tuple-id space (starts at 1)
    pub fn number(&self) -> u64 {
        (self.block as u64) * MAX_TUPLES_PER_PAGE + (self.offset as u64)
    }

    /// Inverse of [`ItemPointer::number`]
    pub fn from_number(number: u64) -> Self {
        debug_assert!(number > 0);
        Self {
            block: ((number - 1) / MAX_TUPLES_PER_PAGE) as BlockNumber,
            offset: ((number - 1) % MAX_TUPLES_PER_PAGE + 1) as OffsetNumber,
        }
    }
}

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

/// An attribute value
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datum {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Text(value.to_string())
    }
}

/// The indexed values of a tuple (`None` is SQL NULL); each distinct key
/// owns one bitmap vector
pub type IndexKey = Vec<Option<Datum>>;
