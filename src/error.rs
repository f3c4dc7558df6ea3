use thiserror::Error;

use crate::base::{BlockNumber, ItemPointer};

#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("CONCURRENTLY is not supported when creating bitmap indexes")]
    ConcurrentBuild,
    #[error("index \"{0}\" already contains data")]
    IndexNotEmpty(String),
    #[error("index \"{0}\" is not initialized")]
    Uninitialized(String),
    #[error("the disk format for \"{0}\" is not valid for this version (found {1})")]
    BadVersion(String, u32),
    #[error("non stream bitmap")]
    NonStreamBitmap,
    #[error("scan position uninitialized")]
    ScanPositionUninitialized,
    #[error("bitmap indexes only support forward scans")]
    BackwardScan,
    #[error("canceling statement due to user request")]
    Cancelled,
    #[error("invalid tuple id {0}")]
    InvalidTid(ItemPointer),
    #[error("scan key on attribute {0} but the index has {1} attributes")]
    InvalidScanKey(usize, usize),
    #[error("expected {0} attribute values, got {1}")]
    AttributeCount(usize, usize),
    #[error("unrecognized parameter \"{0}\"")]
    UnknownOption(String),
    #[error("invalid value for parameter \"{0}\": \"{1}\"")]
    InvalidOption(String, String),
    #[error("could not read block {0}: only {1} blocks")]
    BlockOutOfRange(BlockNumber, BlockNumber),
    #[error("corrupted page {0}: {1}")]
    Corrupted(BlockNumber, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BitmapError {
    pub fn corrupted(block: BlockNumber, message: impl ToString) -> Self {
        BitmapError::Corrupted(block, message.to_string())
    }

    pub fn serialization(message: impl ToString) -> Self {
        BitmapError::Serialization(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BitmapError>;
