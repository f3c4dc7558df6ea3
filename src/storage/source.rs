//! Backing stores for the pages of a saved index

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::base::{BlockNumber, BLCKSZ};
use crate::error::{BitmapError, Result};

/// A read-only source of pages
pub trait PageSource: Send + Sync {
    fn data(&'_ self) -> &'_ [u8];

    fn nblocks(&self) -> BlockNumber {
        (self.data().len() / BLCKSZ) as BlockNumber
    }

    /// Copies the page `block` into `buf`
    fn read_page(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        let start = block as usize * BLCKSZ;
        let data = self.data();
        if start + BLCKSZ > data.len() {
            return Err(BitmapError::BlockOutOfRange(block, self.nblocks()));
        }
        buf.copy_from_slice(&data[start..start + BLCKSZ]);
        Ok(())
    }
}

fn check_size(path: &Path, len: usize) -> Result<()> {
    if len % BLCKSZ != 0 {
        return Err(BitmapError::serialization(format!(
            "{} is not a sequence of {} byte pages ({} bytes)",
            path.display(),
            BLCKSZ,
            len
        )));
    }
    Ok(())
}

/// Stores the pages in memory
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(path: &Path) -> Result<Self> {
        let mut file = File::options().read(true).open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        check_size(path, data.len())?;

        Ok(Self { data })
    }
}

impl PageSource for MemorySource {
    fn data(&'_ self) -> &'_ [u8] {
        &self.data
    }
}

/// Uses a memory map
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::options().read(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        check_size(path, mmap.len())?;
        Ok(Self { mmap })
    }
}

impl PageSource for MmapSource {
    fn data(&'_ self) -> &'_ [u8] {
        &self.mmap
    }
}
