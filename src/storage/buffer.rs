//! Buffer pool with pinned page handles
//!
//! Pages are fixed-size blocks addressed by their block number. Every
//! [`Buffer`] handle holds one pin on its page: cloning a handle pins the
//! page once more and dropping it releases that pin, so a page stays
//! pinned exactly as long as some structure references it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use super::source::{MemorySource, MmapSource, PageSource};
use crate::base::{BlockNumber, BLCKSZ};
use crate::error::{BitmapError, Result};

struct Frame {
    /// Page content, loaded lazily when backed by a source
    data: Option<Box<[u8]>>,
    pins: usize,
}

impl Frame {
    fn zeroed() -> Self {
        Self {
            data: Some(vec![0u8; BLCKSZ].into_boxed_slice()),
            pins: 0,
        }
    }
}

struct PoolState {
    frames: Vec<Frame>,
    source: Option<Box<dyn PageSource>>,
}

impl PoolState {
    fn frame(&mut self, block: BlockNumber) -> Result<&mut Frame> {
        let nblocks = self.frames.len() as BlockNumber;
        let frame = self
            .frames
            .get_mut(block as usize)
            .ok_or(BitmapError::BlockOutOfRange(block, nblocks))?;

        if frame.data.is_none() {
            let mut data = vec![0u8; BLCKSZ].into_boxed_slice();
            if let Some(source) = &self.source {
                source.read_page(block, &mut data)?;
            }
            frame.data = Some(data);
        }
        Ok(frame)
    }
}

/// The pages of one index
#[derive(Clone)]
pub struct BufferPool {
    state: Arc<Mutex<PoolState>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// An empty pool (no blocks)
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                frames: Vec::new(),
                source: None,
            })),
        }
    }

    /// Opens saved pages, either fully read into memory or memory mapped
    /// (pages are then copied on first access)
    pub fn open(path: &Path, in_memory: bool) -> Result<Self> {
        let source: Box<dyn PageSource> = if in_memory {
            Box::new(MemorySource::new(path)?)
        } else {
            Box::new(MmapSource::new(path)?)
        };

        let nblocks = source.nblocks();
        info!(
            "Opening {} ({} blocks, in memory: {})",
            path.display(),
            nblocks,
            in_memory
        );

        let frames = (0..nblocks)
            .map(|_| Frame {
                data: None,
                pins: 0,
            })
            .collect();

        Ok(Self {
            state: Arc::new(Mutex::new(PoolState {
                frames,
                source: Some(source),
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes all the pages to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        let nblocks = state.frames.len() as BlockNumber;
        let mut writer = BufWriter::new(File::create(path)?);
        for block in 0..nblocks {
            let frame = state.frame(block)?;
            if let Some(data) = &frame.data {
                writer.write_all(data)?;
            }
        }
        writer.flush()?;
        info!("Saved {} blocks to {}", nblocks, path.display());
        Ok(())
    }

    pub fn nblocks(&self) -> BlockNumber {
        self.lock().frames.len() as BlockNumber
    }

    /// Pins the page `block`
    pub fn read_buffer(&self, block: BlockNumber) -> Result<Buffer> {
        let mut state = self.lock();
        state.frame(block)?.pins += 1;
        Ok(Buffer {
            pool: self.clone(),
            block,
        })
    }

    /// Adds a zeroed page at the end and pins it
    pub fn extend(&self) -> Result<Buffer> {
        let mut state = self.lock();
        let block = state.frames.len() as BlockNumber;
        let mut frame = Frame::zeroed();
        frame.pins = 1;
        state.frames.push(frame);
        debug!("Extended the pool to {} blocks", block + 1);
        Ok(Buffer {
            pool: self.clone(),
            block,
        })
    }

    /// Replaces every page with a copy of the pages of `other`; fails if
    /// some page is still pinned
    pub fn replace_with(&self, other: &BufferPool) -> Result<()> {
        let frames = {
            let mut other_state = other.lock();
            let nblocks = other_state.frames.len() as BlockNumber;
            let mut frames = Vec::with_capacity(nblocks as usize);
            for block in 0..nblocks {
                let data = other_state.frame(block)?.data.clone();
                frames.push(Frame { data, pins: 0 });
            }
            frames
        };

        let mut state = self.lock();
        if let Some((block, _)) = state
            .frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.pins > 0)
        {
            return Err(BitmapError::corrupted(
                block as BlockNumber,
                "cannot replace a pinned page",
            ));
        }
        debug!("Replacing {} blocks by {}", state.frames.len(), frames.len());
        state.frames = frames;
        state.source = None;
        Ok(())
    }

    /// Number of pins held on `block` (0 for unknown blocks)
    pub fn pin_count(&self, block: BlockNumber) -> usize {
        self.lock()
            .frames
            .get(block as usize)
            .map_or(0, |frame| frame.pins)
    }

    /// Total number of pins held on the pool pages
    pub fn total_pins(&self) -> usize {
        self.lock().frames.iter().map(|frame| frame.pins).sum()
    }

    fn pin(&self, block: BlockNumber) {
        if let Some(frame) = self.lock().frames.get_mut(block as usize) {
            frame.pins += 1;
        }
    }

    fn unpin(&self, block: BlockNumber) {
        if let Some(frame) = self.lock().frames.get_mut(block as usize) {
            debug_assert!(frame.pins > 0, "page {} is not pinned", block);
            frame.pins = frame.pins.saturating_sub(1);
        }
    }
}

/// A pinned page
pub struct Buffer {
    pool: BufferPool,
    block: BlockNumber,
}

impl Buffer {
    pub fn block_number(&self) -> BlockNumber {
        self.block
    }

    pub fn with_page<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let mut state = self.pool.lock();
        let frame = state.frame(self.block)?;
        match &frame.data {
            Some(data) => Ok(f(data)),
            None => Err(BitmapError::corrupted(self.block, "page not loaded")),
        }
    }

    pub fn with_page_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut state = self.pool.lock();
        let frame = state.frame(self.block)?;
        match &mut frame.data {
            Some(data) => Ok(f(data)),
            None => Err(BitmapError::corrupted(self.block, "page not loaded")),
        }
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.pool.pin(self.block);
        Self {
            pool: self.pool.clone(),
            block: self.block,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.pool.unpin(self.block);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer({})", self.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    #[test]
    fn test_pins() {
        let pool = BufferPool::new();
        let buffer = pool.extend().expect("extend");
        assert_eq!(buffer.block_number(), 0);
        assert_eq!(pool.pin_count(0), 1);

        let copy = buffer.clone();
        assert_eq!(pool.pin_count(0), 2);
        drop(buffer);
        assert_eq!(pool.pin_count(0), 1);

        let empty = BufferPool::new();
        assert!(matches!(
            pool.replace_with(&empty),
            Err(BitmapError::Corrupted(0, _))
        ));
        drop(copy);
        assert_eq!(pool.total_pins(), 0);

        assert!(matches!(
            pool.read_buffer(3),
            Err(BitmapError::BlockOutOfRange(3, 1))
        ));
        pool.replace_with(&empty).expect("no pins left");
        assert_eq!(pool.nblocks(), 0);
    }

    #[test]
    fn test_save_and_open() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("pages");

        let pool = BufferPool::new();
        for value in 0..3u8 {
            let buffer = pool.extend().expect("extend");
            buffer
                .with_page_mut(|page| page[17] = value + 1)
                .expect("page");
        }
        pool.save(&path).expect("save");

        for in_memory in [true, false] {
            let reopened = BufferPool::open(&path, in_memory).expect("open");
            assert_eq!(reopened.nblocks(), 3);
            let buffer = reopened.read_buffer(2).expect("read");
            assert_eq!(buffer.with_page(|page| page[17]).expect("page"), 3);
        }
    }
}
