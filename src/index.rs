//! Main data structure used to describe a bitmap index
//!
//! A [`BitmapIndex`] owns the pages of the index (through a
//! [`BufferPool`]) together with the decoded metapage and the LOV
//! directory, which maps each distinct key to its LOV item.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::base::{BlockNumber, IndexKey};
use crate::error::{BitmapError, Result};
use crate::lov::{LovDirectory, LovItem, LovLocation};
use crate::options::BitmapOptions;
use crate::storage::pages::{
    directory_page_decode, directory_page_encode, lov_page_add_item, lov_page_init,
    lov_page_read_item, lov_page_write_item, MetaPage, BITMAP_VERSION, DIRECTORY_PAGE_CAPACITY,
    METAPAGE_BLOCK,
};
use crate::storage::BufferPool;

struct IndexState {
    /// None until the index has been built
    meta: Option<MetaPage>,
    directory: LovDirectory,
    /// The directory changed since it was last written to its pages
    dirty: bool,
}

pub struct BitmapIndex {
    name: String,
    natts: usize,
    pool: BufferPool,
    state: Mutex<IndexState>,
}

impl BitmapIndex {
    /// Creates a new (unbuilt) index over `natts` attributes
    pub fn create(name: &str, natts: usize) -> Self {
        Self {
            name: name.to_string(),
            natts,
            pool: BufferPool::new(),
            state: Mutex::new(IndexState {
                meta: None,
                directory: LovDirectory::new(),
                dirty: false,
            }),
        }
    }

    /// Opens an index saved with [`BitmapIndex::save`]
    pub fn open(name: &str, path: &Path, in_memory: bool) -> Result<Self> {
        let pool = BufferPool::open(path, in_memory)?;

        if pool.nblocks() == 0 {
            return Err(BitmapError::Uninitialized(name.to_string()));
        }

        let meta = pool
            .read_buffer(METAPAGE_BLOCK)?
            .with_page(MetaPage::decode)??;
        if meta.version != BITMAP_VERSION {
            return Err(BitmapError::BadVersion(name.to_string(), meta.version));
        }

        let directory = load_directory(&pool, meta.directory_head)?;
        info!(
            "Opened bitmap index {} ({} keys, {} blocks)",
            name,
            directory.len(),
            pool.nblocks()
        );

        Ok(Self {
            name: name.to_string(),
            natts: meta.natts as usize,
            pool,
            state: Mutex::new(IndexState {
                meta: Some(meta),
                directory,
                dirty: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of indexed attributes
    pub fn natts(&self) -> usize {
        self.natts
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn nblocks(&self) -> BlockNumber {
        self.pool.nblocks()
    }

    pub fn is_built(&self) -> bool {
        self.lock().meta.is_some()
    }

    /// Number of distinct keys
    pub fn nkeys(&self) -> usize {
        self.lock().directory.len()
    }

    /// Options stored in the metapage
    pub fn options(&self) -> Result<BitmapOptions> {
        match &self.lock().meta {
            Some(meta) => Ok(meta.options.clone()),
            None => Err(BitmapError::Uninitialized(self.name.clone())),
        }
    }

    /// Writes the metapage and the first LOV page of an empty index
    pub fn init(&self, options: BitmapOptions) -> Result<()> {
        options.validate()?;
        if self.pool.nblocks() != 0 {
            return Err(BitmapError::IndexNotEmpty(self.name.clone()));
        }

        let metabuf = self.pool.extend()?;
        let lovbuf = self.pool.extend()?;
        lovbuf.with_page_mut(lov_page_init)?;

        let meta = MetaPage::new(self.natts, lovbuf.block_number(), options);
        metabuf.with_page_mut(|page| meta.encode(page))??;
        debug_assert_eq!(metabuf.block_number(), METAPAGE_BLOCK);

        let mut state = self.lock();
        state.meta = Some(meta);
        state.directory.clear();
        state.dirty = false;
        Ok(())
    }

    /// Takes over the pages and the directory of `built`, an index built
    /// separately; nothing changes if some page of this index is pinned
    pub fn replace_with(&self, built: BitmapIndex) -> Result<()> {
        if built.natts != self.natts {
            return Err(BitmapError::AttributeCount(self.natts, built.natts));
        }
        built.flush()?;

        let mut built_state = built.lock();
        let meta = match built_state.meta.take() {
            Some(meta) => meta,
            None => return Err(BitmapError::Uninitialized(built.name.clone())),
        };
        let directory = std::mem::take(&mut built_state.directory);

        self.pool.replace_with(&built.pool)?;
        info!(
            "Replaced the content of {} ({} keys, {} blocks)",
            self.name,
            directory.len(),
            self.pool.nblocks()
        );

        let mut state = self.lock();
        state.meta = Some(meta);
        state.directory = directory;
        state.dirty = false;
        Ok(())
    }

    /// Location of the LOV item of `key`
    pub fn lookup(&self, key: &IndexKey) -> Option<LovLocation> {
        self.lock().directory.get(key).copied()
    }

    /// Locations of the LOV items whose key satisfies `filter`, in key
    /// order
    pub fn find_keys<F>(&self, filter: F) -> Vec<LovLocation>
    where
        F: Fn(&IndexKey) -> bool,
    {
        self.lock()
            .directory
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(_, location)| *location)
            .collect()
    }

    pub fn read_lov_item(&self, location: LovLocation) -> Result<LovItem> {
        self.pool
            .read_buffer(location.block)?
            .with_page(|page| lov_page_read_item(location.block, page, location.offset))?
    }

    pub fn write_lov_item(&self, location: LovLocation, item: &LovItem) -> Result<()> {
        self.pool
            .read_buffer(location.block)?
            .with_page_mut(|page| lov_page_write_item(page, location.offset, item))
    }

    /// Adds a new (empty) LOV item for `key`
    pub fn add_lov_item(&self, key: IndexKey) -> Result<LovLocation> {
        let mut state = self.lock();
        let mut meta = match &state.meta {
            Some(meta) => meta.clone(),
            None => return Err(BitmapError::Uninitialized(self.name.clone())),
        };

        let item = LovItem::new();
        let block = meta.lov_last_page;
        let added = self
            .pool
            .read_buffer(block)?
            .with_page_mut(|page| lov_page_add_item(page, &item))?;

        let location = match added {
            Some(offset) => LovLocation { block, offset },
            None => {
                // The last LOV page is full
                let buffer = self.pool.extend()?;
                let offset = buffer.with_page_mut(|page| {
                    lov_page_init(page);
                    lov_page_add_item(page, &item)
                })?;
                let offset = offset.ok_or_else(|| {
                    BitmapError::corrupted(buffer.block_number(), "new LOV page is full")
                })?;

                meta.lov_last_page = buffer.block_number();
                write_meta(&self.pool, &meta)?;
                debug!("New LOV page {}", meta.lov_last_page);
                LovLocation {
                    block: meta.lov_last_page,
                    offset,
                }
            }
        };

        state.meta = Some(meta);
        state.directory.insert(key, location);
        state.dirty = true;
        Ok(location)
    }

    /// Writes the LOV directory (when changed) and the metapage
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }

        let mut meta = match &state.meta {
            Some(meta) => meta.clone(),
            None => return Err(BitmapError::Uninitialized(self.name.clone())),
        };

        meta.directory_head = write_directory(&self.pool, meta.directory_head, &state.directory)?;
        write_meta(&self.pool, &meta)?;
        debug!(
            "Flushed the directory ({} keys, head {:?})",
            state.directory.len(),
            meta.directory_head
        );

        state.meta = Some(meta);
        state.dirty = false;
        Ok(())
    }

    /// Flushes the index and writes all its pages to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.is_built() {
            return Err(BitmapError::Uninitialized(self.name.clone()));
        }
        self.flush()?;
        self.pool.save(path)
    }
}

fn write_meta(pool: &BufferPool, meta: &MetaPage) -> Result<()> {
    pool.read_buffer(METAPAGE_BLOCK)?
        .with_page_mut(|page| meta.encode(page))?
}

/// Blocks of the directory chain starting at `head`
fn directory_chain(pool: &BufferPool, head: Option<BlockNumber>) -> Result<Vec<BlockNumber>> {
    let mut blocks = Vec::new();
    let mut next = head;
    let mut payload = Vec::new();
    while let Some(block) = next {
        blocks.push(block);
        payload.clear();
        next = pool
            .read_buffer(block)?
            .with_page(|page| directory_page_decode(block, page, &mut payload))??;
    }
    Ok(blocks)
}

/// Writes the directory, reusing the pages of the previous chain; pages
/// not needed anymore are kept in the chain with an empty payload
fn write_directory(
    pool: &BufferPool,
    head: Option<BlockNumber>,
    directory: &LovDirectory,
) -> Result<Option<BlockNumber>> {
    let entries: Vec<(&IndexKey, &LovLocation)> = directory.iter().collect();
    let mut payload = Vec::new();
    ciborium::ser::into_writer(&entries, &mut payload).map_err(BitmapError::serialization)?;

    let mut blocks = directory_chain(pool, head)?;
    let nchunks = payload.len().div_ceil(DIRECTORY_PAGE_CAPACITY).max(1);
    while blocks.len() < nchunks {
        blocks.push(pool.extend()?.block_number());
    }

    for (ix, block) in blocks.iter().enumerate() {
        let start = (ix * DIRECTORY_PAGE_CAPACITY).min(payload.len());
        let end = ((ix + 1) * DIRECTORY_PAGE_CAPACITY).min(payload.len());
        let next = blocks.get(ix + 1).copied();
        pool.read_buffer(*block)?
            .with_page_mut(|page| directory_page_encode(page, next, &payload[start..end]))?;
    }

    Ok(blocks.first().copied())
}

fn load_directory(pool: &BufferPool, head: Option<BlockNumber>) -> Result<LovDirectory> {
    let mut payload = Vec::new();
    let mut next = head;
    while let Some(block) = next {
        next = pool
            .read_buffer(block)?
            .with_page(|page| directory_page_decode(block, page, &mut payload))??;
    }

    if payload.is_empty() {
        return Ok(LovDirectory::new());
    }

    let entries: Vec<(IndexKey, LovLocation)> =
        ciborium::de::from_reader(payload.as_slice()).map_err(BitmapError::serialization)?;
    Ok(entries.into_iter().collect())
}
