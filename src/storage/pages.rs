//! On-disk page layouts
//!
//! All integers are stored big-endian.
//!
//! * metapage (block 0): magic, version, number of attributes, last LOV
//!   page, head of the directory chain, CBOR encoded options
//! * LOV pages: item count followed by fixed-size [`LovItem`] slots
//! * bitmap pages: next page of the vector, number of used words, header
//!   words then content words
//! * directory pages: next page, payload length, a chunk of the CBOR
//!   encoded LOV directory

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::base::{BlockNumber, HrlWord, BLCKSZ, HRL_WORD_SIZE, INVALID_BLOCK_NUMBER};
use crate::error::{BitmapError, Result};
use crate::hrl::{calc_h_words, header_bit};
use crate::lov::LovItem;
use crate::options::BitmapOptions;

pub const BITMAP_MAGIC: u32 = 0x424D_4150;
pub const BITMAP_VERSION: u32 = 2;

/// Block number of the metapage
pub const METAPAGE_BLOCK: BlockNumber = 0;

/// Content words held by one bitmap page
pub const BITMAP_PAGE_WORDS: usize = 1000;
const BITMAP_PAGE_HWORDS: usize = calc_h_words(BITMAP_PAGE_WORDS);
const BITMAP_PAGE_HEADER: usize = 8;

const _: () = assert!(
    BITMAP_PAGE_HEADER + 8 * (BITMAP_PAGE_HWORDS + BITMAP_PAGE_WORDS) <= BLCKSZ
);

const LOV_PAGE_HEADER: usize = 8;
const LOV_ITEM_SIZE: usize = 48;

/// Number of LOV item slots per LOV page
pub const LOV_ITEMS_PER_PAGE: usize = (BLCKSZ - LOV_PAGE_HEADER) / LOV_ITEM_SIZE;

const DIRECTORY_PAGE_HEADER: usize = 8;

/// Payload bytes held by one directory page
pub const DIRECTORY_PAGE_CAPACITY: usize = BLCKSZ - DIRECTORY_PAGE_HEADER;

#[inline]
fn block_to_disk(block: Option<BlockNumber>) -> u32 {
    block.unwrap_or(INVALID_BLOCK_NUMBER)
}

#[inline]
fn block_from_disk(block: u32) -> Option<BlockNumber> {
    if block == INVALID_BLOCK_NUMBER {
        None
    } else {
        Some(block)
    }
}

/*
 * ---- Metapage
 */

#[derive(Clone, Debug, PartialEq)]
pub struct MetaPage {
    pub version: u32,
    pub natts: u32,
    /// The LOV page receiving new items
    pub lov_last_page: BlockNumber,
    pub directory_head: Option<BlockNumber>,
    pub options: BitmapOptions,
}

impl MetaPage {
    pub fn new(natts: usize, lov_last_page: BlockNumber, options: BitmapOptions) -> Self {
        Self {
            version: BITMAP_VERSION,
            natts: natts as u32,
            lov_last_page,
            directory_head: None,
            options,
        }
    }

    pub fn encode(&self, page: &mut [u8]) -> Result<()> {
        let mut options = Vec::new();
        ciborium::ser::into_writer(&self.options, &mut options)
            .map_err(BitmapError::serialization)?;

        page.fill(0);
        let mut cursor = Cursor::new(page);
        cursor.write_u32::<BigEndian>(BITMAP_MAGIC)?;
        cursor.write_u32::<BigEndian>(self.version)?;
        cursor.write_u32::<BigEndian>(self.natts)?;
        cursor.write_u32::<BigEndian>(self.lov_last_page)?;
        cursor.write_u32::<BigEndian>(block_to_disk(self.directory_head))?;
        cursor.write_u32::<BigEndian>(options.len() as u32)?;
        cursor.write_all(&options)?;
        Ok(())
    }

    /// Decodes the metapage; the version is checked by the caller
    pub fn decode(page: &[u8]) -> Result<Self> {
        let mut reader = page;
        let magic = reader.read_u32::<BigEndian>()?;
        if magic != BITMAP_MAGIC {
            return Err(BitmapError::corrupted(
                METAPAGE_BLOCK,
                format!("bad magic number {:#x}", magic),
            ));
        }
        let version = reader.read_u32::<BigEndian>()?;
        let natts = reader.read_u32::<BigEndian>()?;
        let lov_last_page = reader.read_u32::<BigEndian>()?;
        let directory_head = block_from_disk(reader.read_u32::<BigEndian>()?);
        let options_len = reader.read_u32::<BigEndian>()? as usize;
        if options_len > reader.len() {
            return Err(BitmapError::corrupted(
                METAPAGE_BLOCK,
                "options overflow the page",
            ));
        }
        let options: BitmapOptions = ciborium::de::from_reader(&reader[..options_len])
            .map_err(BitmapError::serialization)?;
        options.validate()?;

        Ok(Self {
            version,
            natts,
            lov_last_page,
            directory_head,
            options,
        })
    }
}

/*
 * ---- LOV pages
 */

pub fn lov_page_init(page: &mut [u8]) {
    page.fill(0);
}

pub fn lov_page_nitems(page: &[u8]) -> usize {
    BigEndian::read_u32(&page[0..4]) as usize
}

/// Reserves the next slot of a LOV page; returns its (1-based) offset or
/// None when the page is full
pub fn lov_page_add_item(page: &mut [u8], item: &LovItem) -> Option<u16> {
    let nitems = lov_page_nitems(page);
    if nitems >= LOV_ITEMS_PER_PAGE {
        return None;
    }
    BigEndian::write_u32(&mut page[0..4], (nitems + 1) as u32);
    let offset = (nitems + 1) as u16;
    lov_page_write_item(page, offset, item);
    Some(offset)
}

fn lov_slot(offset: u16) -> usize {
    debug_assert!(offset >= 1 && offset as usize <= LOV_ITEMS_PER_PAGE);
    LOV_PAGE_HEADER + (offset as usize - 1) * LOV_ITEM_SIZE
}

pub fn lov_page_read_item(block: BlockNumber, page: &[u8], offset: u16) -> Result<LovItem> {
    if offset == 0 || offset as usize > lov_page_nitems(page) {
        return Err(BitmapError::corrupted(
            block,
            format!("no LOV item at offset {}", offset),
        ));
    }
    let slot = &page[lov_slot(offset)..lov_slot(offset) + LOV_ITEM_SIZE];
    Ok(LovItem {
        head: block_from_disk(BigEndian::read_u32(&slot[0..4])),
        tail: block_from_disk(BigEndian::read_u32(&slot[4..8])),
        last_compword: BigEndian::read_u64(&slot[8..16]),
        last_word: BigEndian::read_u64(&slot[16..24]),
        last_tid_location: BigEndian::read_u64(&slot[24..32]),
        last_setbit: BigEndian::read_u64(&slot[32..40]),
        words_header: slot[40],
    })
}

pub fn lov_page_write_item(page: &mut [u8], offset: u16, item: &LovItem) {
    let start = lov_slot(offset);
    let slot = &mut page[start..start + LOV_ITEM_SIZE];
    slot.fill(0);
    BigEndian::write_u32(&mut slot[0..4], block_to_disk(item.head));
    BigEndian::write_u32(&mut slot[4..8], block_to_disk(item.tail));
    BigEndian::write_u64(&mut slot[8..16], item.last_compword);
    BigEndian::write_u64(&mut slot[16..24], item.last_word);
    BigEndian::write_u64(&mut slot[24..32], item.last_tid_location);
    BigEndian::write_u64(&mut slot[32..40], item.last_setbit);
    slot[40] = item.words_header;
}

/*
 * ---- Bitmap pages
 */

/// A page of compressed words of one bitmap vector
#[derive(Clone, Debug, PartialEq)]
pub struct BitmapPage {
    pub next: Option<BlockNumber>,
    pub hwords: Vec<HrlWord>,
    pub cwords: Vec<HrlWord>,
}

impl Default for BitmapPage {
    fn default() -> Self {
        Self {
            next: None,
            hwords: vec![0; BITMAP_PAGE_HWORDS],
            cwords: Vec::new(),
        }
    }
}

impl BitmapPage {
    pub fn is_full(&self) -> bool {
        self.cwords.len() >= BITMAP_PAGE_WORDS
    }

    pub fn encode(&self, page: &mut [u8]) {
        page.fill(0);
        BigEndian::write_u32(&mut page[0..4], block_to_disk(self.next));
        BigEndian::write_u32(&mut page[4..8], self.cwords.len() as u32);
        let mut pos = BITMAP_PAGE_HEADER;
        for word in self.hwords.iter().chain(self.cwords.iter()) {
            BigEndian::write_u64(&mut page[pos..pos + 8], *word);
            pos += 8;
        }
    }

    pub fn decode(block: BlockNumber, page: &[u8]) -> Result<Self> {
        let next = bitmap_page_next(page);
        let used = BigEndian::read_u32(&page[4..8]) as usize;
        if used > BITMAP_PAGE_WORDS {
            return Err(BitmapError::corrupted(
                block,
                format!("{} words used in a bitmap page", used),
            ));
        }

        let read_words = |start: usize, count: usize| -> Vec<HrlWord> {
            (0..count)
                .map(|i| BigEndian::read_u64(&page[start + i * 8..start + i * 8 + 8]))
                .collect()
        };
        let hwords = read_words(BITMAP_PAGE_HEADER, BITMAP_PAGE_HWORDS);
        let cwords = read_words(BITMAP_PAGE_HEADER + BITMAP_PAGE_HWORDS * 8, used);

        Ok(Self {
            next,
            hwords,
            cwords,
        })
    }
}

pub fn bitmap_page_init(page: &mut [u8]) {
    page.fill(0);
    bitmap_page_set_next(page, None);
}

pub fn bitmap_page_next(page: &[u8]) -> Option<BlockNumber> {
    block_from_disk(BigEndian::read_u32(&page[0..4]))
}

pub fn bitmap_page_set_next(page: &mut [u8], next: Option<BlockNumber>) {
    BigEndian::write_u32(&mut page[0..4], block_to_disk(next));
}

/// Appends a word in place; returns false when the page is full
pub fn bitmap_page_append(page: &mut [u8], word: HrlWord, is_fill: bool) -> bool {
    let used = BigEndian::read_u32(&page[4..8]) as usize;
    if used >= BITMAP_PAGE_WORDS {
        return false;
    }

    let pos = BITMAP_PAGE_HEADER + (BITMAP_PAGE_HWORDS + used) * 8;
    BigEndian::write_u64(&mut page[pos..pos + 8], word);
    if is_fill {
        let hpos = BITMAP_PAGE_HEADER + (used / HRL_WORD_SIZE as usize) * 8;
        let hword = BigEndian::read_u64(&page[hpos..hpos + 8]) | header_bit(used);
        BigEndian::write_u64(&mut page[hpos..hpos + 8], hword);
    }
    BigEndian::write_u32(&mut page[4..8], (used + 1) as u32);
    true
}

/*
 * ---- Directory pages
 */

/// Writes a chunk of the directory payload
pub fn directory_page_encode(page: &mut [u8], next: Option<BlockNumber>, chunk: &[u8]) {
    debug_assert!(chunk.len() <= DIRECTORY_PAGE_CAPACITY);
    page.fill(0);
    BigEndian::write_u32(&mut page[0..4], block_to_disk(next));
    BigEndian::write_u32(&mut page[4..8], chunk.len() as u32);
    page[DIRECTORY_PAGE_HEADER..DIRECTORY_PAGE_HEADER + chunk.len()].copy_from_slice(chunk);
}

/// Appends the payload of a directory page to `payload` and returns the
/// next page of the chain
pub fn directory_page_decode(
    block: BlockNumber,
    page: &[u8],
    payload: &mut Vec<u8>,
) -> Result<Option<BlockNumber>> {
    let mut reader = page;
    let next = block_from_disk(reader.read_u32::<BigEndian>()?);
    let len = reader.read_u32::<BigEndian>()? as usize;
    if len > DIRECTORY_PAGE_CAPACITY {
        return Err(BitmapError::corrupted(
            block,
            format!("directory chunk of {} bytes", len),
        ));
    }
    let mut chunk = vec![0u8; len];
    reader.read_exact(&mut chunk)?;
    payload.extend_from_slice(&chunk);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrl::{make_fill_word, set_fill_word};

    #[test]
    fn test_metapage() {
        let mut page = vec![0u8; BLCKSZ];
        let mut meta = MetaPage::new(2, 1, BitmapOptions::default());
        meta.directory_head = Some(7);
        meta.options.batch_tids = 128;
        meta.encode(&mut page).expect("encode");

        let decoded = MetaPage::decode(&page).expect("decode");
        assert_eq!(decoded, meta);

        page[0] = 0;
        assert!(matches!(
            MetaPage::decode(&page),
            Err(BitmapError::Corrupted(0, _))
        ));

        // Out of range options are rejected when read back
        meta.options.interrupt_interval = 0;
        meta.encode(&mut page).expect("encode");
        assert!(matches!(
            MetaPage::decode(&page),
            Err(BitmapError::InvalidOption(_, _))
        ));
    }

    #[test]
    fn test_lov_page() {
        let mut page = vec![0u8; BLCKSZ];
        lov_page_init(&mut page);

        let mut item = LovItem::new();
        item.head = Some(4);
        item.tail = Some(9);
        item.last_setbit = 1234;

        for i in 0..LOV_ITEMS_PER_PAGE {
            assert_eq!(lov_page_add_item(&mut page, &item), Some(i as u16 + 1));
        }
        assert_eq!(lov_page_add_item(&mut page, &item), None);

        let read = lov_page_read_item(1, &page, 3).expect("item");
        assert_eq!(read, item);
        assert!(lov_page_read_item(1, &page, 0).is_err());
    }

    #[test]
    fn test_bitmap_page() {
        let mut bitmap = BitmapPage::default();
        bitmap.cwords = vec![make_fill_word(1, 12), 0xF0, make_fill_word(0, 3)];
        set_fill_word(&mut bitmap.hwords, 0);
        set_fill_word(&mut bitmap.hwords, 2);
        bitmap.next = Some(12);

        let mut page = vec![0u8; BLCKSZ];
        bitmap.encode(&mut page);
        assert_eq!(BitmapPage::decode(5, &page).expect("decode"), bitmap);

        let mut appended = vec![0u8; BLCKSZ];
        bitmap_page_init(&mut appended);
        bitmap_page_set_next(&mut appended, Some(12));
        assert!(bitmap_page_append(&mut appended, make_fill_word(1, 12), true));
        assert!(bitmap_page_append(&mut appended, 0xF0, false));
        assert!(bitmap_page_append(&mut appended, make_fill_word(0, 3), true));
        assert_eq!(appended, page);
    }

    #[test]
    fn test_full_bitmap_page() {
        let mut page = vec![0u8; BLCKSZ];
        bitmap_page_init(&mut page);
        for i in 0..BITMAP_PAGE_WORDS {
            assert!(bitmap_page_append(&mut page, i as HrlWord, i % 3 == 0));
        }
        assert!(!bitmap_page_append(&mut page, 1, false));

        let bitmap = BitmapPage::decode(1, &page).expect("decode");
        assert!(bitmap.is_full());
        assert_eq!(bitmap.next, None);
        assert_eq!(bitmap.cwords[999], 999);
        assert!(crate::hrl::is_fill_word(&bitmap.hwords, 999));
        assert!(!crate::hrl::is_fill_word(&bitmap.hwords, 998));
    }
}
