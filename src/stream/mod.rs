//! Streamed bitmaps
//!
//! A [`StreamBitmap`] is a tree of streams: leaves produce the page
//! bitmaps of one index scan (or of a materialised [`TidBitmap`]), inner
//! nodes combine their inputs with AND or OR. Pages are produced lazily,
//! in increasing block order, by pulling on the iterators of the tree.

pub mod index;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::base::{
    BlockNumber, ItemPointer, OffsetNumber, TbmWord, TBM_BITS_PER_BITMAPWORD, WORDS_PER_PAGE,
};
use crate::error::{BitmapError, Result};

/// The bitmap of the tuples of one heap page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagetableEntry {
    pub blockno: BlockNumber,
    /// Bit `k` of word `w` stands for the offset `w * 64 + k + 1`
    pub words: [TbmWord; WORDS_PER_PAGE],
}

impl PagetableEntry {
    pub fn new(blockno: BlockNumber) -> Self {
        Self {
            blockno,
            words: [0; WORDS_PER_PAGE],
        }
    }

    pub fn reset(&mut self, blockno: BlockNumber) {
        self.blockno = blockno;
        self.words.fill(0);
    }

    #[inline]
    fn position(offset: OffsetNumber) -> (usize, u64) {
        debug_assert!(offset >= 1);
        let bit = (offset - 1) as u64;
        (
            (bit / TBM_BITS_PER_BITMAPWORD) as usize,
            bit % TBM_BITS_PER_BITMAPWORD,
        )
    }

    pub fn set(&mut self, offset: OffsetNumber) {
        let (word, bit) = Self::position(offset);
        self.words[word] |= 1 << bit;
    }

    pub fn contains(&self, offset: OffsetNumber) -> bool {
        let (word, bit) = Self::position(offset);
        self.words[word] & (1 << bit) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn ntuples(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The offsets set in this page, in increasing order
    pub fn offsets(&self) -> Vec<OffsetNumber> {
        let mut offsets = Vec::new();
        for (wordnum, word) in self.words.iter().enumerate() {
            let mut w = *word;
            while w != 0 {
                let bit = w.trailing_zeros() as u64;
                offsets.push((wordnum as u64 * TBM_BITS_PER_BITMAPWORD + bit + 1) as OffsetNumber);
                w &= w - 1;
            }
        }
        offsets
    }

    pub fn union_with(&mut self, other: &PagetableEntry) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
    }

    pub fn intersect_with(&mut self, other: &PagetableEntry) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= *o;
        }
    }
}

/// Kind of a stream node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    Index,
    And,
    Or,
}

/// Producer of the page bitmaps of one iteration
pub trait StreamPull: Send {
    /// Produces in `entry` the next page at or after `next_block`, and
    /// moves `next_block` past it; returns false when exhausted
    fn pull(&mut self, next_block: &mut BlockNumber, entry: &mut PagetableEntry) -> Result<bool>;
}

/// A leaf of a stream tree
pub trait IndexStream: Send + Sync {
    /// Starts a new, independent iteration
    fn begin_iterate(&self) -> Result<Box<dyn StreamPull>>;
}

pub struct OpStream {
    pub kind: StreamType,
    pub inputs: Vec<StreamNode>,
}

pub enum StreamNode {
    Index(Box<dyn IndexStream>),
    Op(OpStream),
}

impl StreamNode {
    pub fn kind(&self) -> StreamType {
        match self {
            StreamNode::Index(_) => StreamType::Index,
            StreamNode::Op(op) => op.kind,
        }
    }
}

fn make_opstream(kind: StreamType, inputs: Vec<StreamNode>) -> StreamNode {
    // An index combined with an existing stream is ORed with it
    let kind = match kind {
        StreamType::Index => StreamType::Or,
        kind => kind,
    };
    StreamNode::Op(OpStream { kind, inputs })
}

#[derive(Default)]
pub struct StreamBitmap {
    pub node: Option<StreamNode>,
}

impl StreamBitmap {
    pub fn new(node: StreamNode) -> Self {
        Self { node: Some(node) }
    }

    pub fn begin_iterate(&self) -> Result<StreamBitmapIterator> {
        let inner = match &self.node {
            Some(node) => Some(StreamBMIterator::begin(node)?),
            None => None,
        };
        Ok(StreamBitmapIterator {
            inner,
            entry: PagetableEntry::new(0),
        })
    }
}

/// Adds `node` to the stream tree of `sbm`, combined with `kind`
pub fn stream_add_node(sbm: &mut StreamBitmap, node: StreamNode, kind: StreamType) {
    sbm.node = Some(match sbm.node.take() {
        Some(StreamNode::Op(mut op)) if op.kind == kind => {
            op.inputs.push(node);
            StreamNode::Op(op)
        }
        Some(current) => make_opstream(kind, vec![current, node]),
        None => match kind {
            StreamType::Index => node,
            _ => make_opstream(kind, vec![node]),
        },
    });
}

/// Moves the stream tree of `source` into `destination`
pub fn stream_move_node(destination: &mut StreamBitmap, source: &mut StreamBitmap, kind: StreamType) {
    if let Some(node) = source.node.take() {
        stream_add_node(destination, node, kind);
    }
}

/// Iterator over one stream node
pub struct StreamBMIterator {
    /// The block the consumer wants next
    pub next_block: BlockNumber,
    puller: Box<dyn StreamPull>,
}

impl StreamBMIterator {
    pub fn begin(node: &StreamNode) -> Result<Self> {
        let puller: Box<dyn StreamPull> = match node {
            StreamNode::Index(stream) => stream.begin_iterate()?,
            StreamNode::Op(op) => Box::new(OpStreamIterator {
                kind: op.kind,
                inputs: op
                    .inputs
                    .iter()
                    .map(StreamBMIterator::begin)
                    .collect::<Result<_>>()?,
            }),
        };
        Ok(Self {
            next_block: 0,
            puller,
        })
    }

    pub fn pull(&mut self, entry: &mut PagetableEntry) -> Result<bool> {
        self.puller.pull(&mut self.next_block, entry)
    }
}

struct OpStreamIterator {
    kind: StreamType,
    inputs: Vec<StreamBMIterator>,
}

impl StreamPull for OpStreamIterator {
    /// Pulls every input at the wanted block; OR combines the entries of
    /// the lowest block returned, AND waits until all the inputs agree on
    /// the same block (the highest one returned)
    fn pull(&mut self, next_block: &mut BlockNumber, entry: &mut PagetableEntry) -> Result<bool> {
        let mut res = false;

        'restart: loop {
            let mut matches = Vec::with_capacity(self.inputs.len());
            let mut target: Option<BlockNumber> = None;

            for input in self.inputs.iter_mut() {
                let mut new = PagetableEntry::new(*next_block);
                input.next_block = *next_block;
                let r = input.pull(&mut new)?;
                res = res || r;

                if r {
                    target = Some(match target {
                        None => new.blockno,
                        Some(b) if self.kind == StreamType::Or => b.min(new.blockno),
                        Some(b) => b.max(new.blockno),
                    });
                    matches.push(new);
                } else if self.kind == StreamType::And {
                    // No more intersections can be produced
                    *next_block = target.map_or(*next_block, |b| b.saturating_add(1));
                    return Ok(false);
                }
            }

            let target = match target {
                Some(target) => target,
                None => return Ok(false),
            };

            let mut initialised = false;
            for new in matches.iter() {
                if new.blockno == target {
                    if !initialised {
                        *entry = new.clone();
                        initialised = true;
                    } else if self.kind == StreamType::Or {
                        entry.union_with(new);
                    } else {
                        entry.intersect_with(new);
                    }
                } else if self.kind == StreamType::And {
                    debug!("AND inputs disagree, restarting at block {}", target);
                    *next_block = target;
                    entry.reset(target);
                    continue 'restart;
                }
            }

            if res {
                *next_block = target + 1;
            }
            return Ok(res);
        }
    }
}

/// The tuples of one heap page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageResult {
    pub blockno: BlockNumber,
    pub offsets: Vec<OffsetNumber>,
    /// Whether the tuples have to be rechecked against the quals
    pub recheck: bool,
}

/// Iterates over the non-empty pages of a [`StreamBitmap`]
pub struct StreamBitmapIterator {
    inner: Option<StreamBMIterator>,
    entry: PagetableEntry,
}

impl Iterator for StreamBitmapIterator {
    type Item = Result<PageResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let inner = self.inner.as_mut()?;
            self.entry.reset(inner.next_block);
            match inner.pull(&mut self.entry) {
                Err(e) => {
                    self.inner = None;
                    return Some(Err(e));
                }
                Ok(false) => {
                    self.inner = None;
                    return None;
                }
                Ok(true) => {
                    let offsets = self.entry.offsets();
                    if !offsets.is_empty() {
                        return Some(Ok(PageResult {
                            blockno: self.entry.blockno,
                            offsets,
                            recheck: false,
                        }));
                    }
                }
            }
        }
    }
}

/// A materialised tuple bitmap
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TidBitmap {
    pages: BTreeMap<BlockNumber, PagetableEntry>,
}

impl TidBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tuples(&mut self, tids: &[ItemPointer]) {
        for tid in tids {
            self.pages
                .entry(tid.block)
                .or_insert_with(|| PagetableEntry::new(tid.block))
                .set(tid.offset);
        }
    }

    /// ORs a page into the bitmap
    pub fn add_page(&mut self, entry: &PagetableEntry) {
        self.pages
            .entry(entry.blockno)
            .or_insert_with(|| PagetableEntry::new(entry.blockno))
            .union_with(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.pages.values().all(PagetableEntry::is_empty)
    }

    pub fn ntuples(&self) -> usize {
        self.pages.values().map(PagetableEntry::ntuples).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = PageResult> + '_ {
        self.pages
            .values()
            .filter(|entry| !entry.is_empty())
            .map(|entry| PageResult {
                blockno: entry.blockno,
                offsets: entry.offsets(),
                recheck: false,
            })
    }

    /// Turns the bitmap into a leaf of a stream tree
    pub fn into_stream_node(self) -> StreamNode {
        StreamNode::Index(Box::new(TidBitmapStream {
            pages: Arc::new(self.pages),
        }))
    }
}

struct TidBitmapStream {
    pages: Arc<BTreeMap<BlockNumber, PagetableEntry>>,
}

impl IndexStream for TidBitmapStream {
    fn begin_iterate(&self) -> Result<Box<dyn StreamPull>> {
        Ok(Box::new(TidBitmapPull {
            pages: self.pages.clone(),
            position: 0,
            cached: None,
        }))
    }
}

struct TidBitmapPull {
    pages: Arc<BTreeMap<BlockNumber, PagetableEntry>>,
    /// First block not yet returned
    position: BlockNumber,
    cached: Option<PagetableEntry>,
}

impl StreamPull for TidBitmapPull {
    fn pull(&mut self, next_block: &mut BlockNumber, entry: &mut PagetableEntry) -> Result<bool> {
        if let Some(cached) = &self.cached {
            if *next_block <= cached.blockno {
                *entry = cached.clone();
                return Ok(true);
            }
        }

        let start = self.position.max(*next_block);
        match self.pages.range(start..).next() {
            Some((blockno, page)) => {
                *entry = page.clone();
                self.position = blockno + 1;
                *next_block = blockno + 1;
                self.cached = Some(page.clone());
                Ok(true)
            }
            None => {
                self.cached = None;
                Ok(false)
            }
        }
    }
}

/// The bitmaps returned by index scans
pub enum Bitmap {
    Tid(TidBitmap),
    Stream(StreamBitmap),
}

impl Bitmap {
    /// Iterates over the non-empty pages, whatever the kind of bitmap
    pub fn pages(&self) -> Result<Box<dyn Iterator<Item = Result<PageResult>> + '_>> {
        Ok(match self {
            Bitmap::Tid(tbm) => Box::new(tbm.iter().map(Ok::<PageResult, BitmapError>)),
            Bitmap::Stream(sbm) => Box::new(sbm.begin_iterate()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tbm(tids: &[(BlockNumber, OffsetNumber)]) -> TidBitmap {
        let mut bitmap = TidBitmap::new();
        let tids: Vec<_> = tids.iter().map(|(b, o)| ItemPointer::new(*b, *o)).collect();
        bitmap.add_tuples(&tids);
        bitmap
    }

    fn collect(sbm: &StreamBitmap) -> Vec<(BlockNumber, Vec<OffsetNumber>)> {
        sbm.begin_iterate()
            .expect("iterator")
            .map(|page| {
                let page = page.expect("page");
                (page.blockno, page.offsets)
            })
            .collect()
    }

    #[test]
    fn test_entry() {
        let mut entry = PagetableEntry::new(3);
        entry.set(1);
        entry.set(65);
        entry.set(32768);
        assert!(entry.contains(65));
        assert!(!entry.contains(64));
        assert_eq!(entry.offsets(), vec![1, 65, 32768]);
        assert_eq!(entry.ntuples(), 3);
        assert_eq!(entry.words[1], 1);
    }

    #[test]
    fn test_add_node() {
        let mut sbm = StreamBitmap::default();
        stream_add_node(&mut sbm, tbm(&[(0, 1)]).into_stream_node(), StreamType::Index);
        assert_eq!(sbm.node.as_ref().map(StreamNode::kind), Some(StreamType::Index));

        stream_add_node(&mut sbm, tbm(&[(1, 1)]).into_stream_node(), StreamType::Or);
        stream_add_node(&mut sbm, tbm(&[(2, 1)]).into_stream_node(), StreamType::Or);
        match &sbm.node {
            Some(StreamNode::Op(op)) => {
                assert_eq!(op.kind, StreamType::Or);
                assert_eq!(op.inputs.len(), 3);
            }
            _ => panic!("expected an OR node"),
        }

        stream_add_node(&mut sbm, tbm(&[(2, 1)]).into_stream_node(), StreamType::And);
        match &sbm.node {
            Some(StreamNode::Op(op)) => {
                assert_eq!(op.kind, StreamType::And);
                assert_eq!(op.inputs.len(), 2);
                assert_eq!(op.inputs[0].kind(), StreamType::Or);
            }
            _ => panic!("expected an AND node"),
        }
        assert_eq!(collect(&sbm), vec![(2, vec![1])]);
    }

    #[test]
    fn test_or() {
        let mut sbm = StreamBitmap::new(tbm(&[(0, 1), (3, 7)]).into_stream_node());
        stream_add_node(&mut sbm, tbm(&[(0, 2), (1, 1), (3, 7)]).into_stream_node(), StreamType::Or);
        assert_eq!(
            collect(&sbm),
            vec![(0, vec![1, 2]), (1, vec![1]), (3, vec![7])]
        );
    }

    #[test]
    fn test_and() {
        let mut sbm = StreamBitmap::new(tbm(&[(0, 1), (2, 5), (2, 6), (7, 1), (9, 1)]).into_stream_node());
        let mut other = StreamBitmap::new(tbm(&[(1, 1), (2, 6), (2, 9), (9, 1), (9, 2)]).into_stream_node());
        stream_move_node(&mut sbm, &mut other, StreamType::And);
        assert!(other.node.is_none());
        assert_eq!(collect(&sbm), vec![(2, vec![6]), (9, vec![1])]);
    }

    #[test]
    fn test_empty() {
        let sbm = StreamBitmap::default();
        assert!(collect(&sbm).is_empty());

        let bitmap = Bitmap::Tid(tbm(&[(4, 2)]));
        let pages: Vec<_> = bitmap.pages().expect("pages").collect();
        assert_eq!(pages.len(), 1);
    }
}
