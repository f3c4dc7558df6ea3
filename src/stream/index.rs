//! Index scans as streams of page bitmaps

use log::debug;

use crate::base::{block_of, BlockNumber};
use crate::error::{BitmapError, Result};
use crate::matcher::{EntryState, MatchOutcome};
use crate::scan::IndexScanDesc;

use super::{
    stream_add_node, Bitmap, IndexStream, PagetableEntry, StreamBitmap, StreamNode, StreamPull,
    StreamType,
};

/// Returns the bitmap of the scan, either as a new stream bitmap or ORed
/// into `existing`
///
/// The stream decodes a copy of the scan: the pins of the scan are handed
/// over to the copy.
pub fn get_bitmap(scan: &mut IndexScanDesc, existing: Option<Bitmap>) -> Result<Bitmap> {
    let res = scan.first_batch_words()?;
    if let Some(position) = &mut scan.curr {
        position.result.next_tid = 1;
    }

    let stream = if res {
        let copy = scan.copy_scan_desc();
        scan.release_lov_buffers();
        BitmapIndexStream { scan: Some(copy) }
    } else {
        BitmapIndexStream { scan: None }
    };
    let node = StreamNode::Index(Box::new(stream));

    match existing {
        None => Ok(Bitmap::Stream(StreamBitmap::new(node))),
        Some(Bitmap::Stream(mut sbm)) => {
            stream_add_node(&mut sbm, node, StreamType::Or);
            Ok(Bitmap::Stream(sbm))
        }
        Some(Bitmap::Tid(_)) => Err(BitmapError::NonStreamBitmap),
    }
}

/// A leaf of a stream tree decoding an index scan
pub struct BitmapIndexStream {
    /// None when no word matches the scan
    scan: Option<IndexScanDesc>,
}

impl IndexStream for BitmapIndexStream {
    fn begin_iterate(&self) -> Result<Box<dyn StreamPull>> {
        Ok(Box::new(BitmapStreamPull {
            scan: self.scan.as_ref().map(IndexScanDesc::copy_scan_desc),
            entry: None,
            is_done: false,
        }))
    }
}

/// One iteration over an index stream, with its own copy of the scan
pub struct BitmapStreamPull {
    scan: Option<IndexScanDesc>,
    /// The last page produced
    entry: Option<PagetableEntry>,
    is_done: bool,
}

impl StreamPull for BitmapStreamPull {
    fn pull(&mut self, next_block: &mut BlockNumber, e: &mut PagetableEntry) -> Result<bool> {
        if let Some(next) = &self.entry {
            if *next_block <= next.blockno {
                *e = next.clone();
                return Ok(true);
            }
        }

        let scan = match &mut self.scan {
            Some(scan) => scan,
            None => return Ok(false),
        };

        if self.is_done {
            // Nothing more to decode: release the copy of the scan early
            debug!("End of the stream on {}", scan.index.name());
            self.scan = None;
            return Ok(false);
        }

        e.reset(*next_block);
        let mut state = EntryState::Fresh;
        let pool = scan.index.pool().clone();

        loop {
            scan.interrupts.check()?;

            let position = match &mut scan.curr {
                Some(position) => position,
                None => return Err(BitmapError::ScanPositionUninitialized),
            };
            let res = position.next_batch_words(&pool)?;

            match position.get_match(*next_block, e, state) {
                MatchOutcome::Matched => break,
                MatchOutcome::NeedRefill if !res => {
                    self.is_done = true;
                    break;
                }
                MatchOutcome::NeedRefill => {
                    // Continue the page where the decoding stopped
                    *next_block = e.blockno;
                    state = EntryState::Partial;
                }
            }
        }

        *next_block = e.blockno + 1;
        if let Some(position) = &scan.curr {
            let covered = block_of(position.result.next_tid);
            if covered > e.blockno + 1 {
                *next_block = covered;
            }
        }
        self.entry = Some(e.clone());

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::base::{Datum, ItemPointer};
    use crate::index::BitmapIndex;
    use crate::options::BitmapOptions;
    use crate::scan::ScanKey;
    use crate::stream::TidBitmap;

    fn build(entries: &[(i64, Vec<u64>)]) -> Arc<BitmapIndex> {
        let index = BitmapIndex::create("idx", 1);
        index.init(BitmapOptions::default()).expect("init");
        for (value, tids) in entries {
            let location = index
                .add_lov_item(vec![Some(Datum::Int(*value))])
                .expect("add");
            let mut item = index.read_lov_item(location).expect("read");
            for tid in tids.iter() {
                item.append_tid(index.pool(), *tid).expect("append");
            }
            index.write_lov_item(location, &item).expect("write");
        }
        Arc::new(index)
    }

    fn tuples(bitmap: &Bitmap) -> Vec<u64> {
        let mut tids = Vec::new();
        for page in bitmap.pages().expect("pages") {
            let page = page.expect("page");
            tids.extend(
                page.offsets
                    .iter()
                    .map(|offset| ItemPointer::new(page.blockno, *offset).number()),
            );
        }
        tids
    }

    #[test]
    fn test_get_bitmap() {
        let a: Vec<u64> = vec![1, 5, 32768, 32769, 200_000, 200_001];
        let index = build(&[(1, a.clone()), (2, vec![7, 40_000])]);

        let mut scan = IndexScanDesc::begin(index.clone(), vec![ScanKey::equal(1, 1)]).expect("scan");
        let bitmap = get_bitmap(&mut scan, None).expect("bitmap");
        assert_eq!(tuples(&bitmap), a);
        // Iterating again gives the same pages
        assert_eq!(tuples(&bitmap), a);

        let mut other = IndexScanDesc::begin(index.clone(), vec![ScanKey::equal(1, 2)]).expect("scan");
        let bitmap = get_bitmap(&mut other, Some(bitmap)).expect("bitmap");
        assert_eq!(tuples(&bitmap), vec![1, 5, 7, 32768, 32769, 40_000, 200_000, 200_001]);

        drop(bitmap);
        scan.end();
        other.end();
        assert_eq!(index.pool().total_pins(), 0);
    }

    #[test]
    fn test_pin_transfer() {
        let index = build(&[(1, vec![3])]);
        let location = index.lookup(&vec![Some(Datum::Int(1))]).expect("key");

        let mut scan = IndexScanDesc::begin(index.clone(), vec![]).expect("scan");
        let bitmap = get_bitmap(&mut scan, None).expect("bitmap");
        // Only the copy held by the stream pins the LOV page
        assert_eq!(index.pool().pin_count(location.block), 1);

        let mut iterator = match &bitmap {
            Bitmap::Stream(sbm) => sbm.begin_iterate().expect("iterate"),
            Bitmap::Tid(_) => panic!("expected a stream bitmap"),
        };
        assert_eq!(index.pool().pin_count(location.block), 2);
        assert!(iterator.next().is_some());
        assert!(iterator.next().is_none());
        drop(iterator);
        assert_eq!(index.pool().pin_count(location.block), 1);

        scan.end();
        assert_eq!(index.pool().pin_count(location.block), 1);
        drop(bitmap);
        assert_eq!(index.pool().pin_count(location.block), 0);
    }

    #[test]
    fn test_no_match() {
        let index = build(&[(1, vec![3])]);
        let mut scan = IndexScanDesc::begin(index, vec![ScanKey::equal(1, 9)]).expect("scan");
        let bitmap = get_bitmap(&mut scan, None).expect("bitmap");
        assert!(tuples(&bitmap).is_empty());
    }

    #[test]
    fn test_non_stream_bitmap() {
        let index = build(&[(1, vec![3])]);
        let mut scan = IndexScanDesc::begin(index, vec![]).expect("scan");
        assert!(matches!(
            get_bitmap(&mut scan, Some(Bitmap::Tid(TidBitmap::new()))),
            Err(BitmapError::NonStreamBitmap)
        ));
    }

    #[test]
    fn test_cancel() {
        let index = build(&[(1, vec![3])]);
        let mut scan = IndexScanDesc::begin(index, vec![]).expect("scan");
        let bitmap = get_bitmap(&mut scan, None).expect("bitmap");
        scan.interrupts.cancel();

        let pages: Vec<_> = bitmap.pages().expect("pages").collect();
        assert_eq!(pages.len(), 1);
        assert!(matches!(pages[0], Err(BitmapError::Cancelled)));
    }

    #[test]
    fn test_uninitialized_position() {
        let index = build(&[(1, vec![3])]);
        let scan = IndexScanDesc::begin(index, vec![]).expect("scan");
        let mut pull = BitmapStreamPull {
            scan: Some(scan),
            entry: None,
            is_done: false,
        };
        let mut next_block = 0;
        let mut entry = PagetableEntry::new(0);
        assert!(matches!(
            pull.pull(&mut next_block, &mut entry),
            Err(BitmapError::ScanPositionUninitialized)
        ));
    }
}
