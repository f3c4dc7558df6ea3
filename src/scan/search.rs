//! Searching the index: resolving scan keys into bitmap vectors and
//! returning the matching tuples one at a time

use log::debug;

use crate::base::ItemPointer;
use crate::error::{BitmapError, Result};

use super::position::{BitmapVector, ScanPosition};
use super::IndexScanDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanDirection {
    Backward,
    NoMovement,
    Forward,
}

impl IndexScanDesc {
    /// Creates the current position from the vectors of the keys
    /// matching the scan, and loads their first words; returns false if
    /// there are no words to decode
    pub fn first_batch_words(&mut self) -> Result<bool> {
        if !self.index.is_built() {
            return Err(BitmapError::Uninitialized(self.index.name().to_string()));
        }

        let keys = &self.keys;
        let locations = self
            .index
            .find_keys(|key| keys.iter().all(|scan_key| scan_key.matches(key)));
        debug!(
            "Scan on {}: {} matching vectors",
            self.index.name(),
            locations.len()
        );

        let pool = self.index.pool();
        let vectors = locations
            .into_iter()
            .map(|location| BitmapVector::open(pool, location))
            .collect::<Result<Vec<_>>>()?;

        let mut position = ScanPosition::new(vectors);
        let res = position.next_batch_words(pool)?;
        self.curr = Some(position);
        Ok(res)
    }

    /// Makes sure that the current position has words to decode
    pub fn next_batch_words(&mut self) -> Result<bool> {
        let pool = self.index.pool();
        match &mut self.curr {
            Some(position) => position.next_batch_words(pool),
            None => Err(BitmapError::ScanPositionUninitialized),
        }
    }

    /// Moves to the next matching tuple, stored in `heap_tid`
    pub fn get_tuple(&mut self, direction: ScanDirection) -> Result<bool> {
        if direction == ScanDirection::Backward {
            return Err(BitmapError::BackwardScan);
        }

        // This index is never lossy
        self.recheck = false;

        if self.curr.is_none() && !self.first_batch_words()? {
            self.heap_tid = None;
            return Ok(false);
        }

        let found = self.next_tuple()?;
        if !found {
            self.heap_tid = None;
        }
        Ok(found)
    }

    fn next_tuple(&mut self) -> Result<bool> {
        let pool = self.index.pool();
        let position = match &mut self.curr {
            Some(position) => position,
            None => return Err(BitmapError::ScanPositionUninitialized),
        };

        loop {
            if position.result.next_tid_loc < position.result.next_tids.len() {
                let tid = position.result.next_tids[position.result.next_tid_loc];
                position.result.next_tid_loc += 1;
                self.heap_tid = Some(ItemPointer::from_number(tid));
                return Ok(true);
            }

            if position.nwords() == 0 && !position.next_batch_words(pool)? {
                return Ok(false);
            }

            let max_tids = self.index.options()?.batch_tids;
            position.find_next_tids(max_tids);
        }
    }
}
