//! On-disk bitmap index using Hybrid Run-Length (HRL) compressed
//! bitmap vectors, one vector per distinct key.
//!
//! Scans return matching tuples either one by one
//! ([`scan::IndexScanDesc::get_tuple`]) or as a lazily decoded stream of
//! page bitmaps ([`stream::index::get_bitmap`]) that can be combined with
//! other bitmaps.

pub mod am;
pub mod base;
pub mod error;
pub mod hrl;
pub mod index;
pub mod insert;
pub mod interrupt;
pub mod lov;
pub mod matcher;
pub mod options;
pub mod scan;
pub mod storage;
pub mod stream;
