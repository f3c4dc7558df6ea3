//! Page storage: buffer pool, page sources and page layouts

pub mod buffer;
pub mod pages;
pub mod source;

pub use buffer::{Buffer, BufferPool};
