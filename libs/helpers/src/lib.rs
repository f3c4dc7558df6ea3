pub mod heap;
pub mod index;
