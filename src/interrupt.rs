//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{BitmapError, Result};

/// Shared cancellation flag; long loops poll it through
/// [`Interrupts::check`] and abort with [`BitmapError::Cancelled`]
#[derive(Clone, Default, Debug)]
pub struct Interrupts {
    pending: Arc<AtomicBool>,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation polling this token
    pub fn cancel(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BitmapError::Cancelled)
        } else {
            Ok(())
        }
    }
}
