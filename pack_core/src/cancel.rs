use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PackError;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    // Polled at loop boundaries; canceled work surfaces a single outcome,
    // not an error stack.
    pub fn checkpoint(&self) -> Result<(), PackError> {
        if self.is_canceled() {
            Err(PackError::Canceled)
        } else {
            Ok(())
        }
    }
}
