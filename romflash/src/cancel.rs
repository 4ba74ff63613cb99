//! Cooperative cancellation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Shared cancellation flag.
///
/// Clones observe the same flag, so a handle can be moved to a signal handler
/// or another thread while the flasher keeps its own copy. The flasher only
/// looks at it between protocol steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create an unset handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag
            .store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag
            .load(Ordering::SeqCst)
    }

    /// Clear the flag for a new run.
    pub fn reset(&self) {
        self.flag
            .store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let handle = CancelHandle::new();
        let remote = handle.clone();
        assert!(!handle.is_cancelled());

        std::thread::spawn(move || remote.cancel())
            .join()
            .unwrap();
        assert!(handle.is_cancelled());

        handle.reset();
        assert!(!handle.is_cancelled());
    }
}
