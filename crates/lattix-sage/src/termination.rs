use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between a caller and a running job.
///
/// Clones observe the same flag. Training and inference poll it once per
/// node while building batches and once per optimizer iteration.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this flag to stop.
    pub fn terminate(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Terminated)` once [`terminate`](Self::terminate) was called.
    pub fn assert_running(&self) -> Result<()> {
        if self.is_terminated() {
            Err(Error::Terminated)
        } else {
            Ok(())
        }
    }
}
