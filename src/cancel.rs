//! Cooperative cancellation for long-running computations.
//!
//! A [`Cancellation`] is a cloneable handle around a shared flag plus an
//! optional deadline. Long loops call [`Cancellation::check`] between units of
//! work; the results written so far are always complete fields, so stopping
//! early never leaves the derived store half-updated.

use crate::error::{GraphError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A handle that never fires unless [`cancel`](Self::cancel) is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that also fires once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// # Errors
    ///
    /// `Cancelled` naming the `stage` that was interrupted.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(GraphError::Cancelled(stage.to_string()));
        }
        Ok(())
    }
}
