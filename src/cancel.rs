// WCBT: working copy backup tool.
// Copyright 2025 WCBT developers.

//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;

use crate::{Error, Result};

/// A shared flag checked between operations and between copy chunks.
///
/// Cancellation is cooperative: requesting it never interrupts an in-flight
/// syscall, and the pipeline that observes it leaves its artifacts in place
/// for inspection.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    /// Ask the owning pipeline to stop at its next check point.
    pub fn request(&self) {
        self.0.store(true, Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Relaxed)
    }

    /// Return [Error::Cancelled] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
