// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Sticky "surface geometry changed" flag.
///
/// Raised by the window layer (possibly from another thread), consumed by the
/// render loop at its next safe point. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct ResizeSignal(Arc<AtomicBool>);

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_signal_is_shared_between_clones() {
        let a = ResizeSignal::new();
        let b = a.clone();
        assert!(!b.is_raised());
        a.raise();
        assert!(b.is_raised());
        assert!(b.take());
        assert!(!a.is_raised());
        assert!(!a.take());
    }

    #[test]
    fn resize_signal_stays_raised_until_consumed() {
        let s = ResizeSignal::new();
        s.raise();
        s.raise();
        assert!(s.is_raised());
        s.clear();
        assert!(!s.is_raised());
    }

    #[test]
    fn resize_signal_crosses_threads() {
        let s = ResizeSignal::new();
        let remote = s.clone();
        std::thread::spawn(move || remote.raise())
            .join()
            .unwrap();
        assert!(s.take());
    }
}
