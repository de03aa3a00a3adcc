//! Internal unit test utilities.

use std::{
    panic::resume_unwind,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Panics without invoking the panic hook, so expected panics don't clutter the test output.
pub fn silent_panic(payload: String) -> ! {
    resume_unwind(Box::new(payload));
}

/// Records how many closures are inside [`Gauge::track`] at once.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl Gauge {
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let r = f();
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        r
    }

    /// The highest number of concurrent [`Gauge::track`] calls seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// The number of [`Gauge::track`] calls that have returned.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}
