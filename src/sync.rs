//! Lock helpers that ignore poisoning.
//!
//! Tasks dispatched by this crate may panic, and those panics are forwarded to the owner of the
//! dispatch by joining the task threads. Lock poisoning would only turn the root cause into a
//! cascade of knock-on panics in unrelated threads, so every lock in the crate goes through
//! [`MutexExt::locked`], which hands back the guard of a poisoned lock as if nothing happened.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) trait MutexExt<T: ?Sized> {
    /// Locks the mutex, recovering the guard if a previous holder panicked.
    fn locked(&self) -> MutexGuard<'_, T>;
}

impl<T: ?Sized> MutexExt<T> for Mutex<T> {
    fn locked(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
