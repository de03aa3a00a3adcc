//! Cooperative cancellation scopes.
//!
//! A [`CancelScope`] is a flag that can be raised exactly once and observed from any number of
//! threads, either by polling ([`CancelScope::is_cancelled`]), by blocking
//! ([`CancelScope::wait`]), or as one arm of a [`crossbeam_channel::select!`] via
//! [`CancelScope::done`].
//!
//! Cancellation is a request, not an interruption: nothing running is stopped, but code that
//! checks the scope is expected to drop whatever it was about to deliver.

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
};

use crossbeam_channel::{Receiver, Sender};

use crate::sync::MutexExt;

/// A cloneable handle to a cancellation scope.
///
/// Scopes form a tree: cancelling a scope cancels every scope derived from it with
/// [`CancelScope::child`], but never its parent.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    cancelled: AtomicBool,
    /// Never receives a message. It becomes ready (disconnected) once `trigger` is dropped.
    done: Receiver<()>,
    state: Mutex<ScopeState>,
}

struct ScopeState {
    trigger: Option<Sender<()>>,
    children: Vec<Weak<ScopeInner>>,
}

impl CancelScope {
    /// Creates a new root scope that is only cancelled by calling [`CancelScope::cancel`].
    pub fn new() -> Self {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(ScopeInner {
                cancelled: AtomicBool::new(false),
                done,
                state: Mutex::new(ScopeState {
                    trigger: Some(trigger),
                    children: Vec::new(),
                }),
            }),
        }
    }

    /// Creates a scope that is cancelled together with `self`.
    ///
    /// If `self` is already cancelled, the returned scope starts out cancelled.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut state = self.inner.state.locked();
        if state.trigger.is_none() {
            drop(state);
            child.cancel();
            return child;
        }
        state.children.retain(|c| c.strong_count() != 0);
        state.children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Cancels this scope and all of its descendants.
    ///
    /// This never blocks, and calling it more than once has no further effect.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns a receiver that becomes ready once the scope is cancelled.
    ///
    /// The receiver never yields a message; receiving from it returns an error as soon as the
    /// scope is cancelled. This makes it usable as an arm of [`crossbeam_channel::select!`].
    #[inline]
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done
    }

    /// Blocks the calling thread until the scope is cancelled.
    pub fn wait(&self) {
        // Only ever returns `Err(RecvError)`, once the trigger is gone.
        let _ = self.inner.done.recv();
    }
}

impl ScopeInner {
    fn cancel(&self) {
        let (trigger, children) = {
            let mut state = self.state.locked();
            let trigger = state.trigger.take();
            if trigger.is_some() {
                self.cancelled.store(true, Ordering::Release);
            }
            (trigger, mem::take(&mut state.children))
        };
        if trigger.is_none() {
            return;
        }
        drop(trigger);

        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
