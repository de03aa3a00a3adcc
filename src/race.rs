//! First-success races between independently launched candidates.
//!
//! A [`RaceGroup`] is created for a known number of candidates. Each candidate is handed to
//! [`RaceGroup::submit`], typically from a task dispatched by a [`Pool`][crate::Pool], and the
//! group resolves exactly once:
//!
//! - to the value of the first candidate that succeeds, which also cancels the group's scope so
//!   that candidates still pending are dropped instead of reporting, or
//! - once every candidate has reported a failure, to the error reported last, or to
//!   [`Error::AllSkipped`] if every candidate abstained with [`Failure::Skip`].
//!
//! Candidates that are dropped because the group was cancelled never count as failures.

use std::{
    fmt,
    panic::resume_unwind,
    sync::{Arc, Mutex},
    thread,
};

use crossbeam_channel::select;

use crate::{cancel::CancelScope, error::Error, slot::Slot, sync::MutexExt};

/// The ways a candidate can fail to produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The candidate deliberately abstains. Skips never become the reported error of a race; if
    /// nothing but skips is reported, the race fails with [`Error::AllSkipped`].
    Skip,
    /// The candidate tried and failed.
    Error(E),
}

impl<E> From<E> for Failure<E> {
    fn from(e: E) -> Self {
        Failure::Error(e)
    }
}

/// A cohort of candidates racing for one result under a shared [`CancelScope`].
///
/// [`RaceGroup`] is a cheap handle; clones refer to the same group.
pub struct RaceGroup<R, E> {
    inner: Arc<GroupInner<R, E>>,
}

struct GroupInner<R, E> {
    scope: CancelScope,
    tally: Mutex<Tally<E>>,
    outcome: Slot<Result<R, Error<E>>>,
}

/// Bookkeeping for failed candidates. Recording an error and counting the candidate as finished
/// happen under the same lock.
struct Tally<E> {
    expected: usize,
    errors: Vec<E>,
}

impl<R, E> Clone for RaceGroup<R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static, E: Send + 'static> RaceGroup<R, E> {
    /// Creates a group of `candidates` candidates with its own root scope.
    ///
    /// # Panics
    ///
    /// Panics if `candidates` is 0.
    pub fn new(candidates: usize) -> Self {
        Self::with_scope(CancelScope::new(), candidates)
    }

    /// Creates a group of `candidates` candidates whose scope is a child of `scope`.
    ///
    /// Cancelling `scope` drops every candidate that has not reported yet.
    ///
    /// # Panics
    ///
    /// Panics if `candidates` is 0.
    pub fn child_of(scope: &CancelScope, candidates: usize) -> Self {
        Self::with_scope(scope.child(), candidates)
    }

    fn with_scope(scope: CancelScope, candidates: usize) -> Self {
        assert_ne!(candidates, 0, "a race group needs at least 1 candidate");
        Self {
            inner: Arc::new(GroupInner {
                scope,
                tally: Mutex::new(Tally {
                    expected: candidates,
                    errors: Vec::new(),
                }),
                outcome: Slot::new(),
            }),
        }
    }

    #[inline]
    pub fn scope(&self) -> &CancelScope {
        &self.inner.scope
    }

    /// Cancels the group, dropping every candidate that has not reported yet.
    pub fn cancel(&self) {
        self.inner.scope.cancel();
    }

    /// Returns whether the group has been decided, either way.
    pub fn is_resolved(&self) -> bool {
        self.inner.outcome.is_filled()
    }

    /// Takes the outcome of the race, if it has been decided and not taken before.
    pub fn resolve(&self) -> Option<Result<R, Error<E>>> {
        self.inner.outcome.take()
    }

    /// Runs `candidate` as a participant of this race, blocking until it has reported or the
    /// group's scope is cancelled.
    ///
    /// The candidate runs on a thread of its own so that cancellation can be observed while it
    /// is still running. A candidate overtaken by cancellation keeps running in the background,
    /// but whatever it returns is discarded.
    ///
    /// If the candidate panics before the race is decided, the panic is propagated to the
    /// calling thread.
    pub fn submit<F>(&self, candidate: F)
    where
        F: FnOnce() -> Result<R, Failure<E>> + Send + 'static,
    {
        let scope = &self.inner.scope;
        if scope.is_cancelled() {
            log::trace!("race already decided, dropping candidate");
            return;
        }

        // Left in place if the thread cannot be spawned, so it can run inline instead.
        let cell = Arc::new(Mutex::new(Some(candidate)));
        let (sender, reported) = crossbeam_channel::bounded(1);
        let spawned = {
            let cell = cell.clone();
            thread::Builder::new().spawn(move || {
                let candidate = cell.locked().take();
                if let Some(candidate) = candidate {
                    let _ = sender.send(candidate());
                }
            })
        };

        match spawned {
            Ok(handle) => select! {
                recv(scope.done()) -> _ => {
                    log::trace!("race decided while candidate was running, discarding it");
                }
                recv(reported) -> msg => match msg {
                    Ok(outcome) => self.settle(outcome),
                    // The sender was dropped without reporting: the candidate panicked.
                    Err(_) => {
                        if let Err(payload) = handle.join() {
                            resume_unwind(payload);
                        }
                    }
                },
            },
            Err(e) => {
                log::warn!("failed to spawn candidate thread, running it inline: {e}");
                self.run_inline(&cell);
            }
        }
    }

    /// Runs the candidate left in `cell` on the calling thread, unless a scope cancellation
    /// already decided the race.
    fn run_inline<F>(&self, cell: &Mutex<Option<F>>)
    where
        F: FnOnce() -> Result<R, Failure<E>>,
    {
        let candidate = cell.locked().take();
        match candidate {
            Some(_) if self.inner.scope.is_cancelled() => {
                log::trace!("race decided before inline candidate ran, dropping it");
            }
            Some(candidate) => self.settle(candidate()),
            None => {}
        }
    }

    fn settle(&self, outcome: Result<R, Failure<E>>) {
        match outcome {
            Ok(value) => {
                self.inner.scope.cancel();
                if self.inner.outcome.fill(Ok(value)).is_err() {
                    log::debug!("race already decided, discarding a late success");
                }
            }
            Err(failure) => {
                let mut tally = self.inner.tally.locked();
                if let Failure::Error(e) = failure {
                    tally.errors.push(e);
                }
                let last = tally.expected <= 1;
                tally.expected = tally.expected.saturating_sub(1);
                if last {
                    let skipped = tally.errors.is_empty();
                    let err = tally.errors.pop().map_or(Error::AllSkipped, Error::Failed);
                    log::debug!("every candidate failed (all skipped: {skipped})");
                    if self.inner.outcome.fill(Err(err)).is_err() {
                        log::debug!("race already decided, discarding the final failure");
                    }
                }
            }
        }
    }
}

impl<R, E> fmt::Debug for RaceGroup<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tally = self.inner.tally.locked();
        f.debug_struct("RaceGroup")
            .field("expected", &tally.expected)
            .field("errors", &tally.errors.len())
            .field("resolved", &self.inner.outcome.is_filled())
            .field("cancelled", &self.inner.scope.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    use super::*;
    use crate::test::silent_panic;

    type Outcome = Result<u32, Failure<String>>;
    type Candidate = Box<dyn FnOnce() -> Outcome + Send>;

    fn assert_send_sync<T: Send + Sync>() {}

    /// Submits every candidate from its own thread and returns the outcome of the race.
    fn race(candidates: Vec<Candidate>) -> Option<Result<u32, Error<String>>> {
        let group = RaceGroup::new(candidates.len());
        thread::scope(|s| {
            for candidate in candidates {
                let group = group.clone();
                s.spawn(move || group.submit(candidate));
            }
        });
        group.resolve()
    }

    fn after(ms: u64, outcome: Outcome) -> Candidate {
        Box::new(move || {
            thread::sleep(Duration::from_millis(ms));
            outcome
        })
    }

    #[test]
    fn all_skipped_is_distinguished() {
        for n in 1..=5 {
            let candidates = (0..n).map(|_| after(0, Err(Failure::Skip))).collect();
            assert!(matches!(race(candidates), Some(Err(Error::AllSkipped))));
        }
    }

    #[test]
    fn last_reported_error_wins() {
        let candidates = vec![
            after(60, Err(Failure::Error("slow".into()))),
            after(0, Err(Failure::Error("fast".into()))),
            after(30, Err(Failure::Error("middle".into()))),
        ];
        let err = race(candidates).unwrap().unwrap_err();
        assert_eq!(err.into_failed().as_deref(), Some("slow"));
    }

    #[test]
    fn skips_do_not_hide_real_errors() {
        let candidates = vec![
            after(0, Err(Failure::Error("real".into()))),
            after(20, Err(Failure::Skip)),
            after(40, Err(Failure::Skip)),
        ];
        let err = race(candidates).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "real");
    }

    #[test]
    fn first_success_wins_over_later_outcomes() {
        let start = Instant::now();
        let candidates = vec![
            after(300, Ok(3)),
            after(0, Ok(1)),
            after(300, Err(Failure::Error("late".into()))),
        ];
        assert_eq!(race(candidates).unwrap().unwrap(), 1);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn success_after_failures_wins() {
        let candidates = vec![
            after(0, Err(Failure::Error("a".into()))),
            after(0, Err(Failure::Skip)),
            after(30, Ok(7)),
        ];
        assert_eq!(race(candidates).unwrap().unwrap(), 7);
    }

    #[test]
    fn simultaneous_successes_deliver_exactly_once() {
        for _ in 0..20 {
            let candidates = (0..8).map(|i| after(0, Ok(i))).collect();
            let group_result = race(candidates).unwrap();
            assert!(group_result.unwrap() < 8);
        }
    }

    #[test]
    fn outcome_is_taken_once() {
        let group = RaceGroup::<u32, String>::new(1);
        assert!(!group.is_resolved());
        group.submit(|| Ok(5));
        assert!(group.is_resolved());
        assert!(group.scope().is_cancelled());
        assert_eq!(group.resolve().unwrap().unwrap(), 5);
        assert!(group.resolve().is_none());
    }

    #[test]
    fn submit_after_resolution_is_dropped() {
        let group = RaceGroup::<u32, String>::new(2);
        group.submit(|| Ok(1));
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        group.submit(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(group.resolve().unwrap().unwrap(), 1);
    }

    #[test]
    fn cancellation_drops_running_candidate() {
        let group = RaceGroup::<u32, String>::new(1);
        let canceller = {
            let group = group.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                group.cancel();
            })
        };
        let start = Instant::now();
        group.submit(|| {
            thread::sleep(Duration::from_millis(300));
            Err(Failure::Error("too late".into()))
        });
        assert!(start.elapsed() < Duration::from_millis(250));
        canceller.join().unwrap();
        // A dropped candidate is not a failure.
        assert!(!group.is_resolved());
        assert_eq!(group.inner.tally.locked().expected, 1);
    }

    #[test]
    fn parent_scope_cancels_group() {
        let parent = CancelScope::new();
        let group = RaceGroup::<u32, String>::child_of(&parent, 1);
        parent.cancel();
        group.submit(|| Ok(1));
        assert!(group.resolve().is_none());
    }

    #[test]
    fn candidate_panic_propagates_to_submitter() {
        let group = RaceGroup::<u32, String>::new(1);
        let res = catch_unwind(AssertUnwindSafe(|| {
            group.submit(|| silent_panic("candidate panic".into()))
        }));
        res.unwrap_err();
        assert!(!group.is_resolved());
    }

    #[test]
    fn inline_fallback_settles_like_a_thread() {
        let group = RaceGroup::<u32, String>::new(2);
        let failing = Mutex::new(Some(|| -> Outcome { Err(Failure::Error("inline".into())) }));
        group.run_inline(&failing);
        assert!(failing.locked().is_none());
        assert!(!group.is_resolved());

        // The cell is consumed, so a second attempt has nothing left to run.
        group.run_inline(&failing);
        assert!(!group.is_resolved());

        let succeeding = Mutex::new(Some(|| -> Outcome { Ok(8) }));
        group.run_inline(&succeeding);
        assert!(group.scope().is_cancelled());
        assert_eq!(group.resolve().unwrap().unwrap(), 8);
    }

    #[test]
    fn inline_fallback_reports_the_final_failure() {
        let group = RaceGroup::<u32, String>::new(1);
        group.run_inline(&Mutex::new(Some(|| -> Outcome { Err(Failure::Skip) })));
        assert!(matches!(group.resolve(), Some(Err(Error::AllSkipped))));

        let group = RaceGroup::<u32, String>::new(1);
        group.cancel();
        group.run_inline(&Mutex::new(Some(|| -> Outcome { Ok(1) })));
        assert!(!group.is_resolved());
    }

    #[test]
    #[should_panic = "at least 1 candidate"]
    fn empty_group_panics() {
        RaceGroup::<(), ()>::new(0);
    }

    #[test]
    fn question_mark_converts_errors() {
        fn parse(s: &str) -> Result<u32, Failure<std::num::ParseIntError>> {
            Ok(s.parse::<u32>()?)
        }
        assert_eq!(parse("12"), Ok(12));
        assert!(matches!(parse("x"), Err(Failure::Error(_))));
    }

    #[test]
    fn group_is_send_sync() {
        assert_send_sync::<RaceGroup<u32, String>>();
    }
}
