//! Bounded-concurrency dispatch of tasks onto threads.
//!
//! A [`Pool`] is a weighted counting semaphore with a fixed number of permits. Every task it
//! dispatches holds one permit for as long as it runs, so no more than [`Pool::capacity`] tasks
//! started through the same pool are ever running at once.
//!
//! Waiters are served in arrival order. A request for many permits at the head of the queue
//! holds back smaller requests behind it, which is what lets [`Pool::run`] wait for the whole
//! pool to drain without being starved by newly dispatched work.

use std::{
    any::Any,
    collections::VecDeque,
    fmt, io, mem,
    num::NonZeroUsize,
    panic::resume_unwind,
    sync::{Arc, Mutex, OnceLock},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{select, Receiver, Sender};

use crate::{
    cancel::CancelScope,
    error::{Cancelled, DispatchError},
    source::{Source, Task},
    sync::MutexExt,
};

/// Finished task threads are joined once this many handles have piled up.
const REAP_THRESHOLD: usize = 64;

/// A builder object that can be used to configure and create a [`Pool`].
#[derive(Clone)]
pub struct PoolBuilder {
    name: Option<String>,
    capacity: usize,
}

impl PoolBuilder {
    /// Sets the base name of the threads spawned by the [`Pool`].
    ///
    /// Task threads are named `{name}-task`, and the thread started by [`Pool::listen`] is named
    /// `{name}-listener`.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the number of permits of the [`Pool`].
    ///
    /// A capacity of 0 (the default) uses the available parallelism of the host.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    pub fn build(self) -> Pool {
        let capacity = match self.capacity {
            0 => thread::available_parallelism().map_or(1, NonZeroUsize::get),
            n => n,
        };
        Pool {
            inner: Arc::new(PoolInner {
                capacity,
                name: self.name,
                state: Mutex::new(PoolState {
                    held: 0,
                    waiters: VecDeque::new(),
                    next_id: 0,
                }),
            }),
        }
    }
}

/// A limit on the number of concurrently running tasks.
///
/// [`Pool`] is a cheap handle: clones share the same permits.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    name: Option<String>,
    state: Mutex<PoolState>,
}

struct PoolState {
    held: usize,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

struct Waiter {
    id: u64,
    n: usize,
    /// Receives a message once the permits have been granted to this waiter.
    ready: Sender<()>,
}

impl PoolInner {
    /// Hands permits to queued waiters, strictly in order, for as long as they fit.
    fn grant(&self, state: &mut PoolState) {
        while let Some(waiter) = state.waiters.pop_front() {
            if self.capacity - state.held < waiter.n {
                state.waiters.push_front(waiter);
                break;
            }
            state.held += waiter.n;
            // The receiver outlives the waiter's queue entry, and the channel has room for this
            // single message, so this cannot fail or block.
            let _ = waiter.ready.send(());
        }
    }
}

/// Permits that are returned to their [`Pool`] when dropped, including during unwinding.
struct Permit {
    pool: Pool,
    n: usize,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.pool.release(self.n);
    }
}

impl Pool {
    /// Creates a [`Pool`] with `capacity` permits, or the host's available parallelism if
    /// `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Returns a builder that can be used to configure and create a [`Pool`].
    #[inline]
    pub fn builder() -> PoolBuilder {
        PoolBuilder {
            name: None,
            capacity: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of permits that are currently not held by anyone.
    pub fn available(&self) -> usize {
        self.inner.capacity - self.inner.state.locked().held
    }

    /// Blocks until `n` permits are available and takes them.
    ///
    /// Fails with [`Cancelled`] if `scope` is cancelled before that happens, including when it
    /// already is. A request for more permits than the pool's capacity can only end that way.
    pub fn acquire(&self, scope: &CancelScope, n: usize) -> Result<(), Cancelled> {
        if scope.is_cancelled() {
            return Err(Cancelled);
        }

        let (id, ready) = {
            let mut state = self.inner.state.locked();
            if state.waiters.is_empty() && self.inner.capacity - state.held >= n {
                state.held += n;
                return Ok(());
            }
            if n > self.inner.capacity {
                drop(state);
                log::warn!(
                    "requested {n} permits from a pool of {}; waiting for cancellation",
                    self.inner.capacity
                );
                scope.wait();
                return Err(Cancelled);
            }

            let (sender, ready) = crossbeam_channel::bounded(1);
            let id = state.next_id;
            state.next_id += 1;
            state.waiters.push_back(Waiter {
                id,
                n,
                ready: sender,
            });
            (id, ready)
        };

        log::trace!("waiting for {n} permits");
        select! {
            recv(ready) -> _ => Ok(()),
            recv(scope.done()) -> _ => {
                let mut state = self.inner.state.locked();
                if ready.try_recv().is_ok() {
                    // Granted while being cancelled. Give the permits back.
                    state.held -= n;
                    self.inner.grant(&mut state);
                } else if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
                    state.waiters.remove(pos);
                    if pos == 0 {
                        self.inner.grant(&mut state);
                    }
                }
                Err(Cancelled)
            }
        }
    }

    /// Takes `n` permits if that is possible without waiting.
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut state = self.inner.state.locked();
        let fits = state.waiters.is_empty() && self.inner.capacity - state.held >= n;
        if fits {
            state.held += n;
        }
        fits
    }

    /// Returns `n` permits to the pool, waking waiters that can now proceed.
    ///
    /// # Panics
    ///
    /// Panics if more permits are released than are currently held.
    pub fn release(&self, n: usize) {
        let mut state = self.inner.state.locked();
        assert!(n <= state.held, "released more permits than held");
        state.held -= n;
        self.inner.grant(&mut state);
    }

    fn permit(&self, scope: &CancelScope, n: usize) -> Result<Permit, Cancelled> {
        self.acquire(scope, n)?;
        Ok(Permit {
            pool: self.clone(),
            n,
        })
    }

    fn spawn_task(&self, permit: Permit, task: Task) -> io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.inner.name {
            builder = builder.name(format!("{name}-task"));
        }
        // If spawning fails, the closure is dropped and the permit with it.
        builder.spawn(move || {
            let _permit = permit;
            task();
        })
    }

    /// Runs every task of `source`, at most [`Pool::capacity`] at a time, and waits until the
    /// whole pool is idle again.
    ///
    /// A permit is taken before each task is pulled, so a task is only ever pulled once it can
    /// start right away. When the source is exhausted, this acquires every permit of the pool
    /// and hands them back, which also waits for tasks that other callers started on the same
    /// pool. Use [`Pool::run_own`] to wait only for the tasks started here.
    ///
    /// If `scope` is cancelled, no further tasks are pulled and [`DispatchError::Cancelled`] is
    /// returned right away, without waiting for running tasks.
    ///
    /// If a task panics, the panic is propagated to the caller once the pool has drained. Pulling
    /// stops early if the panic is noticed while tasks are still being dispatched.
    pub fn run<S: Source + ?Sized>(
        &self,
        scope: &CancelScope,
        source: &S,
    ) -> Result<(), DispatchError> {
        let mut spawned = Spawned::default();
        let dispatched = self.dispatch(scope, source, &mut spawned);
        if matches!(dispatched, Err(DispatchError::Cancelled(_))) {
            return dispatched;
        }

        self.acquire(scope, self.inner.capacity)?;
        self.release(self.inner.capacity);
        spawned.join();
        dispatched
    }

    /// Like [`Pool::run`], but only waits for the tasks started by this call.
    ///
    /// Tasks that other callers run on the same pool still count against its capacity, but they
    /// are not waited for. This makes it safe to call from inside a task of the same pool, as
    /// long as a permit is left for the nested tasks.
    ///
    /// Cancelling `scope` stops pulling, and the tasks already started are joined before
    /// [`DispatchError::Cancelled`] is returned.
    pub fn run_own<S: Source + ?Sized>(
        &self,
        scope: &CancelScope,
        source: &S,
    ) -> Result<(), DispatchError> {
        let mut spawned = Spawned::default();
        let dispatched = self.dispatch(scope, source, &mut spawned);
        spawned.join();
        dispatched
    }

    /// Pulls and starts tasks until the source runs dry or dispatch has to stop.
    fn dispatch<S: Source + ?Sized>(
        &self,
        scope: &CancelScope,
        source: &S,
        spawned: &mut Spawned,
    ) -> Result<(), DispatchError> {
        while !spawned.has_panicked() {
            let permit = self.permit(scope, 1)?;
            let Some(task) = source.next() else {
                break;
            };
            match self.spawn_task(permit, task) {
                Ok(handle) => spawned.push(handle),
                Err(e) => {
                    log::error!("failed to spawn task thread: {e}");
                    return Err(DispatchError::Spawn(e));
                }
            }
        }
        Ok(())
    }

    /// Dispatches tasks arriving on `feed` in the background, at most [`Pool::capacity`] at a
    /// time.
    ///
    /// This spawns a listener thread and returns immediately. The listener exits when `feed` is
    /// disconnected or `scope` is cancelled; tasks it has already started keep running.
    ///
    /// Tasks started by the listener are detached: their panics are not propagated to anyone.
    pub fn listen(&self, scope: &CancelScope, feed: Receiver<Task>) -> io::Result<()> {
        let pool = self.clone();
        let scope = scope.clone();
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.inner.name {
            builder = builder.name(format!("{name}-listener"));
        }
        builder.spawn(move || {
            log::trace!("listener starting");
            loop {
                let task = select! {
                    recv(scope.done()) -> _ => break,
                    recv(feed) -> msg => match msg {
                        Ok(task) => task,
                        Err(_) => break,
                    },
                };
                let Ok(permit) = pool.permit(&scope, 1) else {
                    break;
                };
                if let Err(e) = pool.spawn_task(permit, task) {
                    log::error!("failed to spawn task thread: {e}");
                }
            }
            log::trace!("listener exiting");
        })?;
        Ok(())
    }
}

/// Returns a handle to a process-wide pool sized to the host's available parallelism.
impl Default for Pool {
    fn default() -> Self {
        static DEFAULT: OnceLock<Pool> = OnceLock::new();
        DEFAULT
            .get_or_init(|| Pool::builder().name("raceway").build())
            .clone()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

/// Threads started by one [`Pool::run`] call.
#[derive(Default)]
struct Spawned {
    handles: Vec<JoinHandle<()>>,
    /// Payload of the first task panic observed.
    panic: Option<Box<dyn Any + Send + 'static>>,
}

impl Spawned {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
        if self.handles.len() >= REAP_THRESHOLD {
            self.reap();
        }
    }

    /// Joins the threads that have already exited.
    fn reap(&mut self) {
        let mut i = 0;
        while i < self.handles.len() {
            if self.handles[i].is_finished() {
                let handle = self.handles.swap_remove(i);
                self.record(handle.join());
            } else {
                i += 1;
            }
        }
    }

    fn record(&mut self, res: thread::Result<()>) {
        if let Err(payload) = res {
            if self.panic.is_none() {
                self.panic = Some(payload);
            }
        }
    }

    fn has_panicked(&self) -> bool {
        self.panic.is_some()
    }

    /// Joins every thread, and propagates the first panic if one of them panicked.
    fn join(mut self) {
        for handle in mem::take(&mut self.handles) {
            self.record(handle.join());
        }
        if let Some(payload) = self.panic {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}
