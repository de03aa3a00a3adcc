use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use crossbeam_channel::{unbounded, Sender};

use crate::{cancel::CancelScope, error::QueueError, pool::Pool, source::Task, sync::MutexExt};

/// A double-ended queue of items that are handed to a handler function in the background.
///
/// Items are processed by a [`Pool`] listener, at most `capacity` at a time. Which item runs is
/// decided only once a permit is free for it, so [`JobQueue::push_front`] lets an item overtake
/// every item that is still waiting.
///
/// The queue has to be started with [`JobQueue::start`] before items can be pushed. Once closed,
/// either explicitly or by cancelling the scope it was started in, it cannot be reused.
pub struct JobQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    pool: Pool,
    handler: Box<dyn Fn(T) + Send + Sync + 'static>,
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    items: VecDeque<T>,
    /// Feed of the pool listener. One task per pushed item.
    feed: Option<Sender<Task>>,
    scope: Option<CancelScope>,
    closed: bool,
}

impl<T> QueueState<T> {
    /// Marks the queue closed if its scope was cancelled behind its back.
    fn refresh(&mut self) {
        if !self.closed && self.scope.as_ref().map_or(false, CancelScope::is_cancelled) {
            log::debug!("job queue scope cancelled, closing");
            self.shut();
        }
    }

    fn shut(&mut self) {
        self.closed = true;
        self.items.clear();
        self.feed = None;
        if let Some(scope) = &self.scope {
            scope.cancel();
        }
    }
}

impl<T: Send + 'static> JobQueue<T> {
    /// Creates a queue that calls `handler` on its items, at most `capacity` at once.
    ///
    /// A `capacity` of 0 uses the host's available parallelism.
    pub fn new<F>(capacity: usize, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::with_pool(Pool::new(capacity), handler)
    }

    /// Creates a queue whose items are dispatched through `pool`.
    pub fn with_pool<F>(pool: Pool, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(QueueInner {
                pool,
                handler: Box::new(handler),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    feed: None,
                    scope: None,
                    closed: false,
                }),
            }),
        }
    }

    /// Starts processing items in the background.
    ///
    /// Cancelling `scope` closes the queue.
    pub fn start(&self, scope: &CancelScope) -> Result<(), QueueError> {
        let mut state = self.inner.state.locked();
        state.refresh();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.scope.is_some() {
            return Err(QueueError::AlreadyStarted);
        }

        let scope = scope.child();
        let (sender, receiver) = unbounded();
        self.inner
            .pool
            .listen(&scope, receiver)
            .map_err(QueueError::Spawn)?;
        state.feed = Some(sender);
        state.scope = Some(scope);
        Ok(())
    }

    /// Appends `item` to the back of the queue.
    pub fn push_back(&self, item: T) -> Result<(), QueueError> {
        self.push(item, VecDeque::push_back)
    }

    /// Puts `item` in front of every item that has not started yet.
    pub fn push_front(&self, item: T) -> Result<(), QueueError> {
        self.push(item, VecDeque::push_front)
    }

    fn push(&self, item: T, insert: fn(&mut VecDeque<T>, T)) -> Result<(), QueueError> {
        let mut state = self.inner.state.locked();
        state.refresh();
        if state.closed {
            return Err(QueueError::Closed);
        }
        let Some(feed) = &state.feed else {
            return Err(QueueError::NotStarted);
        };

        // The item is picked when the task starts, not when it is queued.
        let inner = self.inner.clone();
        let task: Task = Box::new(move || {
            let next = inner.state.locked().items.pop_front();
            if let Some(item) = next {
                (inner.handler)(item);
            }
        });
        if feed.send(task).is_err() {
            // The listener is gone, which only happens once the scope is cancelled.
            state.shut();
            return Err(QueueError::Closed);
        }
        insert(&mut state.items, item);
        Ok(())
    }

    /// Stops processing and discards every item that has not started yet.
    ///
    /// Items that are already being handled run to completion.
    pub fn close(&self) -> Result<(), QueueError> {
        let mut state = self.inner.state.locked();
        state.refresh();
        if state.closed {
            return Err(QueueError::Closed);
        }
        log::trace!("closing job queue with {} pending items", state.items.len());
        state.shut();
        Ok(())
    }

    /// Returns the number of items waiting to be handled.
    pub fn len(&self) -> usize {
        let mut state = self.inner.state.locked();
        state.refresh();
        state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for JobQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.locked();
        f.debug_struct("JobQueue")
            .field("pending", &state.items.len())
            .field("started", &state.scope.is_some())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}
