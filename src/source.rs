//! Lazy, pull-based task sources.
//!
//! A [`Source`] hands out zero-argument [`Task`]s one at a time. Sources are shared between
//! threads: any number of pullers may call [`Source::next`] concurrently, and every item of the
//! underlying collection is turned into a task for exactly one of them. Once a source reports
//! exhaustion it stays exhausted.
//!
//! Every variant keeps a cursor over a fixed backing store instead of a shared iterator.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::sync::MutexExt;

/// A unit of work produced by a [`Source`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A thread-safe producer of [`Task`]s.
pub trait Source: Send + Sync {
    /// Pulls the next task, or returns [`None`] if the source is exhausted.
    fn next(&self) -> Option<Task>;
}

impl<S: Source + ?Sized> Source for &S {
    #[inline]
    fn next(&self) -> Option<Task> {
        (**self).next()
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    #[inline]
    fn next(&self) -> Option<Task> {
        (**self).next()
    }
}

impl<S: Source + ?Sized> Source for Arc<S> {
    #[inline]
    fn next(&self) -> Option<Task> {
        (**self).next()
    }
}

/// Owns a fixed list of items and gives each one away exactly once.
struct Cells<T> {
    cells: Box<[Mutex<Option<T>>]>,
    cursor: AtomicUsize,
}

impl<T> Cells<T> {
    fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            cells: items.into_iter().map(|item| Mutex::new(Some(item))).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    fn take_next(&self) -> Option<(usize, T)> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        // The cursor hands every index to one caller only, so the cell is always still full.
        let item = self.cells.get(index)?.locked().take()?;
        Some((index, item))
    }
}

/// A [`Source`] over an ordered collection, created by [`slice`].
pub struct Slice<T, F> {
    items: Cells<T>,
    f: Arc<F>,
}

/// Creates a [`Source`] that calls `f(index, item)` once for every item, in order.
pub fn slice<T, F>(items: impl IntoIterator<Item = T>, f: F) -> Slice<T, F>
where
    T: Send + 'static,
    F: Fn(usize, T) + Send + Sync + 'static,
{
    Slice {
        items: Cells::new(items),
        f: Arc::new(f),
    }
}

impl<T, F> Source for Slice<T, F>
where
    T: Send + 'static,
    F: Fn(usize, T) + Send + Sync + 'static,
{
    fn next(&self) -> Option<Task> {
        let (index, item) = self.items.take_next()?;
        let f = self.f.clone();
        Some(Box::new(move || f(index, item)))
    }
}

/// A [`Source`] over a snapshot of key-value pairs, created by [`map`].
pub struct Map<K, V, F> {
    entries: Cells<(K, V)>,
    f: Arc<F>,
}

/// Creates a [`Source`] that calls `f(key, value)` once for every entry.
///
/// The entries are collected when the source is created. They are produced in the iteration
/// order of `entries`, which for hash maps is unspecified.
pub fn map<K, V, F>(entries: impl IntoIterator<Item = (K, V)>, f: F) -> Map<K, V, F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(K, V) + Send + Sync + 'static,
{
    Map {
        entries: Cells::new(entries),
        f: Arc::new(f),
    }
}

impl<K, V, F> Source for Map<K, V, F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(K, V) + Send + Sync + 'static,
{
    fn next(&self) -> Option<Task> {
        let (_, (key, value)) = self.entries.take_next()?;
        let f = self.f.clone();
        Some(Box::new(move || f(key, value)))
    }
}

/// Primitive integers usable with [`range`].
///
/// Values are stepped through as `i64`, so the `usize` bounds of a range must fit into an `i64`.
pub trait Integer: Copy + Send + Sync + 'static {
    fn to_i64(self) -> i64;
    fn from_i64(n: i64) -> Self;
}

macro_rules! impl_integer {
    ($($t:ty),*) => {$(
        impl Integer for $t {
            #[inline]
            fn to_i64(self) -> i64 {
                self as i64
            }

            #[inline]
            fn from_i64(n: i64) -> Self {
                n as $t
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, usize);

/// A [`Source`] over an inclusive integer interval, created by [`range`].
pub struct Range<T, F> {
    start: i64,
    /// Offset of the final value. Always fits, even when the range spans all of `i64`.
    last: u64,
    descending: bool,
    /// Offset of the next value, or `None` once exhausted.
    cursor: Mutex<Option<u64>>,
    f: Arc<F>,
    _p: PhantomData<fn(T)>,
}

/// Creates a [`Source`] that calls `f(n)` for every `n` from `start` to `end`, both inclusive.
///
/// The values count up if `start < end` and down otherwise, so `range(3, 1, f)` produces `3, 2, 1`
/// and `range(5, 5, f)` produces `5` once.
pub fn range<T, F>(start: T, end: T, f: F) -> Range<T, F>
where
    T: Integer,
    F: Fn(T) + Send + Sync + 'static,
{
    let (start, end) = (start.to_i64(), end.to_i64());
    let distance = (i128::from(end) - i128::from(start)).unsigned_abs();
    Range {
        start,
        last: u64::try_from(distance).unwrap_or(u64::MAX),
        descending: start >= end,
        cursor: Mutex::new(Some(0)),
        f: Arc::new(f),
        _p: PhantomData,
    }
}

impl<T, F> Source for Range<T, F>
where
    T: Integer,
    F: Fn(T) + Send + Sync + 'static,
{
    fn next(&self) -> Option<Task> {
        let offset = {
            let mut cursor = self.cursor.locked();
            let offset = (*cursor)?;
            *cursor = offset.checked_add(1).filter(|&next| next <= self.last);
            offset
        };
        let offset = i128::from(offset);
        let n = if self.descending {
            i128::from(self.start) - offset
        } else {
            i128::from(self.start) + offset
        };
        let n = T::from_i64(n as i64);
        let f = self.f.clone();
        Some(Box::new(move || f(n)))
    }
}

/// A [`Source`] that produces at most one task, created by [`once`] or [`Once::empty`].
pub struct Once {
    task: Mutex<Option<Task>>,
}

/// Creates a [`Source`] that produces `task` once.
pub fn once<F: FnOnce() + Send + 'static>(task: F) -> Once {
    Once {
        task: Mutex::new(Some(Box::new(task))),
    }
}

impl Once {
    /// Creates a [`Once`] source that is exhausted from the start.
    pub fn empty() -> Self {
        Self {
            task: Mutex::new(None),
        }
    }
}

impl Source for Once {
    fn next(&self) -> Option<Task> {
        self.task.locked().take()
    }
}

/// An endless [`Source`] created by [`repeat`].
pub struct Repeat<F> {
    f: Arc<F>,
}

/// Creates a [`Source`] that produces a call to `f` on every pull, forever.
///
/// Dispatching it with [`Pool::run`][crate::Pool::run] keeps every permit of the pool busy until
/// the dispatching scope is cancelled.
pub fn repeat<F: Fn() + Send + Sync + 'static>(f: F) -> Repeat<F> {
    Repeat { f: Arc::new(f) }
}

impl<F: Fn() + Send + Sync + 'static> Source for Repeat<F> {
    fn next(&self) -> Option<Task> {
        let f = self.f.clone();
        Some(Box::new(move || f()))
    }
}
