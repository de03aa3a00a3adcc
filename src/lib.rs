//! Bounded thread dispatch and first-success racing across alternative functions and arguments.
//!
//! (if you need to process a homogeneous collection in parallel, check out [`rayon`] instead; if
//! you're racing large numbers of I/O requests, an `async` runtime will serve you better than one
//! thread per candidate)
//!
//! # Overview
//!
//! The building blocks, from the bottom up:
//!
//! - [`CancelScope`] is a hierarchical cancellation signal that threads can poll or `select!` on.
//! - A [`Source`] lazily produces [`Task`]s. The [`source`] module has sources over slices, maps,
//!   integer ranges, a single closure, and an endless repetition of one.
//! - [`Pool`] is a FIFO counting semaphore that bounds how many tasks run at once. [`Pool::run`]
//!   pulls tasks from a [`Source`] only when a permit is free for them, runs each on its own
//!   thread and waits for the pool to drain; [`Pool::run_own`] waits only for the tasks it
//!   started. [`Pool::listen`] does the same for tasks arriving over a channel.
//! - [`RaceGroup`] collects the outcomes of a fixed number of candidates. The first success is
//!   kept and cancels the rest. If nobody succeeds, the last reported error is kept, or
//!   [`Error::AllSkipped`] if every candidate abstained with [`Failure::Skip`].
//! - [`Executor`] combines all of the above: it races or falls back across a list of functions and
//!   a list of arguments, each axis according to its own [`Method`].
//! - [`JobQueue`] feeds items pushed from the outside into a [`Pool`] listener.
//!
//! Panics in tasks and candidates are forwarded to the thread waiting for them, like they would
//! be if that thread had done the work itself.
//!
//! # Usage
//!
//! Racing two functions against each other:
//!
//! ```
//! use std::{thread, time::Duration};
//! use raceway::{Executor, Failure, Method};
//!
//! type Lookup = fn(u64) -> Result<u64, Failure<String>>;
//!
//! fn cached(n: u64) -> Result<u64, Failure<String>> {
//!     Ok(n * 2)
//! }
//!
//! fn computed(n: u64) -> Result<u64, Failure<String>> {
//!     thread::sleep(Duration::from_millis(200));
//!     Ok(n * 2)
//! }
//!
//! let executor = Executor::new(4);
//! let fns: [Lookup; 2] = [computed, cached];
//! let result = executor.execute(Method::Serial, Method::Concurrent, [21], fns);
//! assert_eq!(result.unwrap(), 42);
//! ```
//!
//! Falling back from one argument to the next, skipping the ones that don't apply:
//!
//! ```
//! use raceway::{Error, Executor, Failure};
//!
//! let parse = |s: &'static str| -> Result<u16, Failure<std::num::ParseIntError>> {
//!     if s.is_empty() {
//!         return Err(Failure::Skip);
//!     }
//!     Ok(s.parse()?)
//! };
//!
//! let executor = Executor::default();
//! assert_eq!(executor.execute_serial(["", "port", "8080"], [parse]).unwrap(), 8080);
//! assert!(matches!(executor.execute_serial(["", ""], [parse]), Err(Error::AllSkipped)));
//! ```
//!
//! Dispatching a range of tasks with bounded parallelism:
//!
//! ```
//! use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
//! use raceway::{source, CancelScope, Pool};
//!
//! let pool = Pool::new(4);
//! let sum = Arc::new(AtomicU64::new(0));
//! let total = sum.clone();
//! let tasks = source::range(1u32, 100, move |n| {
//!     total.fetch_add(u64::from(n), Ordering::Relaxed);
//! });
//! pool.run(&CancelScope::new(), &tasks).unwrap();
//! assert_eq!(sum.load(Ordering::Relaxed), 5050);
//! ```
//!
//! [`rayon`]: https://crates.io/crates/rayon

mod cancel;
mod error;
mod executor;
mod pool;
mod queue;
mod race;
mod slot;
pub mod source;
mod sync;
#[cfg(test)]
mod test;

pub use cancel::CancelScope;
pub use error::{Cancelled, DispatchError, Error, QueueError, UnknownMethod};
pub use executor::{Executor, ExecutorBuilder, Method};
pub use pool::{Pool, PoolBuilder};
pub use queue::JobQueue;
pub use race::{Failure, RaceGroup};
pub use source::{Source, Task};
