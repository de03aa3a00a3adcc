//! Racing and falling back across alternative functions and arguments.
//!
//! An [`Executor`] is given a list of candidate functions and a list of candidate arguments, and
//! a [`Method`] for each of the two axes. It produces the first usable result:
//!
//! - If the function axis is [`Method::Concurrent`], the arguments are tried one after the
//!   other, and for each argument all functions race against each other. This also applies when
//!   both axes are [`Method::Concurrent`]: racing the functions takes precedence.
//! - Otherwise the functions are tried one after the other (in order, or shuffled for
//!   [`Method::Random`]), and for each function the arguments race against each other
//!   ([`Method::Concurrent`]) or are tried one at a time in order or shuffled.
//!
//! Each step of such a fallback chain is a [`RaceGroup`], and the next step is only started
//! once the previous group has been decided and all of its dispatched candidates have either
//! reported or been dropped. The outcome of the last group is returned as is when every step
//! fails.

use std::{fmt, str::FromStr, sync::Arc};

use rand::seq::SliceRandom;

use crate::{
    cancel::CancelScope,
    error::{DispatchError, Error, UnknownMethod},
    pool::Pool,
    race::{Failure, RaceGroup},
    source,
};

/// How the alternatives along one axis are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// All alternatives race at once, and the first success wins.
    #[default]
    Concurrent,
    /// Alternatives are tried one at a time, in the order given.
    Serial,
    /// Alternatives are tried one at a time, in a random order.
    Random,
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "concurrent" => Ok(Method::Concurrent),
            "serial" => Ok(Method::Serial),
            "random" => Ok(Method::Random),
            _ => Err(UnknownMethod(s.to_owned())),
        }
    }
}

impl TryFrom<u8> for Method {
    type Error = UnknownMethod;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Method::Concurrent),
            1 => Ok(Method::Serial),
            2 => Ok(Method::Random),
            n => Err(UnknownMethod(n.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Concurrent => "concurrent",
            Method::Serial => "serial",
            Method::Random => "random",
        })
    }
}

/// A builder object that can be used to configure and create an [`Executor`].
#[derive(Clone)]
pub struct ExecutorBuilder {
    name: Option<String>,
    capacity: usize,
}

impl ExecutorBuilder {
    /// Sets the base name of the threads spawned by the [`Executor`].
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets how many candidates may run at once.
    ///
    /// A capacity of 0 (the default) uses the host's available parallelism.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    pub fn build(self) -> Executor {
        let mut builder = Pool::builder().capacity(self.capacity);
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        Executor {
            pool: builder.build(),
            name: self.name,
        }
    }
}

/// Produces the first successful result among alternative functions and arguments.
///
/// The [`Executor`] holds no state besides its [`Pool`], which bounds how many candidates run at
/// once across all concurrent calls on this executor (and its clones). A call only ever waits for
/// the candidates it started itself, so concurrent calls sharing a pool do not hold each other
/// up, and a candidate may call into an executor sharing its pool as long as that pool has a
/// permit to spare.
#[derive(Debug, Clone)]
pub struct Executor {
    pool: Pool,
    name: Option<String>,
}

impl Executor {
    /// Creates an [`Executor`] with a pool of its own that runs at most `capacity` candidates at
    /// once.
    ///
    /// If `capacity` is 0, the pool is sized to the host's available parallelism. Executors
    /// created this way never share permits with each other, so a candidate can always call into
    /// a freshly created executor. Use [`Executor::with_pool`] to share a pool.
    pub fn new(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Creates an [`Executor`] that dispatches candidates through `pool`.
    pub fn with_pool(pool: Pool) -> Self {
        Self { pool, name: None }
    }

    /// Returns a builder that can be used to configure and create an [`Executor`].
    #[inline]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder {
            name: None,
            capacity: 0,
        }
    }

    #[inline]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Calls the functions `fns` with the arguments `args`, combining them according to
    /// `arg_method` and `fn_method`, and returns the first success.
    ///
    /// If `args` is empty, each function is called once with `A::default()`.
    ///
    /// If nothing succeeds, the failure of the last alternative tried is returned: the last
    /// error reported by one of its candidates, or [`Error::AllSkipped`] if all of them skipped.
    /// [`Error::NoFunction`] is returned without doing anything if `fns` is empty.
    ///
    /// Every call is independent of the caller: it cannot be cancelled from outside. Use
    /// [`Executor::execute_in`] to run under a scope the caller controls.
    pub fn execute<A, R, E, F>(
        &self,
        arg_method: Method,
        fn_method: Method,
        args: impl IntoIterator<Item = A>,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<R, Error<E>>
    where
        A: Clone + Default + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
    {
        self.execute_in(&CancelScope::new(), arg_method, fn_method, args, fns)
    }

    /// Like [`Executor::execute`], but every race runs under a child of `scope`.
    ///
    /// Cancelling `scope` drops all pending candidates, stops the fallback chain and makes this
    /// return [`Error::Cancelled`], unless a result was delivered first.
    pub fn execute_in<A, R, E, F>(
        &self,
        scope: &CancelScope,
        arg_method: Method,
        fn_method: Method,
        args: impl IntoIterator<Item = A>,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<R, Error<E>>
    where
        A: Clone + Default + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
    {
        let mut fns: Vec<Arc<F>> = fns.into_iter().map(Arc::new).collect();
        if fns.is_empty() {
            return Err(Error::NoFunction);
        }
        let mut args: Vec<A> = args.into_iter().collect();
        if arg_method == Method::Random {
            args.shuffle(&mut rand::thread_rng());
        }

        log::trace!(
            "executing {} functions over {} arguments ({fn_method} functions, {arg_method} arguments)",
            fns.len(),
            args.len(),
        );

        match fn_method {
            Method::Concurrent => {
                if args.is_empty() {
                    args.push(A::default());
                }
                fallback(args, |arg| {
                    let candidates = fns.iter().map(|f| (f.clone(), arg.clone())).collect();
                    race(&self.pool, scope, candidates)
                })
            }
            Method::Serial | Method::Random => {
                if fn_method == Method::Random {
                    fns.shuffle(&mut rand::thread_rng());
                }
                let pool = match arg_method {
                    Method::Concurrent => self.pool.clone(),
                    Method::Serial | Method::Random => self.serial_pool(),
                };
                fallback(fns, |f| {
                    if args.is_empty() {
                        let group = RaceGroup::child_of(scope, 1);
                        group.submit(move || f(A::default()));
                        let outcome = settle(&group, Ok(()));
                        group.cancel();
                        return outcome;
                    }
                    let candidates = args.iter().map(|arg| (f.clone(), arg.clone())).collect();
                    race(&pool, scope, candidates)
                })
            }
        }
    }

    /// Races all functions for each argument in turn.
    pub fn execute_concurrent_fn<A, R, E, F>(
        &self,
        args: impl IntoIterator<Item = A>,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<R, Error<E>>
    where
        A: Clone + Default + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
    {
        self.execute(Method::Serial, Method::Concurrent, args, fns)
    }

    /// Races all arguments for each function in turn.
    pub fn execute_concurrent_arg<A, R, E, F>(
        &self,
        args: impl IntoIterator<Item = A>,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<R, Error<E>>
    where
        A: Clone + Default + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
    {
        self.execute(Method::Concurrent, Method::Serial, args, fns)
    }

    /// Tries every function with every argument, one at a time and in order, until one succeeds.
    pub fn execute_serial<A, R, E, F>(
        &self,
        args: impl IntoIterator<Item = A>,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<R, Error<E>>
    where
        A: Clone + Default + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
    {
        self.execute(Method::Serial, Method::Serial, args, fns)
    }

    /// Like [`Executor::execute_serial`], but functions and arguments are shuffled first.
    pub fn execute_random<A, R, E, F>(
        &self,
        args: impl IntoIterator<Item = A>,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<R, Error<E>>
    where
        A: Clone + Default + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
    {
        self.execute(Method::Random, Method::Random, args, fns)
    }

    /// A single-permit pool that turns an argument race into an ordered fallback.
    fn serial_pool(&self) -> Pool {
        let builder = Pool::builder().capacity(1);
        match &self.name {
            Some(name) => builder.name(format!("{name}-serial")).build(),
            None => builder.build(),
        }
    }
}

/// Same as [`Executor::new`] with a capacity of 0.
impl Default for Executor {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Races one candidate per `(function, argument)` pair, dispatched through `pool`.
fn race<A, R, E, F>(
    pool: &Pool,
    scope: &CancelScope,
    candidates: Vec<(Arc<F>, A)>,
) -> Result<R, Error<E>>
where
    A: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Result<R, Failure<E>> + Send + Sync + 'static,
{
    let group = RaceGroup::child_of(scope, candidates.len());
    let submitter = group.clone();
    let source = source::slice(candidates, move |_, (f, arg): (Arc<F>, A)| {
        submitter.submit(move || f(arg));
    });
    let dispatched = pool.run_own(scope, &source);
    let outcome = settle(&group, dispatched);
    group.cancel();
    outcome
}

/// Turns the state of a group whose candidates have all returned into its final outcome.
fn settle<R, E>(
    group: &RaceGroup<R, E>,
    dispatched: Result<(), DispatchError>,
) -> Result<R, Error<E>>
where
    R: Send + 'static,
    E: Send + 'static,
{
    match group.resolve() {
        Some(outcome) => outcome,
        // Nobody reported, so every candidate was dropped by outside cancellation.
        None => Err(dispatched.err().map_or(Error::Cancelled, Error::from)),
    }
}

/// Calls `attempt` with each alternative in turn until one succeeds.
///
/// Moves on only when an alternative fails on its candidates' account; cancellation and spawn
/// failures end the chain immediately.
fn fallback<T, R, E>(
    alternatives: Vec<T>,
    mut attempt: impl FnMut(T) -> Result<R, Error<E>>,
) -> Result<R, Error<E>> {
    let total = alternatives.len();
    let mut outcome = Err(Error::NoFunction);
    for (i, alternative) in alternatives.into_iter().enumerate() {
        outcome = attempt(alternative);
        match &outcome {
            Err(Error::Failed(_) | Error::AllSkipped) if i + 1 < total => {
                log::debug!("alternative {} of {total} failed, falling back", i + 1);
            }
            _ => break,
        }
    }
    outcome
}
