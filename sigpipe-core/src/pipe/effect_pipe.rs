//! Effect pipelines.
//!
//! An [`EffectPipe`] describes a chain of stages ending in a callback. Nothing
//! happens until [`EffectPipe::run`] materialises the chain into one
//! [`Effect`]: every time the source changes the effect reads it and pushes
//! the value through the stages, each of which decides whether to hand it on.
//!
//! Stage state (skip counters, previous values) is created by `run`, so
//! running the same description twice yields two independent effects.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::emit::Emit;
use super::source::Source;
use super::transform::{self, Transform};
use crate::error::Result;
use crate::options::PipeOptions;
use crate::reactive::{Effect, EffectContext, EffectHandle, Runtime};

/// Context passed to every stage and to the terminal callback.
pub type RunContext = EffectContext;

/// One link of a materialised chain.
pub(crate) type Stage<T> = Arc<dyn Fn(T, &RunContext) + Send + Sync>;

/// Wraps the downstream stage into the stage that feeds it.
type Build<S, T> = Arc<dyn Fn(Stage<T>) -> Stage<S> + Send + Sync>;

/// A chain of effect stages starting at `S` and currently producing `T`.
///
/// ```rust
/// use sigpipe_core::{effect_pipe, reactive::Signal};
/// use std::sync::{Arc, Mutex};
///
/// let query = Signal::new(String::new());
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let handle = effect_pipe(query.clone())
///     .skip(1)
///     .unwrap()
///     .map(|q| q.len())
///     .run({
///         let seen = seen.clone();
///         move |len, _| seen.lock().unwrap().push(len)
///     });
///
/// query.set("abc".into());
/// assert_eq!(*seen.lock().unwrap(), vec![3]);
/// handle.stop();
/// ```
pub struct EffectPipe<S: Source, T> {
    source: S,
    options: PipeOptions,
    build: Build<S::Value, T>,
}

/// Start an effect pipeline from `source`.
pub fn effect_pipe<S: Source>(source: S) -> EffectPipe<S, S::Value> {
    EffectPipe::new(source)
}

impl<S: Source> EffectPipe<S, S::Value> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, PipeOptions::default())
    }

    pub fn with_options(source: S, options: PipeOptions) -> Self {
        Self {
            source,
            options,
            build: Arc::new(|next: Stage<S::Value>| next),
        }
    }
}

impl<S, T> EffectPipe<S, T>
where
    S: Source,
    T: Send + 'static,
{
    fn then<U>(self, wrap: impl Fn(Stage<U>) -> Stage<T> + Send + Sync + 'static) -> EffectPipe<S, U> {
        let prev = self.build;
        EffectPipe {
            source: self.source,
            options: self.options,
            build: Arc::new(move |next: Stage<U>| prev(wrap(next))),
        }
    }

    /// Insert a transform stage. `make` builds fresh transform state for
    /// every `run`.
    fn through<X>(self, stage: &'static str, make: impl Fn() -> X + Send + Sync + 'static) -> EffectPipe<S, X::Out>
    where
        X: Transform<T> + Send + 'static,
        X::Out: Send + 'static,
    {
        self.then(move |next: Stage<X::Out>| -> Stage<T> {
            let transform = Mutex::new(make());
            Arc::new(move |value: T, cx: &RunContext| {
                let out = transform.lock().apply(value);
                match out {
                    Emit::Value(out) => next(out, cx),
                    Emit::Skipped => trace!(effect = %cx.handle().subscriber_id(), stage, "value skipped"),
                }
            })
        })
    }

    /// Only pass values for which `predicate` holds.
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let filter = transform::filter(predicate);
        self.through("filter", move || filter.clone())
    }

    /// Pass the `Some` results of `f`, unwrapped.
    pub fn filter_map<U, F>(self, f: F) -> EffectPipe<S, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let filter_map = transform::filter_map(f);
        self.through("filter_map", move || filter_map.clone())
    }

    pub fn map<U, F>(self, f: F) -> EffectPipe<S, U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.then(move |next: Stage<U>| -> Stage<T> {
            let f = Arc::clone(&f);
            Arc::new(move |value: T, cx: &RunContext| next(f(value), cx))
        })
    }

    /// Observe values without changing them.
    pub fn tap<F>(self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.map(move |value| {
            f(&value);
            value
        })
    }

    /// Drop the first `n` values. Fails if `n` is zero.
    pub fn skip(self, n: usize) -> Result<Self> {
        let skip = transform::skip(n)?;
        Ok(self.through("skip", move || skip.clone()))
    }

    /// Pass the first `n` values, then stop the effect at the next one.
    /// Fails if `n` is zero.
    pub fn take(self, n: usize) -> Result<Self> {
        let take = transform::take(n)?;
        Ok(self.then(move |next: Stage<T>| -> Stage<T> {
            let take = Mutex::new(take.clone());
            Arc::new(move |value: T, cx: &RunContext| {
                let out = take.lock().apply(value);
                match out {
                    Emit::Value(value) => next(value, cx),
                    Emit::Skipped => {
                        trace!(effect = %cx.handle().subscriber_id(), "take exhausted, stopping");
                        cx.stop();
                    }
                }
            })
        }))
    }

    /// Hand each value on after `delay`, dropping it if the effect runs again
    /// or stops first.
    pub fn debounce(self, delay: Duration) -> Self {
        self.then(move |next: Stage<T>| -> Stage<T> {
            Arc::new(move |value: T, cx: &RunContext| {
                let next = Arc::clone(&next);
                let fire_cx = cx.clone();
                let timer = Runtime::set_timeout(delay, move || next(value, &fire_cx));
                cx.on_cleanup(move || {
                    Runtime::clear_timeout(timer);
                });
            })
        })
    }

    /// Materialise the chain and register it as one effect.
    pub fn run<F>(self, callback: F) -> EffectHandle
    where
        F: Fn(T, &RunContext) + Send + Sync + 'static,
    {
        let options = self.options.clone();
        self.run_with_options(callback, options)
    }

    /// Like [`run`](Self::run), replacing the options given at construction.
    pub fn run_with_options<F>(self, callback: F, options: PipeOptions) -> EffectHandle
    where
        F: Fn(T, &RunContext) + Send + Sync + 'static,
    {
        let terminal: Stage<T> = Arc::new(callback);
        let head = (self.build)(terminal);
        let source = self.source;

        Effect::with_options(
            move |cx: &EffectContext| match source.read() {
                Emit::Value(value) => head(value, cx),
                Emit::Skipped => trace!(effect = %cx.handle().subscriber_id(), "source skipped"),
            },
            &options,
        )
    }
}

impl<S, T> EffectPipe<S, T>
where
    S: Source,
    T: Clone + Send + 'static,
{
    /// Pair each value with the previous one (`None` the first time).
    pub fn pair(self) -> EffectPipe<S, (T, Option<T>)> {
        self.through("pair", transform::pair::<T>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeError;
    use crate::reactive::Signal;

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T, &RunContext) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |value: T, _: &RunContext| sink.lock().push(value))
    }

    #[test]
    fn run_invokes_callback_with_current_and_later_values() {
        let source = Signal::new(1);
        let (log, sink) = recorder();

        let handle = effect_pipe(source.clone()).map(|v| v * 10).run(sink);
        source.set(2);

        assert_eq!(*log.lock(), vec![10, 20]);
        handle.stop();
        source.set(3);
        assert_eq!(*log.lock(), vec![10, 20]);
    }

    #[test]
    fn filter_blocks_rejected_values() {
        let source = Signal::new(1);
        let (log, sink) = recorder();

        let handle = effect_pipe(source.clone()).filter(|v| v % 2 == 0).run(sink);
        for v in 2..=5 {
            source.set(v);
        }

        assert_eq!(*log.lock(), vec![2, 4]);
        handle.stop();
    }

    #[test]
    fn skip_then_take_versus_take_then_skip() {
        let source = Signal::new(1);
        let (skip_take, sink) = recorder();
        let a = effect_pipe(source.clone())
            .skip(2)
            .unwrap()
            .take(2)
            .unwrap()
            .run(sink);

        let (take_skip, sink) = recorder();
        let b = effect_pipe(source.clone())
            .take(3)
            .unwrap()
            .skip(2)
            .unwrap()
            .run(sink);

        for v in 2..=6 {
            source.set(v);
        }

        assert_eq!(*skip_take.lock(), vec![3, 4]);
        assert_eq!(*take_skip.lock(), vec![3]);
        assert!(a.is_stopped());
        assert!(b.is_stopped());
    }

    #[test]
    fn take_stops_after_n_invocations() {
        let source = Signal::new(0);
        let (log, sink) = recorder();

        let handle = effect_pipe(source.clone()).take(3).unwrap().run(sink);
        for v in 1..10 {
            source.set(v);
        }

        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(handle.is_stopped());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn zero_counts_fail_at_construction() {
        let source = Signal::new(0);
        assert!(matches!(
            effect_pipe(source.clone()).skip(0),
            Err(PipeError::InvalidCount { operator: "skip", count: 0 })
        ));
        assert!(effect_pipe(source).take(0).is_err());
    }

    #[test]
    fn pair_passes_previous_value() {
        let source = Signal::new('a');
        let (log, sink) = recorder();

        let handle = effect_pipe(source.clone()).pair().run(sink);
        source.set('b');
        source.set('c');

        assert_eq!(
            *log.lock(),
            vec![('a', None), ('b', Some('a')), ('c', Some('b'))]
        );
        handle.stop();
    }

    #[test]
    fn debounce_emits_only_after_quiet_period() {
        let source = Signal::new(0);
        let (log, sink) = recorder();

        let handle = effect_pipe(source.clone())
            .debounce(Duration::from_millis(100))
            .run(sink);
        assert!(log.lock().is_empty());

        Runtime::advance(Duration::from_millis(100));
        assert_eq!(*log.lock(), vec![0]);

        source.set(1);
        Runtime::advance(Duration::from_millis(60));
        source.set(2);
        Runtime::advance(Duration::from_millis(60));
        assert_eq!(*log.lock(), vec![0]);
        assert_eq!(Runtime::pending_timers(), 1);

        Runtime::advance(Duration::from_millis(40));
        assert_eq!(*log.lock(), vec![0, 2]);
        handle.stop();
    }

    #[test]
    fn stopping_cancels_pending_debounce() {
        let source = Signal::new(0);
        let (log, sink) = recorder();

        let handle = effect_pipe(source.clone())
            .debounce(Duration::from_millis(10))
            .run(sink);
        assert_eq!(Runtime::pending_timers(), 1);

        handle.stop();
        assert_eq!(Runtime::pending_timers(), 0);

        Runtime::advance(Duration::from_secs(1));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn tuple_sources_share_one_run() {
        let a = Signal::new(1);
        let b = Signal::new(10);
        let (log, sink) = recorder();

        let handle = effect_pipe((a.clone(), b.clone()))
            .map(|(a, b)| a + b)
            .run(sink);

        Runtime::batch(|| {
            a.set(2);
            b.set(20);
        });
        b.set(30);

        assert_eq!(*log.lock(), vec![11, 22, 32]);
        handle.stop();
    }

    #[test]
    fn each_run_gets_fresh_stage_state() {
        let source = Signal::new(0);
        let (first, sink) = recorder();
        let handle = effect_pipe(source.clone()).skip(1).unwrap().run(sink);
        source.set(1);
        handle.stop();

        // Same description, new state: the first value is skipped again.
        let (second, sink) = recorder();
        let handle = effect_pipe(source.clone()).skip(1).unwrap().run(sink);
        source.set(2);

        assert_eq!(*first.lock(), vec![1]);
        assert_eq!(*second.lock(), vec![2]);
        handle.stop();
    }

    #[test]
    fn tap_observes_without_changing() {
        let source = Signal::new(5);
        let taps = Arc::new(Mutex::new(Vec::new()));
        let (log, sink) = recorder();

        let handle = effect_pipe(source)
            .tap({
                let taps = taps.clone();
                move |v: &i32| taps.lock().push(*v)
            })
            .run(sink);

        assert_eq!(*taps.lock(), vec![5]);
        assert_eq!(*log.lock(), vec![5]);
        handle.stop();
    }
}
