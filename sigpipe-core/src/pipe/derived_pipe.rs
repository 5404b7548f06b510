//! Derived-value pipelines.
//!
//! Every operator on a [`DerivedPipe`] returns a new pipe backed by its own
//! [`Memo`] that reads the previous one. Stateful operators keep the last
//! value they produced and return it whenever upstream skips or the operator
//! itself rejects a value, so a skip never erases what a chain already
//! computed. `Skipped` is only ever observed before the first value gets
//! through.
//!
//! Each node's output carries a version that only moves when the node lets a
//! new value through. A held value keeps its version, and stateful stages
//! ignore an upstream whose version has not moved, so re-reading a held value
//! never counts as a new arrival. Nodes compare outputs by version, so a held
//! value does not reach readers at all: effects reading the pipe stay idle.
//!
//! All pipes derived from one root share a chain: the list of effects
//! created by `debounce` stages and a pending-teardown flag. `destroy` on any
//! pipe of the chain stops all of those effects.
//!
//! # Teardown from `take`
//!
//! Computations stay free of teardown. Once a `take` stage has let `n`
//! values through, its next computation only raises the chain's teardown
//! flag. Reads through the pipe API ([`DerivedPipe::get`], the [`Source`]
//! impl) apply the flag afterwards by calling `destroy`, which is idempotent.
//! The frozen value is not a change, so the flag is applied on the next read
//! of any pipe in the chain.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::effect_pipe::EffectPipe;
use super::emit::Emit;
use super::source::Source;
use super::transform::{self, Transform};
use crate::error::Result;
use crate::options::PipeOptions;
use crate::reactive::{EffectHandle, Memo, Runtime, Signal};

/// State shared by every pipe derived from one root.
struct Chain {
    name: Option<String>,
    effects: Mutex<Vec<EffectHandle>>,
    teardown_requested: AtomicBool,
    destroyed: AtomicBool,
}

impl Chain {
    fn new(name: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            name,
            effects: Mutex::new(Vec::new()),
            teardown_requested: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    fn own(&self, effect: EffectHandle) {
        if self.destroyed.load(Ordering::SeqCst) {
            effect.stop();
            return;
        }
        self.effects.lock().push(effect);
    }

    fn request_teardown(&self) {
        self.teardown_requested.store(true, Ordering::SeqCst);
    }

    /// Apply a teardown raised by a computation since the last read.
    fn settle(&self) {
        if self.teardown_requested.swap(false, Ordering::SeqCst) {
            self.destroy();
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        let effects = std::mem::take(&mut *self.effects.lock());
        if !effects.is_empty() {
            debug!(
                chain = self.name.as_deref().unwrap_or("<anonymous>"),
                effects = effects.len(),
                "destroying pipe chain"
            );
        }
        for effect in effects {
            effect.stop();
        }
    }
}

/// A node's output and the version it was produced at.
#[derive(Debug, Clone)]
struct Stamped<T> {
    emit: Emit<T>,
    version: u64,
}

/// Memo for a pipe node. Outputs with the same version are the same output.
fn stage<U, F>(compute: F) -> Memo<Stamped<U>>
where
    U: Clone + Send + Sync + 'static,
    F: Fn() -> Stamped<U> + Send + Sync + 'static,
{
    Memo::with_equals(compute, |previous: &Stamped<U>, next: &Stamped<U>| {
        previous.version == next.version
    })
}

/// Stateful operator plus the last value it let through.
struct Cached<X, U> {
    transform: X,
    seen: u64,
    last: Emit<U>,
    version: u64,
}

impl<X, U: Clone> Cached<X, U> {
    fn new(transform: X) -> Self {
        Self {
            transform,
            seen: 0,
            last: Emit::Skipped,
            version: 0,
        }
    }

    fn feed<T>(&mut self, input: Stamped<T>) -> Stamped<U>
    where
        X: Transform<T, Out = U>,
    {
        if input.version != self.seen {
            self.seen = input.version;
            if let Emit::Value(value) = input.emit {
                if let Emit::Value(out) = self.transform.apply(value) {
                    self.last = Emit::Value(out);
                    self.version += 1;
                }
            }
        }
        self.held()
    }

    fn held(&self) -> Stamped<U> {
        Stamped {
            emit: self.last.clone(),
            version: self.version,
        }
    }
}

/// A readable derived value that operators can be chained onto.
///
/// ```rust
/// use sigpipe_core::{derived_pipe, reactive::Signal, Emit};
///
/// let count = Signal::new(1);
/// let evens = derived_pipe(count.clone()).filter(|n| n % 2 == 0);
///
/// assert_eq!(evens.get(), Emit::Skipped);
/// count.set(2);
/// assert_eq!(evens.get(), Emit::Value(2));
/// count.set(3);
/// assert_eq!(evens.get(), Emit::Value(2));
/// ```
pub struct DerivedPipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    node: Memo<Stamped<T>>,
    chain: Arc<Chain>,
    options: PipeOptions,
}

/// Start a derived pipeline from `source`.
pub fn derived_pipe<S: Source>(source: S) -> DerivedPipe<S::Value> {
    DerivedPipe::new(source)
}

impl<T> DerivedPipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Root pipe mirroring `source`.
    pub fn new<S>(source: S) -> Self
    where
        S: Source<Value = T>,
    {
        Self::with_options(source, PipeOptions::default())
    }

    pub fn with_options<S>(source: S, options: PipeOptions) -> Self
    where
        S: Source<Value = T>,
    {
        // Every recomputation of the root is a new arrival.
        let version = AtomicU64::new(0);
        Self {
            node: stage(move || Stamped {
                emit: source.read(),
                version: version.fetch_add(1, Ordering::Relaxed) + 1,
            }),
            chain: Chain::new(options.debug_name.clone()),
            options,
        }
    }

    fn extend<U>(&self, node: Memo<Stamped<U>>) -> DerivedPipe<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        DerivedPipe {
            node,
            chain: Arc::clone(&self.chain),
            options: self.options.clone(),
        }
    }

    fn cached<X>(&self, transform: X) -> DerivedPipe<X::Out>
    where
        X: Transform<T> + Send + 'static,
        X::Out: Clone + Send + Sync + 'static,
    {
        let upstream = self.node.clone();
        let state = Mutex::new(Cached::new(transform));
        self.extend(stage(move || {
            let input = upstream.get();
            state.lock().feed(input)
        }))
    }

    fn stamped(&self) -> Stamped<T> {
        let stamped = self.node.get();
        self.chain.settle();
        stamped
    }

    /// Current value, tracked when read inside a reactive context.
    pub fn get(&self) -> Emit<T> {
        self.stamped().emit
    }

    pub fn get_untracked(&self) -> Emit<T> {
        Runtime::untrack(|| self.get())
    }

    /// Keep values for which `predicate` holds.
    pub fn filter<P>(&self, predicate: P) -> DerivedPipe<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.cached(transform::filter(predicate))
    }

    /// Keep the `Some` results of `f`, unwrapped.
    pub fn filter_map<U, F>(&self, f: F) -> DerivedPipe<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        self.cached(transform::filter_map(f))
    }

    /// Apply `f` to values; a skipped upstream stays skipped.
    pub fn map<U, F>(&self, f: F) -> DerivedPipe<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.node.clone();
        self.extend(stage(move || {
            let Stamped { emit, version } = upstream.get();
            Stamped {
                emit: emit.map(&f),
                version,
            }
        }))
    }

    /// Apply `f` to values; a skipped upstream becomes `default`.
    pub fn map_or<U, F>(&self, default: U, f: F) -> DerivedPipe<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.node.clone();
        self.extend(stage(move || {
            let Stamped { emit, version } = upstream.get();
            let value = match emit {
                Emit::Value(value) => f(value),
                Emit::Skipped => default.clone(),
            };
            Stamped {
                emit: Emit::Value(value),
                version,
            }
        }))
    }

    /// Ignore the first `n` values. Fails if `n` is zero.
    pub fn skip(&self, n: usize) -> Result<DerivedPipe<T>> {
        Ok(self.cached(transform::skip(n)?))
    }

    /// Follow the first `n` values, then freeze on the last of them and tear
    /// the chain down. Fails if `n` is zero.
    pub fn take(&self, n: usize) -> Result<DerivedPipe<T>> {
        let upstream = self.node.clone();
        let chain = Arc::clone(&self.chain);
        let state = Mutex::new(Cached::new(transform::take(n)?));

        Ok(self.extend(stage(move || {
            {
                let state = state.lock();
                if state.transform.remaining() == 0 {
                    // Not reading upstream drops the dependency: frozen from here on.
                    chain.request_teardown();
                    return state.held();
                }
            }
            let input = upstream.get();
            state.lock().feed(input)
        })))
    }

    /// Pair each value with the previous one (`None` the first time).
    pub fn pair(&self) -> DerivedPipe<(T, Option<T>)> {
        self.cached(transform::pair::<T>())
    }

    /// Follow upstream only after it has been quiet for `delay`.
    ///
    /// The new pipe starts at the current upstream value. Its updates come
    /// from an effect owned by the chain; after [`destroy`](Self::destroy)
    /// it keeps its last value.
    pub fn debounce(&self, delay: Duration) -> DerivedPipe<T> {
        let cell = Signal::new(self.node.get_untracked());

        let writer = cell.clone();
        let effect = EffectPipe::with_options(Versions(self.clone()), self.options.child("debounce"))
            .debounce(delay)
            .run(move |(value, version), _| {
                if writer.get_untracked().version != version {
                    writer.set(Stamped {
                        emit: Emit::Value(value),
                        version,
                    });
                }
            });
        self.chain.own(effect);

        self.extend(stage(move || cell.get()))
    }

    /// Replace `Skipped` with `value`. Use as the last stage.
    pub fn default(&self, value: T) -> Fallback<T> {
        let upstream = self.node.clone();
        Fallback {
            node: Memo::new(move || upstream.get().emit.unwrap_or_else(|| value.clone())),
            chain: Arc::clone(&self.chain),
        }
    }

    /// Replace `Skipped` with `None`. Use as the last stage.
    pub fn or_none(&self) -> Fallback<Option<T>> {
        let upstream = self.node.clone();
        Fallback {
            node: Memo::new(move || upstream.get().emit.value()),
            chain: Arc::clone(&self.chain),
        }
    }

    /// Stop every debounce effect created anywhere in this chain.
    pub fn destroy(&self) {
        self.chain.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.chain.destroyed.load(Ordering::SeqCst)
    }

    /// Number of running effects owned by the chain.
    pub fn owned_effects(&self) -> usize {
        self.chain
            .effects
            .lock()
            .iter()
            .filter(|effect| !effect.is_stopped())
            .count()
    }

    pub fn debug_name(&self) -> Option<&str> {
        self.options.debug_name.as_deref()
    }
}

impl<T> Clone for DerivedPipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            chain: Arc::clone(&self.chain),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for DerivedPipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedPipe")
            .field("name", &self.options.debug_name)
            .field("node", &self.node)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<T> Source for DerivedPipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Emit<T> {
        self.get()
    }
}

/// Values of a pipe together with their versions, for debounce writers.
#[derive(Clone)]
struct Versions<T>(DerivedPipe<T>)
where
    T: Clone + Send + Sync + 'static;

impl<T> Source for Versions<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = (T, u64);

    fn read(&self) -> Emit<(T, u64)> {
        let Stamped { emit, version } = self.0.stamped();
        emit.map(|value| (value, version))
    }
}

/// End of a chain that never skips.
pub struct Fallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    node: Memo<T>,
    chain: Arc<Chain>,
}

impl<T> Fallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn get(&self) -> T {
        let value = self.node.get();
        self.chain.settle();
        value
    }

    pub fn get_untracked(&self) -> T {
        Runtime::untrack(|| self.get())
    }

    /// Stop every debounce effect created anywhere in this chain.
    pub fn destroy(&self) {
        self.chain.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.chain.destroyed.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Fallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<T> fmt::Debug for Fallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback")
            .field("node", &self.node)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<T> Source for Fallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Emit<T> {
        Emit::Value(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeError;

    fn reads<T>(source: &Signal<i32>, pipe: &DerivedPipe<T>, values: impl IntoIterator<Item = i32>) -> Vec<Emit<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        values
            .into_iter()
            .map(|v| {
                source.set(v);
                pipe.get()
            })
            .collect()
    }

    #[test]
    fn root_mirrors_source() {
        let source = Signal::new(1);
        let root = derived_pipe(source.clone());

        assert_eq!(root.get(), Emit::Value(1));
        source.set(7);
        assert_eq!(root.get(), Emit::Value(7));
    }

    #[test]
    fn filter_holds_last_accepted_value() {
        let source = Signal::new(1);
        let evens = derived_pipe(source.clone()).filter(|v| v % 2 == 0);

        assert_eq!(evens.get(), Emit::Skipped);
        assert_eq!(
            reads(&source, &evens, [3, 4, 5, 7, 8, 9]),
            vec![
                Emit::Skipped,
                Emit::Value(4),
                Emit::Value(4),
                Emit::Value(4),
                Emit::Value(8),
                Emit::Value(8),
            ]
        );
    }

    #[test]
    fn skip_twice() {
        let source = Signal::new(1);
        let pipe = derived_pipe(source.clone()).skip(2).unwrap().skip(2).unwrap();

        let mut outputs = vec![pipe.get()];
        outputs.extend(reads(&source, &pipe, [2, 3, 4, 5]));

        assert_eq!(
            outputs,
            vec![Emit::Skipped, Emit::Skipped, Emit::Skipped, Emit::Skipped, Emit::Value(5)]
        );
    }

    #[test]
    fn take_freezes_on_last_taken_value() {
        let source = Signal::new(1);
        let pipe = derived_pipe(source.clone()).take(2).unwrap();

        assert_eq!(pipe.get(), Emit::Value(1));
        assert_eq!(reads(&source, &pipe, [2, 3, 4]), vec![Emit::Value(2); 3]);
    }

    #[test]
    fn skip_then_take_versus_take_then_skip() {
        let source = Signal::new(1);
        let skip_take = derived_pipe(source.clone()).skip(1).unwrap().take(1).unwrap();
        let take_skip = derived_pipe(source.clone()).take(1).unwrap().skip(1).unwrap();

        let mut a = vec![skip_take.get()];
        let mut b = vec![take_skip.get()];
        for v in 2..=3 {
            source.set(v);
            a.push(skip_take.get());
            b.push(take_skip.get());
        }

        assert_eq!(a, vec![Emit::Skipped, Emit::Value(2), Emit::Value(2)]);
        assert_eq!(b, vec![Emit::Skipped; 3]);
    }

    #[test]
    fn held_value_is_not_a_new_arrival() {
        let source = Signal::new(2);
        let pipe = derived_pipe(source.clone())
            .filter(|v| v % 2 == 0)
            .skip(1)
            .unwrap();

        assert_eq!(pipe.get(), Emit::Skipped);
        // The filter holds 2; the skip stage must not consume it again.
        assert_eq!(reads(&source, &pipe, [3, 5, 4]), vec![Emit::Skipped, Emit::Skipped, Emit::Value(4)]);
    }

    #[test]
    fn map_propagates_skip_and_map_or_substitutes() {
        let source = Signal::new(1);
        let skipped = derived_pipe(source.clone()).skip(1).unwrap();
        let doubled = skipped.map(|v| v * 2);
        let labelled = skipped.map_or(String::from("none"), |v| v.to_string());

        assert_eq!(doubled.get(), Emit::Skipped);
        assert_eq!(labelled.get(), Emit::Value("none".to_string()));

        source.set(4);
        assert_eq!(doubled.get(), Emit::Value(8));
        assert_eq!(labelled.get(), Emit::Value("4".to_string()));
    }

    #[test]
    fn pair_tracks_previous() {
        let source = Signal::new(0);
        let pairs = derived_pipe(source.clone()).pair();

        let mut outputs = vec![pairs.get()];
        outputs.extend(reads(&source, &pairs, [1, 2]));

        assert_eq!(
            outputs,
            vec![
                Emit::Value((0, None)),
                Emit::Value((1, Some(0))),
                Emit::Value((2, Some(1))),
            ]
        );
    }

    #[test]
    fn default_and_or_none() {
        let source = Signal::new(1);
        let filtered = derived_pipe(source.clone()).filter(|v| *v > 10);
        let with_default = filtered.default(0);
        let optional = filtered.or_none();

        assert_eq!(with_default.get(), 0);
        assert_eq!(optional.get(), None);

        source.set(11);
        assert_eq!(with_default.get(), 11);
        assert_eq!(optional.get(), Some(11));
    }

    #[test]
    fn zero_counts_fail_at_construction() {
        let root = derived_pipe(Signal::new(0));
        assert_eq!(
            root.skip(0).unwrap_err(),
            PipeError::InvalidCount { operator: "skip", count: 0 }
        );
        assert!(root.take(0).is_err());
    }

    #[test]
    fn debounce_starts_at_upstream_value() {
        let source = Signal::new(3);
        let debounced = derived_pipe(source.clone()).debounce(Duration::from_millis(50));

        assert_eq!(debounced.get(), Emit::Value(3));

        source.set(4);
        Runtime::advance(Duration::from_millis(49));
        assert_eq!(debounced.get(), Emit::Value(3));

        Runtime::advance(Duration::from_millis(1));
        assert_eq!(debounced.get(), Emit::Value(4));
        debounced.destroy();
    }

    #[test]
    fn debounce_restarts_on_each_change() {
        let source = Signal::new(0);
        let debounced = derived_pipe(source.clone()).debounce(Duration::from_millis(100));
        Runtime::advance(Duration::from_millis(100));

        source.set(1);
        Runtime::advance(Duration::from_millis(80));
        source.set(2);
        Runtime::advance(Duration::from_millis(80));
        assert_eq!(debounced.get(), Emit::Value(0));

        Runtime::advance(Duration::from_millis(20));
        assert_eq!(debounced.get(), Emit::Value(2));
        debounced.destroy();
    }

    #[test]
    fn rejected_value_does_not_restart_debounce() {
        let source = Signal::new(0);
        let settled = derived_pipe(source.clone())
            .filter(|v| v % 2 == 0)
            .debounce(Duration::from_millis(100));

        source.set(2);
        Runtime::advance(Duration::from_millis(60));
        source.set(3);
        Runtime::advance(Duration::from_millis(60));

        assert_eq!(settled.get(), Emit::Value(2));
        settled.destroy();
    }

    #[test]
    fn held_value_leaves_the_node_clean() {
        let source = Signal::new(2);
        let evens = derived_pipe(source.clone()).filter(|v| v % 2 == 0);
        let labels = evens.map(|v| format!("#{v}"));
        assert_eq!(labels.get(), Emit::Value("#2".to_string()));

        source.set(3);
        assert_eq!(labels.get(), Emit::Value("#2".to_string()));
        assert_eq!(labels.node.computations(), 1);
        assert_eq!(evens.node.computations(), 2);
    }

    #[test]
    fn destroy_from_any_node_stops_every_debounce() {
        let source = Signal::new(0);
        let root = derived_pipe(source.clone());
        let first = root.debounce(Duration::from_millis(10));
        let second = first.map(|v| v + 1).debounce(Duration::from_millis(10));
        assert_eq!(root.owned_effects(), 2);

        root.destroy();
        assert!(second.is_destroyed());
        assert_eq!(second.owned_effects(), 0);

        source.set(5);
        Runtime::advance(Duration::from_secs(1));
        assert_eq!(first.get(), Emit::Value(0));
        assert_eq!(second.get(), Emit::Value(1));

        // Idempotent
        first.destroy();
    }

    #[test]
    fn exhausted_take_tears_down_the_chain() {
        let source = Signal::new(0);
        let taken = derived_pipe(source.clone()).take(2).unwrap();
        let debounced = taken.debounce(Duration::from_millis(10));
        assert_eq!(taken.owned_effects(), 1);

        source.set(1);
        Runtime::advance(Duration::from_millis(10));
        assert_eq!(debounced.get(), Emit::Value(1));
        assert!(!taken.is_destroyed());

        // The frozen value does not wake the debounce effect; the next read
        // applies the teardown.
        source.set(2);
        assert_eq!(taken.owned_effects(), 1);
        assert_eq!(taken.get(), Emit::Value(1));
        assert!(taken.is_destroyed());
        assert_eq!(taken.owned_effects(), 0);

        Runtime::advance(Duration::from_secs(1));
        assert_eq!(debounced.get(), Emit::Value(1));
        assert_eq!(taken.get(), Emit::Value(1));
        assert_eq!(Runtime::pending_timers(), 0);
    }

    #[test]
    fn tuple_root_combines_sources() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let sum = derived_pipe((a.clone(), b.clone())).map(|(a, b)| a + b);

        assert_eq!(sum.get(), Emit::Value(3));
        a.set(10);
        assert_eq!(sum.get(), Emit::Value(12));
    }
}
