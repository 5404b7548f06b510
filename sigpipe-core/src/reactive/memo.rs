//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the runtime marks the memo "maybe dirty" and
//!    carries the mark on to everything that reads the memo.
//!
//! 4. On next access, the memo checks the versions of what it read last
//!    time. If one moved it recomputes exactly once, otherwise it is clean
//!    again without recomputing.
//!
//! 5. A recomputed value only counts as a change for readers when it differs
//!    from the previous one. By default every recomputation is a change;
//!    [`Memo::with_equals`] supplies the comparison.
//!
//! Memos that are never read stay dirty, so a burst of writes with no read in
//! between costs a single recomputation. Stateful computations (counters,
//! previous-value caches) rely on that: one read after one change means one
//! call of the computation.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use super::runtime::{Reactive, ReactiveHandle, Runtime};
use super::subscriber::{SourceId, SubscriberId};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct MemoInner<T> {
    source_id: SourceId,
    subscriber_id: SubscriberId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    equals: Option<EqualsFn<T>>,
    value: RwLock<Option<T>>,
    state: Mutex<MemoState>,
    computations: AtomicUsize,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Current value without tracking, recomputing only if a source moved.
    fn current(&self) -> T {
        if self.is_fresh() {
            if let Some(value) = self.value.read().as_ref() {
                return value.clone();
            }
        }
        self.recompute()
    }

    fn is_fresh(&self) -> bool {
        let state = *self.state.lock();
        match state {
            MemoState::Clean => true,
            MemoState::Dirty => false,
            MemoState::MaybeDirty => {
                if self.value.read().is_none() || Runtime::sources_changed(self.subscriber_id) {
                    return false;
                }
                let mut state = self.state.lock();
                if *state == MemoState::MaybeDirty {
                    *state = MemoState::Clean;
                }
                true
            }
        }
    }

    /// Run the computation within a reactive context to track dependencies.
    /// No lock is held while the computation runs.
    fn recompute(&self) -> T {
        let ctx = ReactiveContext::enter(self.subscriber_id);
        let new_value = (self.compute)();
        let dependencies = ctx.finish();

        let previous = self.value.write().replace(new_value.clone());
        let changed = match (&self.equals, &previous) {
            (Some(equals), Some(previous)) => !equals(previous, &new_value),
            _ => true,
        };
        *self.state.lock() = MemoState::Clean;
        self.computations.fetch_add(1, Ordering::Relaxed);

        if changed {
            Runtime::bump_version(self.source_id);
        }
        // After the bump, so readers that recorded it are not dirtied again.
        Runtime::replace_dependencies(self.subscriber_id, dependencies);
        drop(previous);

        new_value
    }
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn source_id(&self) -> Option<SourceId> {
        Some(self.source_id)
    }

    fn mark_maybe_dirty(&self) -> bool {
        let mut state = self.state.lock();
        if *state == MemoState::Clean {
            *state = MemoState::MaybeDirty;
            true
        } else {
            false
        }
    }

    fn schedule(&self) {}

    fn refresh(&self) {
        self.current();
    }

    fn is_eager(&self) -> bool {
        false
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Clones share the cache. The memo leaves the runtime when its last clone
/// is dropped.
///
/// ```rust
/// use sigpipe_core::reactive::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Memo::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
    _registration: Arc<ReactiveHandle>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Box::new(compute), None)
    }

    /// Create a memo whose recomputations only reach readers when `equals`
    /// says the new value differs from the previous one.
    pub fn with_equals<F, E>(compute: F, equals: E) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let equals: EqualsFn<T> = Box::new(equals);
        Self::build(Box::new(compute), Some(equals))
    }

    fn build(compute: Box<dyn Fn() -> T + Send + Sync>, equals: Option<EqualsFn<T>>) -> Self {
        let inner = Arc::new(MemoInner {
            source_id: SourceId::new(),
            subscriber_id: SubscriberId::new(),
            compute,
            equals,
            value: RwLock::new(None),
            state: Mutex::new(MemoState::Dirty),
            computations: AtomicUsize::new(0),
        });

        let reactive: Arc<dyn Reactive> = inner.clone();
        let registration = Arc::new(Runtime::register(&reactive));

        Self {
            inner,
            _registration: registration,
        }
    }

    /// Get the memo's source ID.
    pub fn id(&self) -> SourceId {
        self.inner.source_id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        ReactiveContext::track_dependency(self.inner.source_id);
        self.inner.current()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        ReactiveContext::untracked(|| self.get())
    }

    /// Mark the memo as potentially needing recomputation.
    pub fn mark_maybe_dirty(&self) {
        self.inner.mark_maybe_dirty();
    }

    /// Force a recomputation on next access and notify dependents.
    pub fn mark_dirty(&self) {
        *self.inner.state.lock() = MemoState::Dirty;
        Runtime::invalidate(self.inner.source_id);
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.lock()
    }

    /// Get the number of subscribers that read this memo on their last run.
    pub fn dependent_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.source_id)
    }

    /// Number of times the computation has run.
    pub fn computations(&self) -> usize {
        self.inner.computations.load(Ordering::Relaxed)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _registration: Arc::clone(&self._registration),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.source_id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!memo.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let memo = Memo::new(|| 42);

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.computations(), 1);
    }

    #[test]
    fn memo_recomputes_after_signal_change() {
        let signal = Signal::new(10);
        let memo = Memo::new({
            let signal = signal.clone();
            move || signal.get() * 2
        });

        assert_eq!(memo.get(), 20);
        assert_eq!(memo.state(), MemoState::Clean);

        signal.set(5);
        assert_eq!(memo.state(), MemoState::MaybeDirty);
        assert_eq!(memo.get(), 10);
        assert_eq!(memo.computations(), 2);
    }

    #[test]
    fn burst_of_writes_costs_one_recompute() {
        let signal = Signal::new(0);
        let memo = Memo::new({
            let signal = signal.clone();
            move || signal.get()
        });
        memo.get();

        signal.set(1);
        signal.set(2);
        signal.set(3);

        assert_eq!(memo.get(), 3);
        assert_eq!(memo.computations(), 2);
    }

    #[test]
    fn memo_depends_on_memo() {
        let base = Signal::new(5);
        let doubled = Memo::new({
            let base = base.clone();
            move || base.get() * 2
        });
        let plus_ten = Memo::new({
            let doubled = doubled.clone();
            move || doubled.get() + 10
        });

        assert_eq!(plus_ten.get(), 20);
        assert_eq!(doubled.dependent_count(), 1);

        base.set(10);
        assert_eq!(plus_ten.state(), MemoState::MaybeDirty);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn equal_result_does_not_reach_readers() {
        let signal = Signal::new(3);
        let parity = Memo::with_equals(
            {
                let signal = signal.clone();
                move || signal.get() % 2
            },
            |a, b| a == b,
        );
        let label = Memo::new({
            let parity = parity.clone();
            move || format!("parity {}", parity.get())
        });

        assert_eq!(label.get(), "parity 1");

        signal.set(5);
        assert_eq!(label.state(), MemoState::MaybeDirty);
        assert_eq!(label.get(), "parity 1");
        assert_eq!(parity.computations(), 2);
        assert_eq!(label.computations(), 1);
        assert_eq!(label.state(), MemoState::Clean);

        signal.set(6);
        assert_eq!(label.get(), "parity 0");
        assert_eq!(label.computations(), 2);
    }

    #[test]
    fn plain_memo_always_reaches_readers() {
        let signal = Signal::new(3);
        let parity = Memo::new({
            let signal = signal.clone();
            move || signal.get() % 2
        });
        let label = Memo::new({
            let parity = parity.clone();
            move || parity.get() * 10
        });

        assert_eq!(label.get(), 10);
        signal.set(5);
        assert_eq!(label.get(), 10);
        assert_eq!(label.computations(), 2);
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let memo = Memo::new(|| 1);
        let ctx = ReactiveContext::enter(SubscriberId::new());
        memo.get_untracked();
        assert!(ctx.finish().is_empty());
    }

    #[test]
    fn memo_state_transitions() {
        let memo = Memo::new(|| 42);

        // Starts dirty
        assert_eq!(memo.state(), MemoState::Dirty);

        // After get, becomes clean
        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);

        // Mark maybe dirty
        memo.mark_maybe_dirty();
        assert_eq!(memo.state(), MemoState::MaybeDirty);

        // Mark dirty overrides maybe dirty
        memo.mark_dirty();
        assert_eq!(memo.state(), MemoState::Dirty);

        // After get, becomes clean again
        memo.get();
        assert_eq!(memo.state(), MemoState::Clean);
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        assert_eq!(memo1.get(), 42);

        let memo2 = memo1.clone();
        assert_eq!(memo1.id(), memo2.id());
        assert!(memo2.has_value());

        memo1.mark_dirty();
        assert_eq!(memo2.state(), MemoState::Dirty);
    }
}
