//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It manages the dependency graph and schedules updates when
//! signals change.
//!
//! # How It Works
//!
//! 1. When a memo or effect is created, it registers with the runtime.
//!
//! 2. When a memo or effect finishes running, the runtime records the
//!    sources it read, replacing whatever it read the previous time.
//!
//! 3. When a source changes, the runtime:
//!    a. Bumps the source's version
//!    b. Finds all dependent memos/effects
//!    c. Marks them as "maybe dirty", walking through memos transitively
//!    d. Queues effects for execution
//!    e. Memos are lazy - they recompute on next access
//!
//! 4. Queued effects run synchronously, in subscription order, once no
//!    batch is open and no other flush is in progress.
//!
//! # Change cut-off
//!
//! Every subscriber remembers the version of each source it read. A "maybe
//! dirty" memo or effect first brings its memo sources up to date and
//! compares versions; if none moved it is clean again without running. A
//! memo only bumps its own version when its recomputed value differs from
//! the previous one, so an unchanged result stops the update there.
//!
//! # Threading
//!
//! Each thread owns an independent runtime. Handles to signals and memos are
//! `Send + Sync`, but dependency tracking, effect scheduling and timers all
//! belong to the thread that drives them.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexSet;
use tracing::trace;

use smallvec::SmallVec;

use super::context::{Dependencies, ReactiveContext};
use super::subscriber::{SourceId, SubscriberId};
use super::timer::{TimerId, TimerQueue};

/// A trait for types that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// The source ID under which this value is itself read, if any.
    ///
    /// Memos return their own source ID so dirtiness flows through them.
    fn source_id(&self) -> Option<SourceId> {
        None
    }

    /// Mark this reactive value as potentially needing update.
    ///
    /// Returns `true` only on the transition out of the clean state, which
    /// is what lets the runtime stop walking at already-dirty nodes.
    fn mark_maybe_dirty(&self) -> bool;

    /// Run this reactive value (effects only).
    fn schedule(&self);

    /// Bring a lazy value up to date (memos only).
    fn refresh(&self) {}

    /// Check if this reactive value is an effect (eager) or memo (lazy).
    fn is_eager(&self) -> bool;
}

/// Handle to a registered reactive value.
///
/// Dropping this handle unregisters the reactive value from the runtime.
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

enum Registration {
    /// Memos: owned by their handles, the runtime only observes them.
    Observed(Weak<dyn Reactive>),
    /// Effects: kept alive by the runtime until stopped.
    Retained(Arc<dyn Reactive>),
}

impl Registration {
    fn upgrade(&self) -> Option<Arc<dyn Reactive>> {
        match self {
            Registration::Observed(weak) => weak.upgrade(),
            Registration::Retained(strong) => Some(Arc::clone(strong)),
        }
    }
}

/// Sources read by a subscriber, with the version each had at the time.
type Snapshot = SmallVec<[(SourceId, u64); 4]>;

#[derive(Default)]
struct RuntimeState {
    registry: HashMap<SubscriberId, Registration>,
    /// Memo source -> the memo's subscriber ID.
    owners: HashMap<SourceId, SubscriberId>,
    /// Source -> subscribers, in subscription order.
    subscribers: HashMap<SourceId, IndexSet<SubscriberId>>,
    /// Subscriber -> sources read on its last run.
    sources: HashMap<SubscriberId, Snapshot>,
    /// Source -> number of changes seen while it had subscribers.
    versions: HashMap<SourceId, u64>,
    queue: VecDeque<Arc<dyn Reactive>>,
    flushing: bool,
    batch_depth: usize,
    timers: TimerQueue,
}

impl RuntimeState {
    fn detach(&mut self, subscriber_id: SubscriberId) {
        if let Some(old) = self.sources.remove(&subscriber_id) {
            for (source, _) in old {
                if let Some(subs) = self.subscribers.get_mut(&source) {
                    subs.shift_remove(&subscriber_id);
                    if subs.is_empty() {
                        // No snapshot refers to this version any more.
                        self.subscribers.remove(&source);
                        self.versions.remove(&source);
                    }
                }
            }
        }
    }

    fn version(&self, source: SourceId) -> u64 {
        self.versions.get(&source).copied().unwrap_or(0)
    }

    fn owner(&self, source: SourceId) -> Option<Arc<dyn Reactive>> {
        let id = self.owners.get(&source)?;
        self.registry.get(id)?.upgrade()
    }
}

thread_local! {
    static STATE: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

/// Borrow the runtime state. Never call user code from inside `f`.
fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Register a lazily evaluated reactive value (a memo).
    ///
    /// Returns a handle that unregisters the value when dropped.
    pub fn register(reactive: &Arc<dyn Reactive>) -> ReactiveHandle {
        let id = reactive.subscriber_id();
        let source = reactive.source_id();
        with_state(|state| {
            state
                .registry
                .insert(id, Registration::Observed(Arc::downgrade(reactive)));
            if let Some(source) = source {
                state.owners.insert(source, id);
            }
        });
        ReactiveHandle { subscriber_id: id }
    }

    /// Register an eager reactive value (an effect).
    ///
    /// The runtime keeps it alive until [`Runtime::unregister`] is called.
    pub fn retain(reactive: Arc<dyn Reactive>) {
        let id = reactive.subscriber_id();
        with_state(|state| {
            state.registry.insert(id, Registration::Retained(reactive));
        });
    }

    /// Unregister a reactive value and drop all of its dependency edges.
    pub fn unregister(id: SubscriberId) {
        // The runtime may already be gone during thread teardown.
        let removed = STATE.try_with(|state| {
            let mut state = state.try_borrow_mut().ok()?;
            state.detach(id);
            let RuntimeState { owners, versions, .. } = &mut *state;
            owners.retain(|source, owner| {
                let keep = *owner != id;
                if !keep {
                    versions.remove(source);
                }
                keep
            });
            state.registry.remove(&id)
        });
        // Dropping an effect can drop the memos it captured, which unregister
        // in turn, so this must happen after the borrow ends.
        drop(removed);
    }

    /// Record that a subscriber depends on a source.
    pub fn add_dependency(source: SourceId, subscriber_id: SubscriberId) {
        with_state(|state| {
            state
                .subscribers
                .entry(source)
                .or_default()
                .insert(subscriber_id);
            let version = state.version(source);
            let sources = state.sources.entry(subscriber_id).or_default();
            if !sources.iter().any(|(known, _)| *known == source) {
                sources.push((source, version));
            }
        });
    }

    /// Replace a subscriber's dependencies with the sources it just read.
    pub fn replace_dependencies(subscriber_id: SubscriberId, dependencies: Dependencies) {
        with_state(|state| {
            state.detach(subscriber_id);
            let mut snapshot = Snapshot::with_capacity(dependencies.len());
            for source in dependencies {
                state
                    .subscribers
                    .entry(source)
                    .or_default()
                    .insert(subscriber_id);
                snapshot.push((source, state.version(source)));
            }
            state.sources.insert(subscriber_id, snapshot);
        });
    }

    /// Remove all dependencies for a subscriber.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        with_state(|state| state.detach(subscriber_id));
    }

    /// Number of live subscribers currently depending on `source`.
    pub fn subscriber_count(source: SourceId) -> usize {
        with_state(|state| state.subscribers.get(&source).map_or(0, IndexSet::len))
    }

    /// Notify all subscribers that a source changed.
    ///
    /// This is the core update propagation mechanism.
    pub fn notify_source_change(source: SourceId) {
        Self::bump_version(source);
        Self::invalidate(source);
    }

    /// Record that `source` now holds a different value, without marking
    /// anything dirty.
    pub fn bump_version(source: SourceId) {
        with_state(|state| *state.versions.entry(source).or_default() += 1);
    }

    /// Current version of `source`.
    pub fn source_version(source: SourceId) -> u64 {
        with_state(|state| state.version(source))
    }

    /// Whether any source read by `subscriber_id` on its last run changed
    /// since. Memo sources are brought up to date first, in read order, and
    /// the check stops at the first change.
    ///
    /// A subscriber that never ran counts as changed.
    pub fn sources_changed(subscriber_id: SubscriberId) -> bool {
        let Some(snapshot) = with_state(|state| state.sources.get(&subscriber_id).cloned()) else {
            return true;
        };

        for (source, seen) in snapshot {
            if let Some(owner) = with_state(|state| state.owner(source)) {
                owner.refresh();
            }
            if with_state(|state| state.version(source)) != seen {
                return true;
            }
        }
        false
    }

    /// Mark everything downstream of `source` maybe dirty and run the
    /// effects that reach.
    pub fn invalidate(source: SourceId) {
        let mut pending = VecDeque::from([source]);

        while let Some(changed) = pending.pop_front() {
            let dependents: Vec<Arc<dyn Reactive>> = with_state(|state| {
                let Some(ids) = state.subscribers.get(&changed) else {
                    return Vec::new();
                };
                ids.iter()
                    .filter_map(|id| state.registry.get(id))
                    .filter_map(Registration::upgrade)
                    .collect()
            });

            for reactive in dependents {
                if !reactive.mark_maybe_dirty() {
                    continue;
                }

                if reactive.is_eager() {
                    trace!(subscriber = %reactive.subscriber_id(), "queueing effect");
                    with_state(|state| state.queue.push_back(reactive));
                } else if let Some(next) = reactive.source_id() {
                    pending.push_back(next);
                }
            }
        }

        Self::flush();
    }

    /// Run queued effects unless a batch is open or a flush is in progress.
    pub fn flush() {
        let start = with_state(|state| {
            if state.flushing || state.batch_depth > 0 {
                false
            } else {
                state.flushing = true;
                true
            }
        });
        if !start {
            return;
        }

        let _guard = FlushGuard;
        while let Some(effect) = with_state(|state| state.queue.pop_front()) {
            effect.schedule();
        }
    }

    /// Apply several writes and run the affected effects once afterwards.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        with_state(|state| state.batch_depth += 1);
        let result = {
            let _guard = BatchGuard;
            f()
        };
        Self::flush();
        result
    }

    /// Run `f` without recording any reads as dependencies.
    pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
        ReactiveContext::untracked(f)
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Schedule `callback` to run once `delay` of virtual time has passed.
    pub fn set_timeout(delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let id = with_state(|state| state.timers.schedule(delay, Box::new(callback)));
        trace!(timer = %id, ?delay, "timer scheduled");
        id
    }

    /// Cancel a pending timer. Returns `false` if it already fired.
    pub fn clear_timeout(id: TimerId) -> bool {
        // The callback may own reactive handles; drop it outside the borrow.
        let cancelled = with_state(|state| state.timers.cancel(id)).is_some();
        if cancelled {
            trace!(timer = %id, "timer cancelled");
        }
        cancelled
    }

    /// Move virtual time forward, firing every timer that falls due.
    ///
    /// Timers scheduled by a firing callback also fire if they fall due
    /// within the same window.
    pub fn advance(by: Duration) {
        let until = with_state(|state| state.timers.now() + by);
        while let Some((id, callback)) = with_state(|state| state.timers.pop_due(until)) {
            trace!(timer = %id, "timer fired");
            callback();
        }
        with_state(|state| state.timers.settle_at(until));
    }

    /// Current virtual time.
    pub fn now() -> Duration {
        with_state(|state| state.timers.now())
    }

    /// Number of timers that have not fired or been cancelled.
    pub fn pending_timers() -> usize {
        with_state(|state| state.timers.len())
    }
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        with_state(|state| state.flushing = false);
    }
}

struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        with_state(|state| state.batch_depth -= 1);
    }
}
