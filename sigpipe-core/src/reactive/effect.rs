//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the runtime queues the effect and runs it
//!    again once the write that caused the change has settled. A queued
//!    effect whose sources all turn out unchanged (a memo recomputed to an
//!    equal value) does not run.
//!
//! 3. Before re-running, the effect runs the cleanups registered by the
//!    previous run, then tracks a fresh set of dependencies.
//!
//! # Cleanup
//!
//! The function receives an [`EffectContext`]. Cleanups registered through
//! it run before the next run and when the effect is stopped. A cleanup
//! registered after the effect was stopped runs immediately, so a resource
//! acquired during the final run is never leaked.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::context::ReactiveContext;
use super::runtime::{Reactive, Runtime};
use super::scope::Scope;
use super::subscriber::SubscriberId;
use crate::options::PipeOptions;

type Cleanup = Box<dyn FnOnce() + Send>;

struct EffectInner {
    subscriber_id: SubscriberId,
    debug_name: Option<String>,
    run: Box<dyn Fn(&EffectContext) + Send + Sync>,
    cleanups: Mutex<Vec<Cleanup>>,
    queued: AtomicBool,
    stopped: AtomicBool,
    run_count: AtomicUsize,
    dependency_count: AtomicUsize,
}

/// A side-effecting computation that runs when dependencies change.
///
/// `Effect` is a cheap handle: clones refer to the same effect. The runtime
/// keeps the effect alive until [`Effect::stop`] is called, so dropping every
/// handle does not stop it.
///
/// # Example
///
/// ```rust
/// use sigpipe_core::reactive::{Effect, Signal};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
///
/// let count = Signal::new(0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let effect = Effect::new({
///     let (count, seen) = (count.clone(), seen.clone());
///     move |_| seen.store(count.get(), Ordering::SeqCst)
/// });
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// effect.stop();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

/// The handle returned by pipelines; the same type as [`Effect`].
pub type EffectHandle = Effect;

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&EffectContext) + Send + Sync + 'static,
    {
        Self::with_options(run, &PipeOptions::default())
    }

    /// Create a new effect owned by the scope named in `options`, or by the
    /// currently entered scope when none is given.
    pub fn with_options<F>(run: F, options: &PipeOptions) -> Self
    where
        F: Fn(&EffectContext) + Send + Sync + 'static,
    {
        let effect = Self {
            inner: Arc::new(EffectInner {
                subscriber_id: SubscriberId::new(),
                debug_name: options.debug_name.clone(),
                run: Box::new(run),
                cleanups: Mutex::new(Vec::new()),
                queued: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                dependency_count: AtomicUsize::new(0),
            }),
        };

        let scope = options.scope.clone().or_else(Scope::current);
        if let Some(scope) = scope {
            if !scope.adopt(&effect) {
                warn!(
                    effect = %effect.subscriber_id(),
                    name = effect.debug_name().unwrap_or("<anonymous>"),
                    "effect created in a disposed scope, it will never run"
                );
                effect.inner.stopped.store(true, Ordering::SeqCst);
                return effect;
            }
        }

        debug!(
            effect = %effect.subscriber_id(),
            name = effect.debug_name().unwrap_or("<anonymous>"),
            "effect created"
        );

        Runtime::retain(Arc::new(effect.clone()));
        effect.execute();
        effect
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// The diagnostic name given in the options, if any.
    pub fn debug_name(&self) -> Option<&str> {
        self.inner.debug_name.as_deref()
    }

    /// Execute the effect function.
    ///
    /// This runs the function within a reactive context to track dependencies.
    pub fn execute(&self) {
        self.inner.queued.store(false, Ordering::SeqCst);
        if self.is_stopped() {
            return;
        }

        self.run_cleanups();

        let ctx = ReactiveContext::enter(self.inner.subscriber_id);
        let context = EffectContext {
            effect: self.clone(),
        };
        (self.inner.run)(&context);
        let dependencies = ctx.finish();

        // An effect that stopped itself mid-run must not subscribe again.
        if !self.is_stopped() {
            self.inner
                .dependency_count
                .store(dependencies.len(), Ordering::Relaxed);
            Runtime::replace_dependencies(self.inner.subscriber_id, dependencies);
        }

        self.inner.run_count.fetch_add(1, Ordering::Relaxed);
        trace!(effect = %self.subscriber_id(), runs = self.run_count(), "effect ran");
    }

    /// Stop the effect.
    ///
    /// After stopping, the effect will not run again. Pending cleanups run
    /// now. Stopping twice is a no-op.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            effect = %self.subscriber_id(),
            name = self.debug_name().unwrap_or("<anonymous>"),
            runs = self.run_count(),
            "effect stopped"
        );

        Runtime::unregister(self.inner.subscriber_id);
        self.run_cleanups();
    }

    /// Check if the effect has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of sources read on the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count.load(Ordering::Relaxed)
    }

    fn run_cleanups(&self) {
        let pending = std::mem::take(&mut *self.inner.cleanups.lock());
        for cleanup in pending {
            cleanup();
        }
    }
}

impl Reactive for Effect {
    fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    fn mark_maybe_dirty(&self) -> bool {
        !self.is_stopped() && !self.inner.queued.swap(true, Ordering::SeqCst)
    }

    fn schedule(&self) {
        if self.is_stopped() {
            self.inner.queued.store(false, Ordering::SeqCst);
            return;
        }
        if Runtime::sources_changed(self.inner.subscriber_id) {
            self.execute();
        } else {
            self.inner.queued.store(false, Ordering::SeqCst);
            trace!(effect = %self.subscriber_id(), "sources unchanged");
        }
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.subscriber_id)
            .field("name", &self.inner.debug_name)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Per-run context handed to an effect function.
#[derive(Clone)]
pub struct EffectContext {
    effect: Effect,
}

impl EffectContext {
    /// Register `cleanup` to run before the next run or when the effect stops.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        if self.effect.is_stopped() {
            cleanup();
            return;
        }
        self.effect.inner.cleanups.lock().push(Box::new(cleanup));
    }

    /// The effect this run belongs to.
    pub fn handle(&self) -> &Effect {
        &self.effect
    }

    /// Stop the effect this run belongs to.
    pub fn stop(&self) {
        self.effect.stop();
    }
}
