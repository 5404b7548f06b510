//! Lifecycle scopes.
//!
//! A scope owns the effects created inside it and stops them all when it is
//! disposed, the way a component's teardown would. Effects pick up a scope
//! either from [`PipeOptions::scope`](crate::PipeOptions) or from the scope
//! currently entered on this thread.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::effect::Effect;

thread_local! {
    static CURRENT: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeInner {
    name: Option<String>,
    effects: Mutex<Vec<Effect>>,
    disposed: AtomicBool,
}

/// Owner of a group of effects.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(name: Option<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name,
                effects: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Run `f` with this scope as the current scope.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = ExitGuard;
        f()
    }

    /// The innermost scope entered on this thread.
    pub fn current() -> Option<Scope> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }

    /// Take ownership of `effect`. Returns `false` if the scope is disposed.
    pub(crate) fn adopt(&self, effect: &Effect) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut effects = self.inner.effects.lock();
        effects.retain(|owned| !owned.is_stopped());
        effects.push(effect.clone());
        true
    }

    /// Stop every effect owned by this scope. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let effects = std::mem::take(&mut *self.inner.effects.lock());
        debug!(
            scope = self.name().unwrap_or("<anonymous>"),
            effects = effects.len(),
            "disposing scope"
        );
        for effect in effects {
            effect.stop();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Number of owned effects that are still running.
    pub fn live_effects(&self) -> usize {
        self.inner
            .effects
            .lock()
            .iter()
            .filter(|effect| !effect.is_stopped())
            .count()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct ExitGuard;

impl Drop for ExitGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
