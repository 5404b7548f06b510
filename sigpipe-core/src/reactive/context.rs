//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (e.g., running a memo or effect), we push
//! the subscriber onto the stack. When the computation completes, we pop it
//! and hand the collected sources back to the caller.
//!
//! An *untracked* entry can be pushed on top of a tracked one. Reads made
//! while it is on top are not recorded anywhere, which is how
//! `Runtime::untrack` and `get_untracked` are built.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::subscriber::{SourceId, SubscriberId};

/// Sources read during one run of a computation.
pub type Dependencies = SmallVec<[SourceId; 4]>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The computation being tracked, `None` for an untracked section.
    subscriber_id: Option<SubscriberId>,
    /// Sources read so far, deduplicated, in first-read order.
    dependencies: Dependencies,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any source that is read will be
    /// recorded as a dependency of the subscriber.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter a section in which reads are not tracked.
    pub fn enter_untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: SmallVec::new(),
            });
        });

        Self {
            subscriber_id,
            finished: false,
        }
    }

    /// Run `f` with dependency tracking suspended.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _guard = Self::enter_untracked();
        f()
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Record a read of the given source.
    ///
    /// This is called by signals and memos when they are read.
    pub fn track_dependency(source: SourceId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.subscriber_id.is_some() && !entry.dependencies.contains(&source) {
                    entry.dependencies.push(source);
                }
            }
        });
    }

    /// Get the dependencies collected in the current context.
    pub fn get_dependencies() -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// Leave the context and return the sources read while it was active.
    pub fn finish(mut self) -> Dependencies {
        self.finished = true;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }

            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_subscriber() {
        let id = SubscriberId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn context_collects_unique_dependencies() {
        let ctx = ReactiveContext::enter(SubscriberId::new());
        let (a, b) = (SourceId::new(), SourceId::new());

        ReactiveContext::track_dependency(a);
        ReactiveContext::track_dependency(b);
        ReactiveContext::track_dependency(a);

        assert_eq!(ReactiveContext::get_dependencies().as_slice(), &[a, b]);
        assert_eq!(ctx.finish().as_slice(), &[a, b]);
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn untracked_section_hides_reads() {
        let ctx = ReactiveContext::enter(SubscriberId::new());
        let (a, b) = (SourceId::new(), SourceId::new());

        ReactiveContext::track_dependency(a);
        ReactiveContext::untracked(|| {
            assert!(!ReactiveContext::is_active());
            ReactiveContext::track_dependency(b);
        });

        assert!(ReactiveContext::is_active());
        assert_eq!(ctx.finish().as_slice(), &[a]);
    }

    #[test]
    fn nested_contexts() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();

        {
            let _ctx1 = ReactiveContext::enter(id1);
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2);
                assert_eq!(ReactiveContext::current_subscriber(), Some(id2));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }
}
