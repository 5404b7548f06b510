//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    read is recorded as a dependency of that context.
//!
//! 2. When a signal's value changes, the runtime marks every dependent
//!    dirty and runs the affected effects.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A unique source ID (8 bytes)
//! - The value, shared behind an `Arc<RwLock<T>>` by every clone

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::subscriber::SourceId;

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use sigpipe_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this signal.
    id: SourceId,

    /// The current value, protected by RwLock for thread safety.
    value: Arc<RwLock<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: SourceId::new(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        ReactiveContext::track_dependency(self.id);
        self.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Set a new value and notify subscribers.
    ///
    /// This will trigger re-execution of all dependent effects.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        Runtime::notify_source_change(self.id);
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.value.read());
        self.set(new_value);
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.id)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
