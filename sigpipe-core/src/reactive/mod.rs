//! Reactive Primitives
//!
//! This module implements the reactive host the pipelines are built on:
//! signals, memos, effects, lifecycle scopes and virtual timers.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the read is recorded
//! as a dependency. When the signal's value changes, all dependents are
//! notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changed and someone reads it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Each run may register cleanups that run before the
//! next run or when the effect stops.
//!
//! ## Scopes and timers
//!
//! A Scope stops the effects it owns when disposed. Timers run on a virtual
//! clock owned by the [`Runtime`] and fire only when time is advanced.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, record the dependency.

mod context;
mod effect;
mod memo;
mod runtime;
mod scope;
mod signal;
mod subscriber;
mod timer;

pub use context::{Dependencies, ReactiveContext};
pub use effect::{Effect, EffectContext, EffectHandle};
pub use memo::{Memo, MemoState};
pub use runtime::{Reactive, ReactiveHandle, Runtime};
pub use scope::Scope;
pub use signal::Signal;
pub use subscriber::{SourceId, SubscriberId};
pub use timer::TimerId;
