//! Sigpipe Core
//!
//! Chainable operators over reactive signals. The crate implements:
//!
//! - A small reactive host (signals, memos, effects, scopes, virtual timers)
//! - Effect pipelines that turn a chain of operators into one effect
//! - Derived pipelines where every operator is a cached derived value
//!
//! # Architecture
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `pipe`: Operators (`filter`, `map`, `skip`, `take`, `pair`, `debounce`,
//!   `default`) and the two pipeline builders
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use sigpipe_core::reactive::{Runtime, Signal};
//! use sigpipe_core::{derived_pipe, effect_pipe, Emit};
//!
//! let query = Signal::new(String::new());
//!
//! // Log every non-empty query after the first.
//! let handle = effect_pipe(query.clone())
//!     .filter(|q| !q.is_empty())
//!     .skip(1)?
//!     .run(|q, _| println!("searching for {q}"));
//!
//! // Follow the query once typing pauses for 300ms.
//! let settled = derived_pipe(query.clone()).debounce(Duration::from_millis(300));
//!
//! query.set("rust".into());
//! Runtime::advance(Duration::from_millis(300));
//! assert_eq!(settled.get(), Emit::Value("rust".to_string()));
//!
//! handle.stop();
//! settled.destroy();
//! # Ok::<(), sigpipe_core::PipeError>(())
//! ```

pub mod pipe;
pub mod reactive;

mod error;
mod options;

pub use error::{PipeError, Result};
pub use options::PipeOptions;
pub use pipe::{derived_pipe, effect_pipe, DerivedPipe, EffectPipe, Emit, Fallback, RunContext, Source, Transform};
