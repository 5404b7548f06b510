//! Pipeline Operators
//!
//! Chainable operators over reactive sources, in two flavours:
//!
//! - [`EffectPipe`]: stages wrap one another and `run` registers the whole
//!   chain as a single effect. Each call to `run` gets its own stage state.
//! - [`DerivedPipe`]: every stage is a memo reading the previous one, with a
//!   last-value cache so a skip never erases a computed value.
//!
//! Both use [`Emit`] between stages: a value, or `Skipped` when a stage
//! produced nothing this round.

mod derived_pipe;
mod effect_pipe;
mod emit;
mod source;
mod transform;

pub use derived_pipe::{derived_pipe, DerivedPipe, Fallback};
pub use effect_pipe::{effect_pipe, EffectPipe, RunContext};
pub use emit::Emit;
pub use source::Source;
pub use transform::{filter, filter_map, pair, skip, take, Filter, FilterMap, Pair, Skip, Take, Transform};
