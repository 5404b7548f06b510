//! Primitive value transforms.
//!
//! Each transform maps one input to a value or [`Emit::Skipped`], keeping
//! whatever state it needs between calls. Both pipeline builders create a
//! fresh transform per stage, so no state is ever shared between chains.

use std::sync::Arc;

use super::emit::Emit;
use crate::error::{positive_count, Result};

/// A stateful step from `In` to `Emit<Self::Out>`.
pub trait Transform<In> {
    type Out;

    fn apply(&mut self, input: In) -> Emit<Self::Out>;
}

/// Drops the first `n` inputs.
#[derive(Debug, Clone)]
pub struct Skip {
    remaining: usize,
}

/// Passes the first `n` inputs, then drops everything.
#[derive(Debug, Clone)]
pub struct Take {
    remaining: usize,
}

/// Passes inputs for which the predicate holds.
pub struct Filter<P> {
    predicate: Arc<P>,
}

/// Passes `Some` results of `f`, unwrapped.
pub struct FilterMap<F> {
    f: Arc<F>,
}

/// Pairs each input with the one before it.
#[derive(Debug, Clone)]
pub struct Pair<T> {
    previous: Option<T>,
}

/// Build a [`Skip`]. Fails if `n` is zero.
pub fn skip(n: usize) -> Result<Skip> {
    Ok(Skip {
        remaining: positive_count("skip", n)?,
    })
}

/// Build a [`Take`]. Fails if `n` is zero.
pub fn take(n: usize) -> Result<Take> {
    Ok(Take {
        remaining: positive_count("take", n)?,
    })
}

pub fn filter<P>(predicate: P) -> Filter<P> {
    Filter {
        predicate: Arc::new(predicate),
    }
}

pub fn filter_map<F>(f: F) -> FilterMap<F> {
    FilterMap { f: Arc::new(f) }
}

pub fn pair<T>() -> Pair<T> {
    Pair { previous: None }
}

impl<T> Transform<T> for Skip {
    type Out = T;

    fn apply(&mut self, input: T) -> Emit<T> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Emit::Skipped
        } else {
            Emit::Value(input)
        }
    }
}

impl Take {
    /// How many more inputs will pass. Zero once the budget is spent.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<T> Transform<T> for Take {
    type Out = T;

    fn apply(&mut self, input: T) -> Emit<T> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Emit::Value(input)
        } else {
            Emit::Skipped
        }
    }
}

impl<T, P> Transform<T> for Filter<P>
where
    P: Fn(&T) -> bool,
{
    type Out = T;

    fn apply(&mut self, input: T) -> Emit<T> {
        if (self.predicate)(&input) {
            Emit::Value(input)
        } else {
            Emit::Skipped
        }
    }
}

impl<T, U, F> Transform<T> for FilterMap<F>
where
    F: Fn(T) -> Option<U>,
{
    type Out = U;

    fn apply(&mut self, input: T) -> Emit<U> {
        (self.f)(input).into()
    }
}

impl<T: Clone> Transform<T> for Pair<T> {
    type Out = (T, Option<T>);

    fn apply(&mut self, input: T) -> Emit<(T, Option<T>)> {
        let previous = self.previous.replace(input.clone());
        Emit::Value((input, previous))
    }
}

impl<P> Clone for Filter<P> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<F> Clone for FilterMap<F> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}
