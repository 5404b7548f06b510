//! Anything a pipeline can start from.

use super::emit::Emit;
use crate::reactive::{Memo, Runtime, Signal};

/// A readable reactive value that can feed a pipeline.
///
/// Tuples of up to four sources are sources themselves: they read their
/// members in order within the same tracked pass and produce a tuple, or
/// `Skipped` if any member skipped.
pub trait Source: Clone + Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Read the current value, tracking it inside a reactive context.
    fn read(&self) -> Emit<Self::Value>;

    fn read_untracked(&self) -> Emit<Self::Value> {
        Runtime::untrack(|| self.read())
    }
}

impl<T> Source for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Emit<T> {
        Emit::Value(self.get())
    }
}

impl<T> Source for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Emit<T> {
        Emit::Value(self.get())
    }
}

macro_rules! tuple_source {
    ($($name:ident $var:ident $idx:tt),+) => {
        impl<$($name: Source),+> Source for ($($name,)+) {
            type Value = ($($name::Value,)+);

            fn read(&self) -> Emit<Self::Value> {
                // Every member is read before deciding, so all of them stay tracked.
                let reads = ($(self.$idx.read(),)+);
                match reads {
                    ($(Emit::Value($var),)+) => Emit::Value(($($var,)+)),
                    _ => Emit::Skipped,
                }
            }
        }
    };
}

tuple_source!(A a 0, B b 1);
tuple_source!(A a 0, B b 1, C c 2);
tuple_source!(A a 0, B b 1, C c 2, D d 3);
