//! The value-or-skipped type that flows between pipeline stages.

/// Output of one pipeline step: either a value, or the marker saying that no
/// new value was produced this round.
///
/// `Skipped` is a variant of its own rather than a reserved domain value, so
/// it can never be mistaken for a real `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Emit<T> {
    /// A value produced this round.
    Value(T),
    /// Nothing was produced this round.
    #[default]
    Skipped,
}

impl<T> Emit<T> {
    /// The skipped marker, spelled as a constant.
    pub const SKIPPED: Self = Emit::Skipped;

    pub fn is_value(&self) -> bool {
        matches!(self, Emit::Value(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Emit::Skipped)
    }

    /// Converts into an `Option`, mapping `Skipped` to `None`.
    pub fn value(self) -> Option<T> {
        match self {
            Emit::Value(value) => Some(value),
            Emit::Skipped => None,
        }
    }

    pub fn as_ref(&self) -> Emit<&T> {
        match self {
            Emit::Value(value) => Emit::Value(value),
            Emit::Skipped => Emit::Skipped,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Emit<U> {
        match self {
            Emit::Value(value) => Emit::Value(f(value)),
            Emit::Skipped => Emit::Skipped,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Emit::Value(value) => value,
            Emit::Skipped => default,
        }
    }

    pub fn unwrap_or_else(self, default: impl FnOnce() -> T) -> T {
        match self {
            Emit::Value(value) => value,
            Emit::Skipped => default(),
        }
    }

    /// Returns `self` if it holds a value, otherwise `other`.
    pub fn or(self, other: Emit<T>) -> Emit<T> {
        match self {
            Emit::Value(_) => self,
            Emit::Skipped => other,
        }
    }
}

impl<T> From<Option<T>> for Emit<T> {
    fn from(option: Option<T>) -> Self {
        match option {
            Some(value) => Emit::Value(value),
            None => Emit::Skipped,
        }
    }
}

impl<T> From<Emit<T>> for Option<T> {
    fn from(emit: Emit<T>) -> Self {
        emit.value()
    }
}
