//! Virtual timers.
//!
//! Timers live on the thread's runtime and are driven by an explicit clock:
//! nothing fires until `Runtime::advance` moves time forward. Timers due at
//! the same instant fire in the order they were scheduled.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Handle to a scheduled timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

pub(crate) type TimerCallback = Box<dyn FnOnce()>;

/// Pending timers ordered by due time, then by scheduling order.
#[derive(Default)]
pub(crate) struct TimerQueue {
    now: Duration,
    next_id: u64,
    entries: BTreeMap<(Duration, TimerId), TimerCallback>,
    due: HashMap<TimerId, Duration>,
}

impl TimerQueue {
    pub(crate) fn now(&self) -> Duration {
        self.now
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn schedule(&mut self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let due = self.now + delay;
        self.entries.insert((due, id), callback);
        self.due.insert(id, due);
        id
    }

    /// Remove a pending timer, handing back its callback so the caller
    /// decides where it is dropped. `None` if it already fired or was
    /// cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> Option<TimerCallback> {
        let due = self.due.remove(&id)?;
        self.entries.remove(&(due, id))
    }

    /// Remove the earliest timer due at or before `until`, moving the clock
    /// to its due time.
    pub(crate) fn pop_due(&mut self, until: Duration) -> Option<(TimerId, TimerCallback)> {
        let (&(due, id), _) = self.entries.first_key_value()?;
        if due > until {
            return None;
        }

        let callback = self.entries.remove(&(due, id))?;
        self.due.remove(&id);
        self.now = self.now.max(due);
        Some((id, callback))
    }

    pub(crate) fn settle_at(&mut self, until: Duration) {
        self.now = self.now.max(until);
    }
}
