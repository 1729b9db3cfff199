//! One-shot timeout scheduling for the event loop.
//!
//! Timeouts are best-effort: the event loop checks them once per pass, after
//! its read and write attempts, so a callback fires no earlier than its
//! deadline and no later than roughly one socket-timeout interval past it.
//! The table only stores and expires entries; invoking the drained callbacks
//! is the caller's job, which keeps the table unborrowed while callbacks run
//! and lets them schedule or cancel further timeouts.

use std::time::{Duration, Instant};

/// Handle identifying a scheduled timeout.
///
/// Ids are never reused within a table, so a stale handle cancels nothing
/// rather than cancelling a stranger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

/// Zero-argument callback fired when a timeout expires.
pub type TimerCallback = Box<dyn FnOnce()>;

struct Entry {
    id: TimeoutId,
    deadline: Instant,
    callback: TimerCallback,
}

/// Pending one-shot timeouts, ordered by registration.
#[derive(Default)]
pub struct TimeoutTable {
    next_id: u64,
    entries: Vec<Entry>,
}

impl TimeoutTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Schedule `callback` to fire once `delay` has elapsed from `now`.
    pub fn add(&mut self, now: Instant, delay: Duration, callback: TimerCallback) -> TimeoutId {
        let id = TimeoutId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            deadline: now + delay,
            callback,
        });
        id
    }

    /// Cancel a pending timeout. Unknown or already-fired ids are ignored.
    pub fn remove(&mut self, id: TimeoutId) {
        self.entries.retain(|entry| entry.id != id);
    }

    /// Drain every entry whose deadline is at or before `now`.
    ///
    /// Due-ness is judged against the single `now` snapshot, so a slow
    /// callback earlier in the batch cannot pull extra entries into it.
    /// Drained entries are gone before the caller invokes anything; a
    /// callback that re-registers gets a fresh entry for the next pass.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.deadline <= now {
                due.push(entry.callback);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        due
    }

    /// Number of pending timeouts.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no timeout is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let make = {
            let log = Rc::clone(&log);
            move |label: &'static str| -> TimerCallback {
                let log = Rc::clone(&log);
                Box::new(move || log.borrow_mut().push(label))
            }
        };
        (log, make)
    }

    #[test]
    fn entries_fire_only_once_their_deadline_passes() {
        let (log, cb) = recorder();
        let mut table = TimeoutTable::new();
        let start = Instant::now();
        table.add(start, Duration::from_millis(10), cb("early"));
        table.add(start, Duration::from_secs(60), cb("late"));

        for callback in table.pop_due(start + Duration::from_millis(20)) {
            callback();
        }
        assert_eq!(*log.borrow(), vec!["early"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn popped_entries_do_not_fire_twice() {
        let (log, cb) = recorder();
        let mut table = TimeoutTable::new();
        let start = Instant::now();
        table.add(start, Duration::ZERO, cb("once"));

        let when = start + Duration::from_millis(1);
        for callback in table.pop_due(when) {
            callback();
        }
        assert!(table.pop_due(when).is_empty());
        assert_eq!(*log.borrow(), vec!["once"]);
    }

    #[test]
    fn remove_is_idempotent_and_ignores_foreign_ids() {
        let (log, cb) = recorder();
        let mut table = TimeoutTable::new();
        let start = Instant::now();
        let id = table.add(start, Duration::ZERO, cb("cancelled"));
        let kept = table.add(start, Duration::ZERO, cb("kept"));

        table.remove(id);
        table.remove(id);
        assert_eq!(table.len(), 1);

        for callback in table.pop_due(start) {
            callback();
        }
        assert_eq!(*log.borrow(), vec!["kept"]);
        table.remove(kept);
    }

    #[test]
    fn ids_are_not_reused_after_expiry() {
        let (_log, cb) = recorder();
        let mut table = TimeoutTable::new();
        let start = Instant::now();
        let first = table.add(start, Duration::ZERO, cb("a"));
        table.pop_due(start);
        let second = table.add(start, Duration::ZERO, cb("b"));
        assert_ne!(first, second);
    }
}
