//! Metric capture for assertions.
//!
//! The driver records through whichever recorder is installed at call time.
//! [`capture_metrics`] installs a thread-local debugging recorder for the
//! duration of a closure, which suits the driver's single-threaded design:
//! everything it records inside the closure lands in the returned snapshot.

use metrics::with_local_recorder;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

pub use metrics_util::debugging::Snapshot;

/// Run `f` under a debugging recorder and return its metrics alongside the
/// closure's value.
pub fn capture_metrics<T>(f: impl FnOnce() -> T) -> (T, Snapshot) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let value = with_local_recorder(&recorder, f);
    (value, snapshotter.snapshot())
}

/// Sum of every counter named `name` in the snapshot, across label sets.
#[must_use]
pub fn counter_total(snapshot: Snapshot, name: &str) -> u64 {
    snapshot
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => count,
            _ => 0,
        })
        .sum()
}

/// Final value of the gauge named `name`, or zero when it never moved.
#[must_use]
pub fn gauge_value(snapshot: Snapshot, name: &str) -> f64 {
    snapshot
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Gauge(level) => level.into_inner(),
            _ => 0.0,
        })
        .sum()
}
