use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const UNSET_TS: u64 = 0;

/// Success/failure counter pair with the wall-clock time of the latest event of each kind.
#[derive(Debug)]
pub struct OutcomeCounter {
    success: AtomicU64,
    failure: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
}

impl OutcomeCounter {
    pub const fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(UNSET_TS),
            last_failure_ms: AtomicU64::new(UNSET_TS),
        }
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.last_success_ms
            .store(current_unix_ms(), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms
            .store(current_unix_ms(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OutcomeSnapshot {
        OutcomeSnapshot {
            successes: self.success.load(Ordering::Relaxed),
            failures: self.failure.load(Ordering::Relaxed),
            last_success_ms: non_zero(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: non_zero(self.last_failure_ms.load(Ordering::Relaxed)),
        }
    }
}

impl Default for OutcomeCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters shared by the engine, the queue manager and the realtime manager.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub push: OutcomeCounter,
    pub pull: OutcomeCounter,
    pub realtime_apply: OutcomeCounter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub push: OutcomeSnapshot,
    pub pull: OutcomeSnapshot,
    pub realtime_apply: OutcomeSnapshot,
}

impl SyncMetrics {
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            push: self.push.snapshot(),
            pull: self.pull.snapshot(),
            realtime_apply: self.realtime_apply.snapshot(),
        }
    }
}

#[inline]
fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(UNSET_TS)
}

#[inline]
fn non_zero(value: u64) -> Option<u64> {
    if value == UNSET_TS { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_outcomes_independently() {
        let metrics = SyncMetrics::default();
        metrics.push.record_success();
        metrics.push.record_success();
        metrics.push.record_failure();
        metrics.realtime_apply.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.push.successes, 2);
        assert_eq!(snapshot.push.failures, 1);
        assert!(snapshot.push.last_success_ms.is_some());
        assert_eq!(snapshot.pull, OutcomeSnapshot::default());
        assert_eq!(snapshot.realtime_apply.failures, 1);
        assert!(snapshot.realtime_apply.last_success_ms.is_none());
    }
}
