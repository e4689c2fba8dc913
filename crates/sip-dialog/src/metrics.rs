use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sip_observe::{ArmedTimer, SessionTimerObserver};

/// Session timer counters. Injected like any other observer, so a fan-out
/// of this and a tracing observer gives both logs and numbers.
#[derive(Debug, Clone, Default)]
pub struct SessionTimerMetrics {
    inner: Arc<RwLock<MetricsData>>,
}

#[derive(Debug, Default)]
struct MetricsData {
    negotiated: u64,
    rejected: u64,
    armed_refresh: u64,
    armed_expiry: u64,
    refreshes_sent: u64,
    refreshed: u64,
    expired: u64,
    torn_down: u64,
    last_updated: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTimerMetricsSnapshot {
    pub negotiated: u64,
    pub rejected: u64,
    pub armed_refresh: u64,
    pub armed_expiry: u64,
    pub refreshes_sent: u64,
    pub refreshed: u64,
    pub expired: u64,
    pub torn_down: u64,
    pub last_updated: Option<Instant>,
}

impl SessionTimerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, update: impl FnOnce(&mut MetricsData)) {
        let mut data = self.inner.write();
        update(&mut data);
        data.last_updated = Some(Instant::now());
    }

    pub fn snapshot(&self) -> SessionTimerMetricsSnapshot {
        let data = self.inner.read();
        SessionTimerMetricsSnapshot {
            negotiated: data.negotiated,
            rejected: data.rejected,
            armed_refresh: data.armed_refresh,
            armed_expiry: data.armed_expiry,
            refreshes_sent: data.refreshes_sent,
            refreshed: data.refreshed,
            expired: data.expired,
            torn_down: data.torn_down,
            last_updated: data.last_updated,
        }
    }
}

impl SessionTimerObserver for SessionTimerMetrics {
    fn on_negotiated(&self, _dialog: &str, _interval_secs: u32, _local_refresher: bool) {
        self.record(|data| data.negotiated += 1);
    }

    fn on_rejected(&self, _dialog: &str, _status: u16, _reason: &str) {
        self.record(|data| data.rejected += 1);
    }

    fn on_armed(&self, _dialog: &str, timer: ArmedTimer, _delay: Duration) {
        self.record(|data| match timer {
            ArmedTimer::Refresh => data.armed_refresh += 1,
            ArmedTimer::Expiry => data.armed_expiry += 1,
        });
    }

    fn on_refresh_sent(&self, _dialog: &str, _method: &str) {
        self.record(|data| data.refreshes_sent += 1);
    }

    fn on_refreshed(&self, _dialog: &str, _interval_secs: u32) {
        self.record(|data| data.refreshed += 1);
    }

    fn on_expired(&self, _dialog: &str, _reason: &str) {
        self.record(|data| data.expired += 1);
    }

    fn on_torn_down(&self, _dialog: &str) {
        self.record(|data| data.torn_down += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_callback() {
        let metrics = SessionTimerMetrics::new();
        assert_eq!(metrics.snapshot().last_updated, None);

        metrics.on_negotiated("d", 1800, false);
        metrics.on_armed("d", ArmedTimer::Expiry, Duration::from_secs(1768));
        metrics.on_armed("d", ArmedTimer::Refresh, Duration::from_secs(900));
        metrics.on_expired("d", "no refresh");
        metrics.on_torn_down("d");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.negotiated, 1);
        assert_eq!(snapshot.armed_expiry, 1);
        assert_eq!(snapshot.armed_refresh, 1);
        assert_eq!(snapshot.expired, 1);
        assert_eq!(snapshot.torn_down, 1);
        assert_eq!(snapshot.refreshes_sent, 0);
        assert!(snapshot.last_updated.is_some());
    }

    #[test]
    fn clones_share_counters() {
        let metrics = SessionTimerMetrics::new();
        let clone = metrics.clone();
        clone.on_refresh_sent("d", "UPDATE");
        clone.on_refreshed("d", 1800);
        assert_eq!(metrics.snapshot().refreshes_sent, 1);
        assert_eq!(metrics.snapshot().refreshed, 1);
    }
}
