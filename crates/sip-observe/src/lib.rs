// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observability for session timer lifecycles.
//!
//! Observers are injected: every session timer context holds an
//! `Arc<dyn SessionTimerObserver>` handed to it at construction, so two user
//! agents in the same process can log or count independently.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_observe::{FanoutObserver, RecordingObserver, SessionTimerObserver, TracingSessionTimerObserver};
//!
//! let recorder = Arc::new(RecordingObserver::default());
//! let sinks: Vec<Arc<dyn SessionTimerObserver>> =
//!     vec![Arc::new(TracingSessionTimerObserver), recorder.clone()];
//! let observer = FanoutObserver::new(sinks);
//! observer.on_torn_down("call-1;local=a;remote=b");
//! assert_eq!(recorder.events().len(), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::Level;

/// Which session timer was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmedTimer {
    /// Local side refreshes at half the interval.
    Refresh,
    /// Remote side refreshes; the watchdog fires at the guard band.
    Expiry,
}

impl ArmedTimer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmedTimer::Refresh => "refresh",
            ArmedTimer::Expiry => "expiry",
        }
    }
}

/// Sink for session timer lifecycle events.
///
/// `dialog` is the display form of the dialog identifier. Implementations
/// must not block: callbacks run inline with negotiation and timer handling.
pub trait SessionTimerObserver: Send + Sync + 'static {
    /// Timers were adopted with the given interval.
    fn on_negotiated(&self, dialog: &str, interval_secs: u32, local_refresher: bool);
    /// Negotiation ended without timers because of a failure response.
    fn on_rejected(&self, dialog: &str, status: u16, reason: &str);
    fn on_armed(&self, dialog: &str, timer: ArmedTimer, delay: Duration);
    fn on_refresh_sent(&self, dialog: &str, method: &str);
    /// A refresh completed (sent or received) and timers were re-armed.
    fn on_refreshed(&self, dialog: &str, interval_secs: u32);
    fn on_expired(&self, dialog: &str, reason: &str);
    fn on_torn_down(&self, dialog: &str);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionTimerObserver;

impl SessionTimerObserver for NoopSessionTimerObserver {
    fn on_negotiated(&self, _dialog: &str, _interval_secs: u32, _local_refresher: bool) {}
    fn on_rejected(&self, _dialog: &str, _status: u16, _reason: &str) {}
    fn on_armed(&self, _dialog: &str, _timer: ArmedTimer, _delay: Duration) {}
    fn on_refresh_sent(&self, _dialog: &str, _method: &str) {}
    fn on_refreshed(&self, _dialog: &str, _interval_secs: u32) {}
    fn on_expired(&self, _dialog: &str, _reason: &str) {}
    fn on_torn_down(&self, _dialog: &str) {}
}

/// Convenience constructor for the default observer.
pub fn noop_observer() -> Arc<dyn SessionTimerObserver> {
    Arc::new(NoopSessionTimerObserver)
}

/// Creates a tracing span for work on one dialog's session timer.
pub fn span_with_dialog(op: &'static str, dialog: &str) -> tracing::Span {
    tracing::span!(Level::DEBUG, "session_timer", op = op, dialog = dialog)
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionTimerObserver;

impl SessionTimerObserver for TracingSessionTimerObserver {
    fn on_negotiated(&self, dialog: &str, interval_secs: u32, local_refresher: bool) {
        tracing::info!(dialog, interval_secs, local_refresher, "session timer negotiated");
    }

    fn on_rejected(&self, dialog: &str, status: u16, reason: &str) {
        tracing::warn!(dialog, status, reason, "session timer negotiation rejected");
    }

    fn on_armed(&self, dialog: &str, timer: ArmedTimer, delay: Duration) {
        tracing::debug!(
            dialog,
            timer = timer.as_str(),
            delay_secs = delay.as_secs(),
            "session timer armed"
        );
    }

    fn on_refresh_sent(&self, dialog: &str, method: &str) {
        tracing::debug!(dialog, method, "session refresh sent");
    }

    fn on_refreshed(&self, dialog: &str, interval_secs: u32) {
        tracing::debug!(dialog, interval_secs, "session refreshed");
    }

    fn on_expired(&self, dialog: &str, reason: &str) {
        tracing::warn!(dialog, reason, "session expired");
    }

    fn on_torn_down(&self, dialog: &str) {
        tracing::debug!(dialog, "session timer torn down");
    }
}

/// Forwards each event to several observers in order.
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn SessionTimerObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn SessionTimerObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn SessionTimerObserver>) {
        self.observers.push(observer);
    }
}

impl std::fmt::Debug for FanoutObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SessionTimerObserver for FanoutObserver {
    fn on_negotiated(&self, dialog: &str, interval_secs: u32, local_refresher: bool) {
        for o in &self.observers {
            o.on_negotiated(dialog, interval_secs, local_refresher);
        }
    }

    fn on_rejected(&self, dialog: &str, status: u16, reason: &str) {
        for o in &self.observers {
            o.on_rejected(dialog, status, reason);
        }
    }

    fn on_armed(&self, dialog: &str, timer: ArmedTimer, delay: Duration) {
        for o in &self.observers {
            o.on_armed(dialog, timer, delay);
        }
    }

    fn on_refresh_sent(&self, dialog: &str, method: &str) {
        for o in &self.observers {
            o.on_refresh_sent(dialog, method);
        }
    }

    fn on_refreshed(&self, dialog: &str, interval_secs: u32) {
        for o in &self.observers {
            o.on_refreshed(dialog, interval_secs);
        }
    }

    fn on_expired(&self, dialog: &str, reason: &str) {
        for o in &self.observers {
            o.on_expired(dialog, reason);
        }
    }

    fn on_torn_down(&self, dialog: &str) {
        for o in &self.observers {
            o.on_torn_down(dialog);
        }
    }
}

/// One captured observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Negotiated {
        dialog: String,
        interval_secs: u32,
        local_refresher: bool,
    },
    Rejected {
        dialog: String,
        status: u16,
        reason: String,
    },
    Armed {
        dialog: String,
        timer: ArmedTimer,
        delay: Duration,
    },
    RefreshSent {
        dialog: String,
        method: String,
    },
    Refreshed {
        dialog: String,
        interval_secs: u32,
    },
    Expired {
        dialog: String,
        reason: String,
    },
    TornDown {
        dialog: String,
    },
}

/// Keeps every event in memory; used by tests to assert on lifecycles.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Number of `on_expired` callbacks seen so far.
    pub fn expired_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::Expired { .. }))
            .count()
    }

    /// The most recently armed timer and its delay.
    pub fn last_armed(&self) -> Option<(ArmedTimer, Duration)> {
        self.events.lock().iter().rev().find_map(|e| match e {
            ObservedEvent::Armed { timer, delay, .. } => Some((*timer, *delay)),
            _ => None,
        })
    }

    fn record(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}

impl SessionTimerObserver for RecordingObserver {
    fn on_negotiated(&self, dialog: &str, interval_secs: u32, local_refresher: bool) {
        self.record(ObservedEvent::Negotiated {
            dialog: dialog.to_owned(),
            interval_secs,
            local_refresher,
        });
    }

    fn on_rejected(&self, dialog: &str, status: u16, reason: &str) {
        self.record(ObservedEvent::Rejected {
            dialog: dialog.to_owned(),
            status,
            reason: reason.to_owned(),
        });
    }

    fn on_armed(&self, dialog: &str, timer: ArmedTimer, delay: Duration) {
        self.record(ObservedEvent::Armed {
            dialog: dialog.to_owned(),
            timer,
            delay,
        });
    }

    fn on_refresh_sent(&self, dialog: &str, method: &str) {
        self.record(ObservedEvent::RefreshSent {
            dialog: dialog.to_owned(),
            method: method.to_owned(),
        });
    }

    fn on_refreshed(&self, dialog: &str, interval_secs: u32) {
        self.record(ObservedEvent::Refreshed {
            dialog: dialog.to_owned(),
            interval_secs,
        });
    }

    fn on_expired(&self, dialog: &str, reason: &str) {
        self.record(ObservedEvent::Expired {
            dialog: dialog.to_owned(),
            reason: reason.to_owned(),
        });
    }

    fn on_torn_down(&self, dialog: &str) {
        self.record(ObservedEvent::TornDown {
            dialog: dialog.to_owned(),
        });
    }
}
