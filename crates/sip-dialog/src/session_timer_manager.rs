// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 4028 refresh scheduling.
//!
//! A [`TimerScheduler`] arms at most one timer per dialog: either the local
//! refresh timer (at half the interval) or the expiry watchdog (at the
//! interval minus the guard band). Each arm hands back a [`TimerHandle`]
//! carrying a generation number; the session timer context only acts on a
//! fired handle that is still the one it armed, so an event that was already
//! queued when the timer was cancelled or replaced is a no-op.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sip_dialog::session_timer_manager::{SessionTimerEvent, SessionTimerManager};
//!
//! let manager = SessionTimerManager::new();
//! let mut events = manager.subscribe().expect("first subscriber");
//!
//! dialogs.arm_session_timer(&dialog_id, &manager);
//!
//! while let Some(event) = events.recv().await {
//!     match dialogs.handle_timer_event(&event) {
//!         Some(SessionTimerOutcome::Refresh(plan)) => { /* send UPDATE or re-INVITE */ }
//!         Some(SessionTimerOutcome::Expired(reason)) => { /* send BYE */ }
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::DialogId;

/// Largest guard band subtracted from the interval for the expiry watchdog.
pub const MAX_EXPIRY_GUARD: Duration = Duration::from_secs(32);

/// Which of the two session timers a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionTimerKind {
    /// We are the refresher; fires at interval / 2.
    Refresh,
    /// The peer is the refresher; fires at interval minus the guard band.
    Expiry,
}

impl SessionTimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionTimerKind::Refresh => "refresh",
            SessionTimerKind::Expiry => "expiry",
        }
    }
}

impl fmt::Display for SessionTimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one armed timer.
///
/// Holds only the dialog id, never the dialog itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    dialog_id: DialogId,
    kind: SessionTimerKind,
    generation: u64,
}

impl TimerHandle {
    pub fn new(dialog_id: DialogId, kind: SessionTimerKind, generation: u64) -> Self {
        Self {
            dialog_id,
            kind,
            generation,
        }
    }

    pub fn dialog_id(&self) -> &DialogId {
        &self.dialog_id
    }

    pub fn kind(&self) -> SessionTimerKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Events emitted when a session timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTimerEvent {
    /// Our refresh timer fired; a refresh request should be sent.
    RefreshNeeded(TimerHandle),
    /// The expiry watchdog fired; no refresh arrived in time.
    SessionExpired(TimerHandle),
}

impl SessionTimerEvent {
    fn for_handle(handle: TimerHandle) -> Self {
        match handle.kind {
            SessionTimerKind::Refresh => SessionTimerEvent::RefreshNeeded(handle),
            SessionTimerKind::Expiry => SessionTimerEvent::SessionExpired(handle),
        }
    }

    pub fn handle(&self) -> &TimerHandle {
        match self {
            SessionTimerEvent::RefreshNeeded(handle) | SessionTimerEvent::SessionExpired(handle) => {
                handle
            }
        }
    }

    pub fn dialog_id(&self) -> &DialogId {
        self.handle().dialog_id()
    }
}

/// Arms and cancels session timers.
///
/// Scheduling a timer for a dialog replaces whatever timer that dialog had.
/// Cancelling with a handle that has already been replaced does nothing.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, dialog_id: &DialogId, kind: SessionTimerKind, after: Duration)
        -> TimerHandle;

    fn cancel(&self, handle: &TimerHandle);
}

#[derive(Debug)]
struct TimerTask {
    generation: u64,
    kind: SessionTimerKind,
    fires_at: Instant,
    cancel_tx: Option<mpsc::Sender<()>>,
}

/// Tokio-backed scheduler shared by all dialogs of a user agent.
///
/// Each armed timer is a spawned task sleeping until its deadline. Fired
/// timers are delivered on a single unbounded channel obtained with
/// [`subscribe`](Self::subscribe). Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SessionTimerManager {
    tasks: Arc<DashMap<DialogId, TimerTask>>,
    next_generation: Arc<AtomicU64>,
    event_tx: mpsc::UnboundedSender<SessionTimerEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<SessionTimerEvent>>>>,
}

impl SessionTimerManager {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            tasks: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(1)),
            event_tx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
        }
    }

    /// Takes the event receiver. Only the first caller gets one.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SessionTimerEvent>> {
        self.event_rx.lock().take()
    }

    pub fn has_timer(&self, dialog_id: &DialogId) -> bool {
        self.tasks.contains_key(dialog_id)
    }

    /// Kind of the timer currently armed for a dialog.
    pub fn armed_kind(&self, dialog_id: &DialogId) -> Option<SessionTimerKind> {
        self.tasks.get(dialog_id).map(|task| task.kind)
    }

    /// Time left until the dialog's armed timer fires.
    pub fn time_remaining(&self, dialog_id: &DialogId) -> Option<Duration> {
        self.tasks
            .get(dialog_id)
            .map(|task| task.fires_at.saturating_duration_since(Instant::now()))
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every armed timer.
    pub fn clear(&self) {
        let ids: Vec<DialogId> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                stop(task);
            }
        }
    }

    fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SessionTimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionTimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTimerManager")
            .field("active", &self.tasks.len())
            .finish()
    }
}

impl TimerScheduler for SessionTimerManager {
    fn schedule(
        &self,
        dialog_id: &DialogId,
        kind: SessionTimerKind,
        after: Duration,
    ) -> TimerHandle {
        let generation = self.allocate_generation();
        let handle = TimerHandle::new(dialog_id.clone(), kind, generation);
        let fires_at = Instant::now() + after;
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);

        let previous = self.tasks.insert(
            dialog_id.clone(),
            TimerTask {
                generation,
                kind,
                fires_at,
                cancel_tx: Some(cancel_tx),
            },
        );
        if let Some(previous) = previous {
            stop(previous);
        }
        debug!(dialog = %dialog_id, %kind, generation, ?after, "session timer armed");

        let tasks = self.tasks.clone();
        let event_tx = self.event_tx.clone();
        let fired = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(fires_at) => {
                    // Only the generation still on record may fire.
                    let current = tasks
                        .remove_if(&fired.dialog_id, |_, task| task.generation == fired.generation)
                        .is_some();
                    if current {
                        trace!(dialog = %fired.dialog_id, kind = %fired.kind, "session timer fired");
                        let _ = event_tx.send(SessionTimerEvent::for_handle(fired));
                    }
                }
                _ = cancel_rx.recv() => {}
            }
        });

        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        if let Some((_, task)) = self
            .tasks
            .remove_if(&handle.dialog_id, |_, task| task.generation == handle.generation)
        {
            debug!(dialog = %handle.dialog_id, kind = %handle.kind, "session timer cancelled");
            stop(task);
        }
    }
}

fn stop(task: TimerTask) {
    if let Some(cancel_tx) = task.cancel_tx {
        let _ = cancel_tx.try_send(());
    }
}

/// Scheduler that only records what is armed. Timers fire when the caller
/// says so, which suits synchronous tests and callers with their own clock.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    armed: Mutex<HashMap<DialogId, (TimerHandle, Duration)>>,
    next_generation: AtomicU64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind and delay of the timer armed for a dialog.
    pub fn armed(&self, dialog_id: &DialogId) -> Option<(SessionTimerKind, Duration)> {
        self.armed
            .lock()
            .get(dialog_id)
            .map(|(handle, after)| (handle.kind, *after))
    }

    pub fn handle(&self, dialog_id: &DialogId) -> Option<TimerHandle> {
        self.armed.lock().get(dialog_id).map(|(handle, _)| handle.clone())
    }

    /// Fires the dialog's armed timer, returning the event a real scheduler
    /// would have delivered.
    pub fn fire(&self, dialog_id: &DialogId) -> Option<SessionTimerEvent> {
        self.armed
            .lock()
            .remove(dialog_id)
            .map(|(handle, _)| SessionTimerEvent::for_handle(handle))
    }

    pub fn active_count(&self) -> usize {
        self.armed.lock().len()
    }
}

impl TimerScheduler for ManualScheduler {
    fn schedule(
        &self,
        dialog_id: &DialogId,
        kind: SessionTimerKind,
        after: Duration,
    ) -> TimerHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = TimerHandle::new(dialog_id.clone(), kind, generation);
        self.armed
            .lock()
            .insert(dialog_id.clone(), (handle.clone(), after));
        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        let mut armed = self.armed.lock();
        let current = armed
            .get(&handle.dialog_id)
            .map_or(false, |(armed, _)| armed.generation == handle.generation);
        if current {
            armed.remove(&handle.dialog_id);
        }
    }
}

/// When the refresher sends its refresh: half the interval.
pub fn calculate_refresh_time(session_expires: Duration) -> Duration {
    session_expires / 2
}

/// When the non-refresher gives up on the session (RFC 4028 §10):
/// the interval minus the smaller of a third of it and 32 seconds.
pub fn calculate_expiry_time(session_expires: Duration) -> Duration {
    let guard = (session_expires / 3).min(MAX_EXPIRY_GUARD);
    session_expires - guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog(n: u32) -> DialogId {
        DialogId::new(format!("call-{}", n), "local", "remote")
    }

    #[test]
    fn refresh_time_is_half_the_interval() {
        assert_eq!(
            calculate_refresh_time(Duration::from_secs(1800)),
            Duration::from_secs(900)
        );
        assert_eq!(
            calculate_refresh_time(Duration::from_secs(90)),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn expiry_time_subtracts_guard_band() {
        assert_eq!(
            calculate_expiry_time(Duration::from_secs(1800)),
            Duration::from_secs(1768)
        );
        // A third of 90 is less than 32.
        assert_eq!(
            calculate_expiry_time(Duration::from_secs(90)),
            Duration::from_secs(60)
        );
        assert_eq!(
            calculate_expiry_time(Duration::from_secs(96)),
            Duration::from_secs(64)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_and_cancel() {
        let manager = SessionTimerManager::new();
        let id = dialog(1);
        assert!(!manager.has_timer(&id));

        let handle = manager.schedule(&id, SessionTimerKind::Refresh, Duration::from_secs(900));
        assert!(manager.has_timer(&id));
        assert_eq!(manager.armed_kind(&id), Some(SessionTimerKind::Refresh));
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.time_remaining(&id), Some(Duration::from_secs(900)));

        manager.cancel(&handle);
        assert!(!manager.has_timer(&id));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_at_its_deadline() {
        let manager = SessionTimerManager::new();
        let mut events = manager.subscribe().unwrap();
        let id = dialog(1);
        let start = Instant::now();

        let handle = manager.schedule(&id, SessionTimerKind::Expiry, Duration::from_secs(1768));
        let event = events.recv().await.unwrap();

        assert_eq!(event, SessionTimerEvent::SessionExpired(handle));
        assert_eq!(start.elapsed(), Duration::from_secs(1768));
        assert!(!manager.has_timer(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_old_timer() {
        let manager = SessionTimerManager::new();
        let mut events = manager.subscribe().unwrap();
        let id = dialog(1);

        let first = manager.schedule(&id, SessionTimerKind::Refresh, Duration::from_secs(10));
        let second = manager.schedule(&id, SessionTimerKind::Refresh, Duration::from_secs(20));
        assert_ne!(first.generation(), second.generation());
        assert_eq!(manager.active_count(), 1);

        // Cancelling the replaced handle leaves the new timer alone.
        manager.cancel(&first);
        assert!(manager.has_timer(&id));

        let event = events.recv().await.unwrap();
        assert_eq!(event.handle(), &second);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let manager = SessionTimerManager::new();
        let mut events = manager.subscribe().unwrap();
        let id = dialog(1);

        let handle = manager.schedule(&id, SessionTimerKind::Expiry, Duration::from_secs(60));
        manager.cancel(&handle);

        let waited = tokio::time::timeout(Duration::from_secs(120), events.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_removes_all_timers() {
        let manager = SessionTimerManager::new();
        for n in 0..3 {
            manager.schedule(&dialog(n), SessionTimerKind::Refresh, Duration::from_secs(100));
        }
        assert_eq!(manager.active_count(), 3);

        manager.clear();
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn only_one_subscriber() {
        let manager = SessionTimerManager::new();
        assert!(manager.subscribe().is_some());
        assert!(manager.subscribe().is_none());
    }

    #[test]
    fn manual_scheduler_ignores_stale_cancel() {
        let scheduler = ManualScheduler::new();
        let id = dialog(7);

        let first = scheduler.schedule(&id, SessionTimerKind::Refresh, Duration::from_secs(45));
        let second = scheduler.schedule(&id, SessionTimerKind::Expiry, Duration::from_secs(60));
        scheduler.cancel(&first);
        assert_eq!(
            scheduler.armed(&id),
            Some((SessionTimerKind::Expiry, Duration::from_secs(60)))
        );

        let event = scheduler.fire(&id).unwrap();
        assert_eq!(event, SessionTimerEvent::SessionExpired(second));
        assert_eq!(scheduler.active_count(), 0);
    }
}
