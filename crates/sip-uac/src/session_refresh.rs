// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Turns fired session timers into refresh requests or teardown.
//!
//! The driver consumes [`SessionTimerEvent`]s from a scheduler. A refresh
//! event becomes an UPDATE or re-INVITE sent through a [`RequestSender`];
//! an expiry (or a refresh that could not be completed) terminates the
//! dialog and calls the [`SessionTerminationHandler`] exactly once.
//!
//! The dialog entry is never held across the send, so incoming requests for
//! the same dialog are not blocked while a refresh transaction runs.

use std::sync::Arc;

use async_trait::async_trait;
use sip_core::{Request, Response};
use sip_dialog::{
    Dialog, DialogId, RefreshOutcome, RefreshPlan, SessionTimerEvent, SessionTimerFailure,
    SessionTimerOutcome, TransactionError,
};
use sip_observe::span_with_dialog;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn, Instrument};

use crate::UserAgentClient;

/// Sends an in-dialog request and waits for its final response.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Provisional responses are absorbed by the implementation; only the
    /// final response or the transaction failure is returned.
    async fn send_request(&self, request: Request) -> Result<Response, TransactionError>;
}

/// Told when a session ends because its timer ran out.
pub trait SessionTerminationHandler: Send + Sync {
    /// `dialog` has already been removed from the manager with its timers
    /// disarmed. Typically the application sends a BYE here.
    fn on_expired(&self, dialog: Dialog, failure: SessionTimerFailure);
}

/// What handling one timer event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    /// Stale event, or the dialog was already gone.
    Dropped,
    Refreshed { interval: u32 },
    /// The peer stopped doing session timers during a refresh.
    TimersDisabled,
    Terminated(SessionTimerFailure),
}

/// Executes session refreshes for every dialog in a client's manager.
///
/// Dialogs created by a UAS sharing the same [`DialogManager`](sip_dialog::DialogManager)
/// and scheduler are driven too.
pub struct SessionRefreshDriver {
    uac: Arc<UserAgentClient>,
    sender: Arc<dyn RequestSender>,
    handler: Arc<dyn SessionTerminationHandler>,
}

impl SessionRefreshDriver {
    pub fn new(
        uac: Arc<UserAgentClient>,
        sender: Arc<dyn RequestSender>,
        handler: Arc<dyn SessionTerminationHandler>,
    ) -> Self {
        Self {
            uac,
            sender,
            handler,
        }
    }

    /// Handles events until the scheduler's channel closes. Each event runs
    /// on its own task so a slow refresh does not delay other dialogs.
    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<SessionTimerEvent>) {
        while let Some(event) = events.recv().await {
            let driver = Arc::clone(&self);
            let span = span_with_dialog(
                event.handle().kind().as_str(),
                &event.dialog_id().to_string(),
            );
            tokio::spawn(
                async move {
                    driver.handle_event(event).await;
                }
                .instrument(span),
            );
        }
        debug!("session timer event channel closed");
    }

    /// Handles one fired timer.
    pub async fn handle_event(&self, event: SessionTimerEvent) -> DriverOutcome {
        let dialog_id = event.dialog_id().clone();
        match self.uac.dialog_manager.handle_timer_event(&event) {
            None | Some(SessionTimerOutcome::Ignored) => DriverOutcome::Dropped,
            Some(SessionTimerOutcome::Expired(failure)) => self.terminate(&dialog_id, failure),
            Some(SessionTimerOutcome::Refresh(plan)) => self.refresh(&dialog_id, plan).await,
        }
    }

    async fn refresh(&self, dialog_id: &DialogId, mut plan: RefreshPlan) -> DriverOutcome {
        let dialogs = &self.uac.dialog_manager;
        loop {
            let built = dialogs.with_dialog_mut(dialog_id, |dialog| {
                self.uac.create_session_refresh(dialog, &plan)
            });
            let result = match built {
                None => return DriverOutcome::Dropped,
                Some(Ok(request)) => self.sender.send_request(request).await,
                Some(Err(err)) => {
                    warn!(dialog = %dialog_id, error = %err, "could not build session refresh");
                    Err(TransactionError::Transport(err.to_string()))
                }
            };

            let outcome = dialogs.with_dialog_mut(dialog_id, |dialog| {
                dialog
                    .session_timer
                    .on_refresh_response(result.as_ref(), self.uac.scheduler())
            });
            match outcome {
                None | Some(RefreshOutcome::Ignored) => return DriverOutcome::Dropped,
                Some(RefreshOutcome::Refreshed { interval, .. }) => {
                    debug!(dialog = %dialog_id, interval, "session refreshed");
                    return DriverOutcome::Refreshed { interval };
                }
                Some(RefreshOutcome::Disabled) => return DriverOutcome::TimersDisabled,
                Some(RefreshOutcome::Expired(failure)) => {
                    return self.terminate(dialog_id, failure)
                }
                Some(RefreshOutcome::RetryWithInterval(interval)) => {
                    info!(dialog = %dialog_id, interval, "retrying session refresh after 422");
                    let next = dialogs
                        .with_dialog_mut(dialog_id, |dialog| dialog.session_timer.refresh_plan())
                        .flatten();
                    match next {
                        Some(next) => plan = next,
                        None => return DriverOutcome::Dropped,
                    }
                }
            }
        }
    }

    fn terminate(&self, dialog_id: &DialogId, failure: SessionTimerFailure) -> DriverOutcome {
        match self
            .uac
            .dialog_manager
            .terminate(dialog_id, self.uac.scheduler())
        {
            Some(dialog) => {
                warn!(dialog = %dialog_id, %failure, "session timer ended the dialog");
                self.handler.on_expired(dialog, failure);
                DriverOutcome::Terminated(failure)
            }
            None => DriverOutcome::Dropped,
        }
    }
}
