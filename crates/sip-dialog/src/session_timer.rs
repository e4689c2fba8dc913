// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-dialog session timer state machine (RFC 4028).
//!
//! ```text
//! Disabled -> Negotiating -> Active <-> Refreshing
//!                  |            |           |
//!                  v            v           v
//!             Terminated     Expired     Expired
//! ```
//!
//! A [`SessionTimerContext`] is owned by exactly one dialog. It never touches
//! the network: every input (a response, an incoming request, a fired timer)
//! goes in through a method and every decision comes back as a typed outcome
//! the UAC/UAS layer acts on. Timers are armed through a [`TimerScheduler`]
//! that knows only the dialog id.
//!
//! The owning dialog serialises all calls on one context, so the context
//! needs no locking of its own. A timer event that was already queued when
//! its timer got cancelled or replaced carries an old [`TimerHandle`]; it is
//! answered with [`SessionTimerOutcome::Ignored`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sip_core::{
    Headers, Method, RefresherRole, Request, Response, SessionExpires, TIMER_OPTION_TAG,
};
use sip_observe::{ArmedTimer, SessionTimerObserver};
use sip_parse::{parse_allow, parse_min_se, parse_session_expires, parse_unsupported};
use tracing::{debug, info, warn};

use crate::capability::{decorate_outgoing_request, ensure_update_allowed, interpret_incoming};
use crate::error::{SessionTimerFailure, TransactionError};
use crate::interval::IntervalNegotiator;
use crate::refresher::{choose_for_answer, proposal_param, resolve_from_response, Refresher};
use crate::session_timer_config::SessionTimerConfig;
use crate::session_timer_manager::{
    calculate_expiry_time, calculate_refresh_time, SessionTimerKind, TimerHandle, TimerScheduler,
};
use crate::DialogId;

/// Where a context is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Disabled,
    Negotiating,
    Active,
    Refreshing,
    Expired,
    Terminated,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Disabled => "disabled",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Active => "active",
            NegotiationState::Refreshing => "refreshing",
            NegotiationState::Expired => "expired",
            NegotiationState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Our role in the transaction that established the dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Uac,
    Uas,
}

/// Result of feeding a response to the establishing request into the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Timers are on with this interval and refresher.
    Adopted { interval: u32, refresher: Refresher },
    /// The session goes ahead (or failed for unrelated reasons) without timers.
    NotAdopted,
    /// 422: re-issue the request; the next `negotiate_outgoing` proposes this.
    RetryWithInterval(u32),
    /// Session establishment failed because of session timers.
    Rejected(SessionTimerFailure),
    /// Provisional response; nothing decided yet.
    Pending,
}

/// Answer to an incoming establishing request or session refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Send a 2xx carrying these headers.
    Accept(Headers),
    /// Send 420 with `Unsupported: timer`.
    RejectBadExtension,
    /// Send 422 with this `Min-SE`.
    RejectIntervalTooSmall { min_se: u32 },
}

/// A refresh request the dialog should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    pub method: Method,
    pub session_expires: u32,
    pub headers: Headers,
}

/// Result of a fired timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTimerOutcome {
    /// Our refresh timer fired; send this request.
    Refresh(RefreshPlan),
    /// The session is over; the dialog must be torn down (normally a BYE).
    Expired(SessionTimerFailure),
    /// Stale or irrelevant event.
    Ignored,
}

/// Result of the final response to a refresh we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Timers re-armed from the answered interval.
    Refreshed { interval: u32, refresher: Refresher },
    /// 422: call [`SessionTimerContext::refresh_plan`] and send again.
    RetryWithInterval(u32),
    /// The refresh failed; the dialog must be torn down.
    Expired(SessionTimerFailure),
    /// The peer answered without `Session-Expires`; timers are off.
    Disabled,
    /// Not waiting for a refresh response (or provisional response).
    Ignored,
}

/// Session timer state of one dialog.
pub struct SessionTimerContext {
    config: SessionTimerConfig,
    role: SessionRole,
    state: NegotiationState,
    negotiator: IntervalNegotiator,
    proposed_refresher: Option<RefresherRole>,
    negotiated_interval: Option<u32>,
    refresher: Option<Refresher>,
    enabled: bool,
    refresh_handle: Option<TimerHandle>,
    expiry_handle: Option<TimerHandle>,
    peer_allows_update: bool,
    dialog_id: Option<DialogId>,
    observer: Arc<dyn SessionTimerObserver>,
}

struct Answer {
    headers: Headers,
    adopted: Option<(u32, Refresher)>,
}

impl SessionTimerContext {
    /// Context for a dialog we are establishing (we send the INVITE).
    pub fn new_uac(config: SessionTimerConfig, observer: Arc<dyn SessionTimerObserver>) -> Self {
        Self::new(config, SessionRole::Uac, observer)
    }

    /// Context for a dialog a peer is establishing with us.
    pub fn new_uas(config: SessionTimerConfig, observer: Arc<dyn SessionTimerObserver>) -> Self {
        Self::new(config, SessionRole::Uas, observer)
    }

    fn new(
        config: SessionTimerConfig,
        role: SessionRole,
        observer: Arc<dyn SessionTimerObserver>,
    ) -> Self {
        Self {
            negotiator: IntervalNegotiator::new(&config),
            config,
            role,
            state: NegotiationState::Disabled,
            proposed_refresher: None,
            negotiated_interval: None,
            refresher: None,
            enabled: false,
            refresh_handle: None,
            expiry_handle: None,
            peer_allows_update: false,
            dialog_id: None,
            observer,
        }
    }

    /// Headers for the outgoing establishing request.
    ///
    /// Calling this again (for example after a 422) yields the current
    /// proposal; with nothing changed in between the header set is identical.
    pub fn negotiate_outgoing(&mut self) -> Headers {
        let mut headers = Headers::new();
        decorate_outgoing_request(&self.config, &mut headers);
        if !self.config.timers_enabled() {
            return headers;
        }

        let (interval, min_se) = self.negotiator.propose(&self.config);
        let refresher = proposal_param(self.config.refresher_preference(), true);
        self.proposed_refresher = refresher;
        headers.push("Session-Expires", session_expires_value(interval, refresher));
        headers.push("Min-SE", min_se.to_string());

        if self.state == NegotiationState::Disabled {
            self.set_state(NegotiationState::Negotiating);
        }
        headers
    }

    /// Interprets a response to the establishing request.
    pub fn on_response(&mut self, response: &Response) -> NegotiationOutcome {
        if response.is_provisional() {
            return NegotiationOutcome::Pending;
        }

        if response.is_success() {
            if !self.config.timers_enabled() {
                self.disable();
                return NegotiationOutcome::NotAdopted;
            }
            return self.adopt_from_success(response);
        }

        match response.code() {
            422 if self.config.timers_enabled() => {
                let min_se = self.read_min_se(response.headers());
                match self.negotiator.on_interval_too_small(min_se, &self.config) {
                    Ok(interval) => {
                        debug!(interval, "retrying establishing request after 422");
                        NegotiationOutcome::RetryWithInterval(interval)
                    }
                    Err(failure) => self.reject(failure),
                }
            }
            420 if parse_unsupported(response.headers()).contains(TIMER_OPTION_TAG) => {
                self.reject(SessionTimerFailure::UnsupportedByPeer)
            }
            code => {
                debug!(code, "establishing request failed");
                self.enabled = false;
                self.refresher = None;
                self.set_state(NegotiationState::Terminated);
                NegotiationOutcome::NotAdopted
            }
        }
    }

    fn adopt_from_success(&mut self, response: &Response) -> NegotiationOutcome {
        let headers = response.headers();
        self.peer_allows_update = parse_allow(headers).contains("UPDATE");

        let Some(se) = self.read_session_expires(headers) else {
            debug!("2xx without Session-Expires, session timers not adopted");
            self.disable();
            return NegotiationOutcome::NotAdopted;
        };

        let interval = match self.negotiator.accept_response(se.delta_seconds()) {
            Ok(interval) => interval,
            Err(floor) => {
                warn!(
                    interval = se.delta_seconds(),
                    floor, "2xx Session-Expires below our Min-SE, session timers not adopted"
                );
                self.disable();
                return NegotiationOutcome::NotAdopted;
            }
        };

        let refresher = resolve_from_response(
            self.proposed_refresher,
            se.refresher(),
            self.config.default_refresher(),
        );
        self.adopt(interval, refresher);
        self.observer
            .on_negotiated(&self.label(), interval, refresher.is_local());
        NegotiationOutcome::Adopted {
            interval,
            refresher,
        }
    }

    /// Decides how to answer an incoming session-establishing request.
    ///
    /// On `Accept` the context is `Active` (or `Disabled` when timers were not
    /// adopted) and [`arm`](Self::arm) should be called once the 2xx is sent.
    pub fn on_incoming_establishing_request(&mut self, request: &Request) -> RequestOutcome {
        if self.config.timers_enabled() && self.state == NegotiationState::Disabled {
            self.set_state(NegotiationState::Negotiating);
        }
        match self.answer(request.headers()) {
            Ok(Answer { headers, adopted }) => {
                match adopted {
                    Some((interval, refresher)) => {
                        self.adopt(interval, refresher);
                        self.observer
                            .on_negotiated(&self.label(), interval, refresher.is_local());
                    }
                    None => self.disable(),
                }
                RequestOutcome::Accept(headers)
            }
            Err(outcome) => outcome,
        }
    }

    /// Handles an incoming UPDATE or re-INVITE on a confirmed dialog.
    ///
    /// Negotiated like an establishing request. When accepted, timers are
    /// cancelled and re-armed from the new values; a rejection leaves the
    /// running timers untouched.
    pub fn on_refresh_received(
        &mut self,
        request: &Request,
        scheduler: &dyn TimerScheduler,
    ) -> RequestOutcome {
        if matches!(
            self.state,
            NegotiationState::Expired | NegotiationState::Terminated
        ) {
            debug!(state = %self.state, "refresh on a finished session");
            return RequestOutcome::Accept(Headers::new());
        }

        match self.answer(request.headers()) {
            Ok(Answer { headers, adopted }) => {
                self.cancel_timers(scheduler);
                match adopted {
                    Some((interval, refresher)) => {
                        self.adopt(interval, refresher);
                        self.observer.on_refreshed(&self.label(), interval);
                        self.schedule(scheduler);
                    }
                    None => {
                        debug!("refresh without session timers, timers off");
                        self.disable();
                    }
                }
                RequestOutcome::Accept(headers)
            }
            Err(outcome) => outcome,
        }
    }

    fn answer(&mut self, headers: &Headers) -> Result<Answer, RequestOutcome> {
        let capability = match interpret_incoming(headers, &self.config) {
            Ok(capability) => capability,
            Err(failure) => {
                self.observer
                    .on_rejected(&self.label(), failure.reason_code(), &failure.to_string());
                return Err(RequestOutcome::RejectBadExtension);
            }
        };
        self.peer_allows_update = parse_allow(headers).contains("UPDATE");

        let mut answer = Headers::new();
        if !self.config.timers_enabled() {
            return Ok(Answer {
                headers: answer,
                adopted: None,
            });
        }
        answer.push("Supported", TIMER_OPTION_TAG);
        ensure_update_allowed(&mut answer);

        let peer_se = self.read_session_expires(headers);
        if !capability.supports_timer() && peer_se.is_none() {
            return Ok(Answer {
                headers: answer,
                adopted: None,
            });
        }

        let peer_min = self.read_min_se(headers);
        let interval = match self.negotiator.answer(
            peer_se.map(|se| se.delta_seconds()),
            peer_min,
            &self.config,
        ) {
            Ok(interval) => interval,
            Err(SessionTimerFailure::IntervalTooSmall { min_se }) => {
                self.observer
                    .on_rejected(&self.label(), 422, "session interval too small");
                return Err(RequestOutcome::RejectIntervalTooSmall { min_se });
            }
            Err(failure) => {
                self.observer
                    .on_rejected(&self.label(), failure.reason_code(), &failure.to_string());
                return Err(RequestOutcome::RejectBadExtension);
            }
        };

        let role = choose_for_answer(
            peer_se.and_then(|se| se.refresher()),
            self.config.refresher_preference(),
            capability.supports_timer(),
            self.config.default_refresher(),
        );
        answer.push("Session-Expires", session_expires_value(interval, Some(role)));
        if role == RefresherRole::Uac {
            answer.push("Require", TIMER_OPTION_TAG);
        }

        Ok(Answer {
            headers: answer,
            adopted: Some((interval, Refresher::from_role(role, false))),
        })
    }

    /// Arms the timer for this dialog: the refresh timer if we refresh,
    /// otherwise the expiry watchdog. Returns false when timers are off.
    pub fn arm(&mut self, dialog_id: &DialogId, scheduler: &dyn TimerScheduler) -> bool {
        self.dialog_id = Some(dialog_id.clone());
        self.cancel_timers(scheduler);
        self.schedule(scheduler)
    }

    fn schedule(&mut self, scheduler: &dyn TimerScheduler) -> bool {
        let (Some(dialog_id), Some(interval), Some(refresher)) =
            (self.dialog_id.as_ref(), self.negotiated_interval, self.refresher)
        else {
            return false;
        };
        if !self.enabled || self.state != NegotiationState::Active {
            return false;
        }

        let interval = Duration::from_secs(u64::from(interval));
        let (kind, delay) = match refresher {
            Refresher::Local => (SessionTimerKind::Refresh, calculate_refresh_time(interval)),
            Refresher::Remote => (SessionTimerKind::Expiry, calculate_expiry_time(interval)),
        };
        let handle = scheduler.schedule(dialog_id, kind, delay);
        let label = dialog_id.to_string();
        match kind {
            SessionTimerKind::Refresh => {
                self.refresh_handle = Some(handle);
                self.observer.on_armed(&label, ArmedTimer::Refresh, delay);
            }
            SessionTimerKind::Expiry => {
                self.expiry_handle = Some(handle);
                self.observer.on_armed(&label, ArmedTimer::Expiry, delay);
            }
        }
        true
    }

    /// Handles a fired timer.
    pub fn on_timer_fired(&mut self, handle: &TimerHandle) -> SessionTimerOutcome {
        match handle.kind() {
            SessionTimerKind::Refresh => {
                if self.refresh_handle.as_ref() != Some(handle) {
                    debug!(dialog = %handle.dialog_id(), "stale refresh timer ignored");
                    return SessionTimerOutcome::Ignored;
                }
                self.refresh_handle = None;
                if self.state != NegotiationState::Active {
                    return SessionTimerOutcome::Ignored;
                }

                let interval = self
                    .negotiated_interval
                    .unwrap_or(self.config.default_interval());
                self.negotiator.begin_attempt(interval);
                self.set_state(NegotiationState::Refreshing);
                let plan = self.build_refresh_plan();
                self.observer
                    .on_refresh_sent(&self.label(), plan.method.as_str());
                SessionTimerOutcome::Refresh(plan)
            }
            SessionTimerKind::Expiry => {
                if self.expiry_handle.as_ref() != Some(handle) {
                    debug!(dialog = %handle.dialog_id(), "stale expiry timer ignored");
                    return SessionTimerOutcome::Ignored;
                }
                self.expiry_handle = None;
                SessionTimerOutcome::Expired(self.expire(SessionTimerFailure::ExpiryWatchdogFired))
            }
        }
    }

    /// The refresh request to (re)send while `Refreshing`.
    pub fn refresh_plan(&mut self) -> Option<RefreshPlan> {
        (self.state == NegotiationState::Refreshing).then(|| self.build_refresh_plan())
    }

    fn build_refresh_plan(&mut self) -> RefreshPlan {
        let (interval, min_se) = self.negotiator.propose(&self.config);
        let mut headers = Headers::new();
        headers.push(
            "Session-Expires",
            session_expires_value(interval, Some(RefresherRole::Uac)),
        );
        headers.push("Min-SE", min_se.to_string());
        headers.push("Supported", TIMER_OPTION_TAG);

        let method = if self.peer_allows_update {
            Method::Update
        } else {
            Method::Invite
        };
        RefreshPlan {
            method,
            session_expires: interval,
            headers,
        }
    }

    /// Applies the outcome of a refresh we sent.
    pub fn on_refresh_response(
        &mut self,
        result: Result<&Response, &TransactionError>,
        scheduler: &dyn TimerScheduler,
    ) -> RefreshOutcome {
        if self.state != NegotiationState::Refreshing {
            return RefreshOutcome::Ignored;
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "session refresh transaction failed");
                return RefreshOutcome::Expired(self.expire(SessionTimerFailure::RefreshFailed));
            }
        };
        if response.is_provisional() {
            return RefreshOutcome::Ignored;
        }

        if response.is_success() {
            let headers = response.headers();
            if headers.contains("Allow") {
                self.peer_allows_update = parse_allow(headers).contains("UPDATE");
            }
            let accepted = self
                .read_session_expires(headers)
                .and_then(|se| {
                    self.negotiator
                        .accept_response(se.delta_seconds())
                        .ok()
                        .map(|interval| (interval, se.refresher()))
                });
            let Some((interval, answered)) = accepted else {
                debug!("refresh 2xx without usable Session-Expires, timers off");
                self.cancel_timers(scheduler);
                self.disable();
                return RefreshOutcome::Disabled;
            };

            let refresher = resolve_from_response(
                Some(RefresherRole::Uac),
                answered,
                self.config.default_refresher(),
            );
            self.adopt(interval, refresher);
            self.observer.on_refreshed(&self.label(), interval);
            self.cancel_timers(scheduler);
            self.schedule(scheduler);
            return RefreshOutcome::Refreshed {
                interval,
                refresher,
            };
        }

        if response.code() == 422 {
            let min_se = self.read_min_se(response.headers());
            return match self.negotiator.on_interval_too_small(min_se, &self.config) {
                Ok(interval) => RefreshOutcome::RetryWithInterval(interval),
                Err(failure) => RefreshOutcome::Expired(self.expire(failure)),
            };
        }

        warn!(code = response.code(), "session refresh rejected");
        RefreshOutcome::Expired(self.expire(SessionTimerFailure::RefreshFailed))
    }

    /// Disarms both timers. Must run before the dialog is dropped.
    pub fn teardown(&mut self, scheduler: &dyn TimerScheduler) {
        self.cancel_timers(scheduler);
        self.enabled = false;
        self.refresher = None;
        if self.state == NegotiationState::Terminated {
            return;
        }
        if self.state != NegotiationState::Expired {
            self.set_state(NegotiationState::Terminated);
        }
        self.observer.on_torn_down(&self.label());
    }

    fn adopt(&mut self, interval: u32, refresher: Refresher) {
        info!(interval, ?refresher, "session timer adopted");
        self.negotiated_interval = Some(interval);
        self.refresher = Some(refresher);
        self.enabled = true;
        self.set_state(NegotiationState::Active);
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.refresher = None;
        self.negotiated_interval = None;
        self.set_state(NegotiationState::Disabled);
    }

    fn reject(&mut self, failure: SessionTimerFailure) -> NegotiationOutcome {
        warn!(%failure, "session timer negotiation rejected");
        self.enabled = false;
        self.refresher = None;
        self.set_state(NegotiationState::Terminated);
        self.observer
            .on_rejected(&self.label(), failure.reason_code(), &failure.to_string());
        NegotiationOutcome::Rejected(failure)
    }

    fn expire(&mut self, failure: SessionTimerFailure) -> SessionTimerFailure {
        warn!(%failure, dialog = %self.label(), "session expired");
        self.enabled = false;
        self.refresher = None;
        self.refresh_handle = None;
        self.expiry_handle = None;
        self.set_state(NegotiationState::Expired);
        self.observer.on_expired(&self.label(), &failure.to_string());
        failure
    }

    fn cancel_timers(&mut self, scheduler: &dyn TimerScheduler) {
        for handle in [self.refresh_handle.take(), self.expiry_handle.take()]
            .into_iter()
            .flatten()
        {
            scheduler.cancel(&handle);
        }
    }

    fn set_state(&mut self, next: NegotiationState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "session timer state");
            self.state = next;
        }
    }

    fn read_session_expires(&self, headers: &Headers) -> Option<SessionExpires> {
        parse_session_expires(headers).unwrap_or_else(|err| {
            warn!(error = %err, "ignoring malformed Session-Expires");
            None
        })
    }

    fn read_min_se(&self, headers: &Headers) -> Option<u32> {
        match parse_min_se(headers) {
            Ok(min_se) => min_se.map(|m| m.delta_seconds()),
            Err(err) => {
                warn!(error = %err, "ignoring malformed Min-SE");
                None
            }
        }
    }

    fn label(&self) -> String {
        self.dialog_id
            .as_ref()
            .map_or_else(|| "-".to_string(), |id| id.to_string())
    }

    pub fn config(&self) -> &SessionTimerConfig {
        &self.config
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn negotiated_interval(&self) -> Option<u32> {
        self.negotiated_interval
    }

    /// Current local Min-SE (raised by a 422 if one was received).
    pub fn min_se(&self) -> u32 {
        self.negotiator.local_min()
    }

    pub fn refresher(&self) -> Option<Refresher> {
        self.refresher
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn peer_allows_update(&self) -> bool {
        self.peer_allows_update
    }

    pub fn dialog_id(&self) -> Option<&DialogId> {
        self.dialog_id.as_ref()
    }

    pub fn negotiator(&self) -> &IntervalNegotiator {
        &self.negotiator
    }

    /// The handle of whichever timer is armed.
    pub fn armed_handle(&self) -> Option<&TimerHandle> {
        self.refresh_handle.as_ref().or(self.expiry_handle.as_ref())
    }
}

impl fmt::Debug for SessionTimerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTimerContext")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("negotiated_interval", &self.negotiated_interval)
            .field("refresher", &self.refresher)
            .field("enabled", &self.enabled)
            .field("refresh_handle", &self.refresh_handle)
            .field("expiry_handle", &self.expiry_handle)
            .field("dialog_id", &self.dialog_id)
            .finish()
    }
}

fn session_expires_value(interval: u32, refresher: Option<RefresherRole>) -> String {
    match SessionExpires::new(interval) {
        Ok(se) => se.with_optional_refresher(refresher).to_string(),
        Err(err) => {
            warn!(error = %err, interval, "session interval out of range");
            interval.to_string()
        }
    }
}
