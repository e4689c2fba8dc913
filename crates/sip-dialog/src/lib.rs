// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP dialogs with RFC 4028 session timers.
//!
//! A [`Dialog`] carries only what session timers need from RFC 3261 §12:
//! its id, remote target, CSeq spaces and one [`SessionTimerContext`]. The
//! [`DialogManager`] owns every dialog; timer events coming back from a
//! [`TimerScheduler`] are routed to the right context by dialog id. Access
//! to one dialog goes through its map entry lock, which is what keeps a
//! timer fire and an incoming refresh for the same dialog from interleaving.
//!
//! # Example
//! ```no_run
//! use sip_dialog::{Dialog, DialogManager};
//! use sip_dialog::session_timer::SessionTimerContext;
//! use sip_dialog::session_timer_config::SessionTimerConfig;
//! use sip_dialog::session_timer_manager::SessionTimerManager;
//! # use sip_core::{SipUri, Request, Response};
//! let manager = DialogManager::new();
//! let scheduler = SessionTimerManager::new();
//! # let req: Request = todo!();
//! # let resp: Response = todo!();
//! let local_uri = SipUri::parse("sip:alice@example.com").unwrap();
//! let remote_uri = SipUri::parse("sip:bob@example.com").unwrap();
//! let mut timers = SessionTimerContext::new_uac(
//!     SessionTimerConfig::default(),
//!     sip_observe::noop_observer(),
//! );
//! timers.on_response(&resp);
//! if let Some(dialog) = Dialog::new_uac(&req, &resp, local_uri, remote_uri, timers) {
//!     let id = dialog.id.clone();
//!     manager.insert(dialog);
//!     manager.arm_session_timer(&id, &scheduler);
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use sip_core::{Headers, Method, Request, Response, SipUri};
use sip_parse::header;
use smol_str::SmolStr;
use tracing::debug;

pub mod capability;
pub mod error;
pub mod interval;
pub mod metrics;
pub mod refresher;
pub mod session_timer;
pub mod session_timer_config;
pub mod session_timer_manager;

pub use error::{SessionTimerFailure, TransactionError};
pub use metrics::{SessionTimerMetrics, SessionTimerMetricsSnapshot};
pub use refresher::Refresher;
pub use session_timer::{
    NegotiationOutcome, NegotiationState, RefreshOutcome, RefreshPlan, RequestOutcome,
    SessionTimerContext, SessionTimerOutcome,
};
pub use session_timer_config::{RefresherPreference, SessionTimerConfig, SupportLevel};
pub use session_timer_manager::{
    ManualScheduler, SessionTimerEvent, SessionTimerKind, SessionTimerManager, TimerHandle,
    TimerScheduler,
};

/// Dialog state per RFC 3261 §12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogStateType {
    /// Early dialog established by provisional response (1xx with tag)
    Early,
    /// Confirmed dialog established by 2xx response
    Confirmed,
    /// Dialog terminated by BYE, session expiry or error
    Terminated,
}

/// Unique dialog identifier composed of Call-ID and local/remote tags (RFC 3261 §12).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: SmolStr,
    pub local_tag: SmolStr,
    pub remote_tag: SmolStr,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<SmolStr>,
        local_tag: impl Into<SmolStr>,
        remote_tag: impl Into<SmolStr>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Id of the dialog an incoming in-dialog request belongs to, seen from
    /// our side: the request's To tag is ours, its From tag is the peer's.
    pub fn for_incoming_request(req: &Request) -> Option<Self> {
        let call_id = header(req.headers(), "Call-ID")?.clone();
        let from_tag = extract_tag(header(req.headers(), "From")?)?;
        let to_tag = extract_tag(header(req.headers(), "To")?)?;
        Some(Self::new(call_id, to_tag, from_tag))
    }

    /// From the UAC side of a response: From tag is local, To tag is remote.
    pub fn from_response_uac(resp: &Response) -> Option<Self> {
        let call_id = header(resp.headers(), "Call-ID")?.clone();
        let from_tag = extract_tag(header(resp.headers(), "From")?)?;
        let to_tag = extract_tag(header(resp.headers(), "To")?)?;
        Some(Self::new(call_id, from_tag, to_tag))
    }

    /// From the UAS side of a response: To tag is local, From tag is remote.
    pub fn from_response_uas(resp: &Response) -> Option<Self> {
        let call_id = header(resp.headers(), "Call-ID")?.clone();
        let to_tag = extract_tag(header(resp.headers(), "To")?)?;
        let from_tag = extract_tag(header(resp.headers(), "From")?)?;
        Some(Self::new(call_id, to_tag, from_tag))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};local={};remote={}",
            self.call_id, self.local_tag, self.remote_tag
        )
    }
}

/// Dialog state as far as session timers need it.
#[derive(Debug)]
pub struct Dialog {
    pub id: DialogId,
    pub state: DialogStateType,
    /// Remote target URI (Contact of the peer); refreshes are sent here.
    pub remote_target: SipUri,
    /// Our Contact for this dialog, repeated in target refresh requests.
    pub local_contact: SipUri,
    /// Local CSeq number (incremented for each request we send)
    pub local_cseq: u32,
    /// Remote CSeq number (tracked from requests we receive)
    pub remote_cseq: u32,
    pub local_uri: SipUri,
    pub remote_uri: SipUri,
    /// Whether we are the UAC (caller) or UAS (callee)
    pub is_uac: bool,
    pub session_timer: SessionTimerContext,
}

impl Dialog {
    /// Creates a dialog from the UAC perspective (we sent the INVITE).
    ///
    /// Returns `None` for a final failure response or when the dialog
    /// identifying headers are missing.
    pub fn new_uac(
        req: &Request,
        resp: &Response,
        local_uri: SipUri,
        remote_uri: SipUri,
        session_timer: SessionTimerContext,
    ) -> Option<Self> {
        let id = DialogId::from_response_uac(resp)?;
        let state = state_for(resp.code())?;
        let remote_target =
            extract_contact_uri(resp.headers()).unwrap_or_else(|| remote_uri.clone());
        let local_contact =
            extract_contact_uri(req.headers()).unwrap_or_else(|| local_uri.clone());
        let local_cseq = parse_cseq_number(req.headers())?;

        Some(Self {
            id,
            state,
            remote_target,
            local_contact,
            local_cseq,
            remote_cseq: 0,
            local_uri,
            remote_uri,
            is_uac: true,
            session_timer,
        })
    }

    /// Creates a dialog from the UAS perspective (we received the INVITE).
    pub fn new_uas(
        req: &Request,
        resp: &Response,
        local_uri: SipUri,
        remote_uri: SipUri,
        session_timer: SessionTimerContext,
    ) -> Option<Self> {
        let id = DialogId::from_response_uas(resp)?;
        let state = state_for(resp.code())?;
        let remote_target =
            extract_contact_uri(req.headers()).unwrap_or_else(|| remote_uri.clone());
        let local_contact =
            extract_contact_uri(resp.headers()).unwrap_or_else(|| local_uri.clone());
        let remote_cseq = parse_cseq_number(req.headers())?;

        Some(Self {
            id,
            state,
            remote_target,
            local_contact,
            local_cseq: 0,
            remote_cseq,
            local_uri,
            remote_uri,
            is_uac: false,
            session_timer,
        })
    }

    /// Returns the next CSeq number to use for outgoing requests.
    pub fn next_local_cseq(&mut self) -> u32 {
        self.local_cseq += 1;
        self.local_cseq
    }

    /// Validates and records an incoming in-dialog request.
    ///
    /// CSeq must increase for everything but ACK, which reuses the INVITE's
    /// number. A Contact in a target refresh updates the remote target.
    pub fn update_from_request(&mut self, req: &Request) -> Result<(), DialogError> {
        let cseq = parse_cseq_number(req.headers()).ok_or(DialogError::MissingHeader)?;
        if cseq == 0 {
            return Err(DialogError::InvalidCSeq);
        }

        if req.method() == &Method::Ack {
            if cseq != self.remote_cseq || self.remote_cseq == 0 {
                return Err(DialogError::InvalidCSeq);
            }
            return Ok(());
        }
        if cseq <= self.remote_cseq {
            return Err(DialogError::InvalidCSeq);
        }
        self.remote_cseq = cseq;

        if req.method().can_refresh_session() {
            if let Some(contact) = extract_contact_uri(req.headers()) {
                self.remote_target = contact;
            }
        }
        Ok(())
    }

    /// Returns true if this dialog matches the given request.
    pub fn matches_request(&self, req: &Request) -> bool {
        DialogId::for_incoming_request(req).as_ref() == Some(&self.id)
    }
}

/// Dialog manager for tracking active dialogs.
#[derive(Debug, Clone, Default)]
pub struct DialogManager {
    dialogs: Arc<DashMap<DialogId, Dialog>>,
}

impl DialogManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a dialog.
    pub fn insert(&self, dialog: Dialog) {
        debug!(dialog = %dialog.id, "dialog stored");
        self.dialogs.insert(dialog.id.clone(), dialog);
    }

    pub fn contains(&self, id: &DialogId) -> bool {
        self.dialogs.contains_key(id)
    }

    /// Runs `f` with shared access to a dialog.
    pub fn with_dialog<R>(&self, id: &DialogId, f: impl FnOnce(&Dialog) -> R) -> Option<R> {
        self.dialogs.get(id).map(|dialog| f(&dialog))
    }

    /// Runs `f` with exclusive access to a dialog. Calls for the same dialog
    /// are serialised.
    pub fn with_dialog_mut<R>(
        &self,
        id: &DialogId,
        f: impl FnOnce(&mut Dialog) -> R,
    ) -> Option<R> {
        self.dialogs.get_mut(id).map(|mut dialog| f(&mut dialog))
    }

    /// Finds the dialog an incoming in-dialog request belongs to.
    pub fn find_id_by_request(&self, req: &Request) -> Option<DialogId> {
        DialogId::for_incoming_request(req).filter(|id| self.dialogs.contains_key(id))
    }

    /// Ends a dialog: disarms its session timers, marks it terminated and
    /// hands it back to the caller.
    pub fn terminate(&self, id: &DialogId, scheduler: &dyn TimerScheduler) -> Option<Dialog> {
        let (_, mut dialog) = self.dialogs.remove(id)?;
        dialog.session_timer.teardown(scheduler);
        dialog.state = DialogStateType::Terminated;
        debug!(dialog = %id, "dialog terminated");
        Some(dialog)
    }

    /// Arms the session timer of a stored dialog.
    pub fn arm_session_timer(&self, id: &DialogId, scheduler: &dyn TimerScheduler) -> bool {
        self.with_dialog_mut(id, |dialog| dialog.session_timer.arm(id, scheduler))
            .unwrap_or(false)
    }

    /// Routes a fired timer to its dialog.
    ///
    /// Returns `None` when the dialog is gone; a timer event for a dialog
    /// that was already torn down is dropped.
    pub fn handle_timer_event(&self, event: &SessionTimerEvent) -> Option<SessionTimerOutcome> {
        let outcome = self.with_dialog_mut(event.dialog_id(), |dialog| {
            dialog.session_timer.on_timer_fired(event.handle())
        });
        if outcome.is_none() {
            debug!(dialog = %event.dialog_id(), "timer event for unknown dialog dropped");
        }
        outcome
    }

    pub fn count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn all_ids(&self) -> Vec<DialogId> {
        self.dialogs.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Dialog-related errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// CSeq number is not greater than previous
    InvalidCSeq,
    /// Missing required header
    MissingHeader,
}

impl fmt::Display for DialogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogError::InvalidCSeq => write!(f, "Invalid CSeq number"),
            DialogError::MissingHeader => write!(f, "Missing required header"),
        }
    }
}

impl std::error::Error for DialogError {}

fn state_for(code: u16) -> Option<DialogStateType> {
    match code {
        101..=199 => Some(DialogStateType::Early),
        200..=299 => Some(DialogStateType::Confirmed),
        _ => None,
    }
}

/// Extracts tag parameter from From/To header value.
pub fn extract_tag(value: &SmolStr) -> Option<SmolStr> {
    value.split(';').find_map(|segment| {
        let (name, tag) = segment.trim().split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("tag")
            .then(|| SmolStr::new(tag.trim()))
    })
}

/// Extracts Contact URI from headers.
pub fn extract_contact_uri(headers: &Headers) -> Option<SipUri> {
    header(headers, "Contact").and_then(|raw| parse_uri_from_header(raw.as_str()))
}

/// Parses CSeq number from headers.
pub fn parse_cseq_number(headers: &Headers) -> Option<u32> {
    header(headers, "CSeq")?
        .split_whitespace()
        .next()?
        .parse::<u32>()
        .ok()
}

/// Parses URI from header value (handles angle brackets).
pub fn parse_uri_from_header(raw: &str) -> Option<SipUri> {
    let trimmed = raw.trim();
    let uri_part = if let Some(start) = trimmed.find('<') {
        let end = trimmed[start + 1..].find('>')?;
        &trimmed[start + 1..start + 1 + end]
    } else {
        trimmed.split(';').next()?
    };
    SipUri::parse(uri_part.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_observe::noop_observer;
    use sip_testkit::{
        build_invite, build_update, response_to, response_with_headers, CALLEE_TAG, CALLER_TAG,
    };
    use std::time::Duration;

    fn uri(s: &str) -> SipUri {
        SipUri::parse(s).unwrap()
    }

    fn timers() -> SessionTimerContext {
        SessionTimerContext::new_uac(
            SessionTimerConfig::default().with_support_level(SupportLevel::Supported),
            noop_observer(),
        )
    }

    fn uac_dialog() -> Dialog {
        let invite = build_invite("sip:bob@example.com", "z9hG4bK1", "call-1@example.com");
        let ok = response_with_headers(
            response_to(&invite, 200),
            &[("Session-Expires", "1800;refresher=uas")],
        );
        let mut timers = timers();
        timers.negotiate_outgoing();
        timers.on_response(&ok);
        Dialog::new_uac(
            &invite,
            &ok,
            uri("sip:alice@example.com"),
            uri("sip:bob@example.com"),
            timers,
        )
        .unwrap()
    }

    #[test]
    fn dialog_id_display() {
        let id = DialogId::new("abc", "l", "r");
        assert_eq!(id.to_string(), "abc;local=l;remote=r");
    }

    #[test]
    fn uac_dialog_from_2xx() {
        let dialog = uac_dialog();
        assert_eq!(dialog.id, DialogId::new("call-1@example.com", CALLER_TAG, CALLEE_TAG));
        assert_eq!(dialog.state, DialogStateType::Confirmed);
        assert_eq!(dialog.local_cseq, 1);
        assert_eq!(dialog.remote_target.as_str(), "sip:bob@server.example.com:5060");
        assert!(dialog.is_uac);
        assert_eq!(dialog.session_timer.negotiated_interval(), Some(1800));
    }

    #[test]
    fn extract_tag_skips_non_ascii_parameters() {
        let from = SmolStr::new("<sip:alice@example.com>;tagé=1;tag=1234");
        assert_eq!(extract_tag(&from), Some(SmolStr::new("1234")));
        assert_eq!(extract_tag(&SmolStr::new("<sip:a@b>;é;ta")), None);
        assert_eq!(extract_tag(&SmolStr::new("<sip:a@b>;TAG = x1")), Some(SmolStr::new("x1")));
    }

    #[test]
    fn local_contact_follows_our_side_of_the_exchange() {
        assert_eq!(
            uac_dialog().local_contact.as_str(),
            "sip:alice@client.example.com:5060"
        );

        let invite = build_invite("sip:bob@example.com", "z9hG4bK1", "call-4@example.com");
        let ok = response_to(&invite, 200);
        let callee = Dialog::new_uas(
            &invite,
            &ok,
            uri("sip:bob@example.com"),
            uri("sip:alice@example.com"),
            SessionTimerContext::new_uas(SessionTimerConfig::default(), noop_observer()),
        )
        .unwrap();
        assert_eq!(callee.local_contact.as_str(), "sip:bob@server.example.com:5060");
    }

    #[test]
    fn no_dialog_from_failure() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bK1", "call-1@example.com");
        let busy = response_to(&invite, 486);
        assert!(Dialog::new_uac(
            &invite,
            &busy,
            uri("sip:alice@example.com"),
            uri("sip:bob@example.com"),
            timers(),
        )
        .is_none());
    }

    #[test]
    fn uas_dialog_matches_in_dialog_requests() {
        let invite = build_invite("sip:bob@example.com", "z9hG4bK1", "call-2@example.com");
        let ok = response_to(&invite, 200);
        let mut dialog = Dialog::new_uas(
            &invite,
            &ok,
            uri("sip:bob@example.com"),
            uri("sip:alice@example.com"),
            SessionTimerContext::new_uas(SessionTimerConfig::default(), noop_observer()),
        )
        .unwrap();
        assert_eq!(dialog.id, DialogId::new("call-2@example.com", CALLEE_TAG, CALLER_TAG));

        let update = build_update("sip:bob@example.com", "call-2@example.com", 2);
        assert!(dialog.matches_request(&update));
        assert!(dialog.update_from_request(&update).is_ok());
        assert_eq!(dialog.remote_cseq, 2);
        assert_eq!(
            dialog.update_from_request(&update),
            Err(DialogError::InvalidCSeq)
        );
    }

    #[test]
    fn manager_routes_timer_events() {
        let manager = DialogManager::new();
        let scheduler = ManualScheduler::new();
        let dialog = uac_dialog();
        let id = dialog.id.clone();
        manager.insert(dialog);

        assert!(manager.arm_session_timer(&id, &scheduler));
        assert_eq!(
            scheduler.armed(&id),
            Some((SessionTimerKind::Expiry, Duration::from_secs(1768)))
        );

        let event = scheduler.fire(&id).unwrap();
        assert_eq!(
            manager.handle_timer_event(&event),
            Some(SessionTimerOutcome::Expired(
                SessionTimerFailure::ExpiryWatchdogFired
            ))
        );
        assert_eq!(
            manager.handle_timer_event(&event),
            Some(SessionTimerOutcome::Ignored)
        );
    }

    #[test]
    fn terminate_disarms_and_late_events_are_dropped() {
        let manager = DialogManager::new();
        let scheduler = ManualScheduler::new();
        let dialog = uac_dialog();
        let id = dialog.id.clone();
        manager.insert(dialog);
        manager.arm_session_timer(&id, &scheduler);
        let late = SessionTimerEvent::SessionExpired(scheduler.handle(&id).unwrap());

        let ended = manager.terminate(&id, &scheduler).unwrap();
        assert_eq!(ended.state, DialogStateType::Terminated);
        assert_eq!(ended.session_timer.state(), NegotiationState::Terminated);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(manager.count(), 0);
        assert_eq!(manager.handle_timer_event(&late), None);
    }

    #[test]
    fn find_id_by_request_uses_reversed_tags() {
        let manager = DialogManager::new();
        let invite = build_invite("sip:bob@example.com", "z9hG4bK1", "call-3@example.com");
        let ok = response_to(&invite, 200);
        let dialog = Dialog::new_uas(
            &invite,
            &ok,
            uri("sip:bob@example.com"),
            uri("sip:alice@example.com"),
            SessionTimerContext::new_uas(SessionTimerConfig::default(), noop_observer()),
        )
        .unwrap();
        let id = dialog.id.clone();
        manager.insert(dialog);

        let update = build_update("sip:bob@example.com", "call-3@example.com", 2);
        assert_eq!(manager.find_id_by_request(&update), Some(id));
        let stranger = build_update("sip:bob@example.com", "other@example.com", 2);
        assert_eq!(manager.find_id_by_request(&stranger), None);
    }
}
