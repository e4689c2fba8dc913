// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Caller and callee negotiating session timers against each other.
//!
//! Each side owns its own dialog manager and manual scheduler, the way two
//! separate user agents would.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use sip_core::{Method, SipUri};
use sip_dialog::{
    DialogId, DialogManager, ManualScheduler, RefresherPreference, SessionTimerConfig,
    SessionTimerFailure, SessionTimerKind, SessionTimerOutcome, SupportLevel,
};
use sip_parse::{header, parse_min_se, parse_session_expires};
use sip_testkit::{build_invite, with_headers};
use sip_uac::{InviteOutcome, UserAgentClient};
use sip_uas::UserAgentServer;

struct Side {
    dialogs: Arc<DialogManager>,
    scheduler: Arc<ManualScheduler>,
}

impl Side {
    fn new() -> Self {
        Self {
            dialogs: Arc::new(DialogManager::new()),
            scheduler: Arc::new(ManualScheduler::default()),
        }
    }

    fn uac(&self, config: SessionTimerConfig) -> UserAgentClient {
        UserAgentClient::new(
            uri("sip:alice@example.com"),
            uri("sip:alice@client.example.com"),
            self.dialogs.clone(),
            self.scheduler.clone(),
        )
        .with_session_timer_config(config)
        .unwrap()
    }

    fn uas(&self, config: SessionTimerConfig) -> UserAgentServer {
        UserAgentServer::new(
            uri("sip:bob@example.com"),
            uri("sip:bob@server.example.com"),
            self.dialogs.clone(),
            self.scheduler.clone(),
        )
        .with_session_timer_config(config)
        .unwrap()
    }
}

fn uri(s: &str) -> SipUri {
    SipUri::parse(s).unwrap()
}

fn supported() -> SessionTimerConfig {
    SessionTimerConfig::default().with_support_level(SupportLevel::Supported)
}

fn established(outcome: InviteOutcome) -> DialogId {
    match outcome {
        InviteOutcome::Established {
            dialog_id,
            timers_armed: true,
        } => dialog_id,
        other => panic!("expected an established dialog with timers, got {:?}", other),
    }
}

#[test]
fn callee_refreshes_by_default() {
    let (caller, callee) = (Side::new(), Side::new());
    let uac = caller.uac(supported());
    let uas = callee.uas(supported());

    let invitation = uac.invite(&uri("sip:bob@example.com"), None).unwrap();
    let answer = uas.answer_invite(&invitation.request, None).unwrap();
    assert_eq!(
        header(answer.response.headers(), "Session-Expires").unwrap(),
        "1800;refresher=uas"
    );

    let caller_id = established(uac.process_invite_response(invitation, &answer.response).unwrap());
    let callee_id = answer.dialog_id.unwrap();

    assert_eq!(
        caller.scheduler.armed(&caller_id),
        Some((SessionTimerKind::Expiry, Duration::from_secs(1768)))
    );
    assert_eq!(
        callee.scheduler.armed(&callee_id),
        Some((SessionTimerKind::Refresh, Duration::from_secs(900)))
    );
    assert_eq!(caller_id.local_tag, callee_id.remote_tag);
    assert_eq!(caller_id.remote_tag, callee_id.local_tag);
}

#[test]
fn interval_too_small_is_retried_once() {
    let (caller, callee) = (Side::new(), Side::new());
    let uac = caller.uac(supported());
    let uas = callee.uas(
        supported()
            .with_default_interval(3600)
            .and_then(|c| c.with_min_interval(3600))
            .unwrap(),
    );

    let invitation = uac.invite(&uri("sip:bob@example.com"), None).unwrap();
    let first = invitation.request.clone();
    let rejected = uas.answer_invite(&first, None).unwrap();
    assert_eq!(rejected.response.code(), 422);
    assert_eq!(
        parse_min_se(rejected.response.headers()).unwrap().unwrap().delta_seconds(),
        3600
    );

    let InviteOutcome::Retry(retry) =
        uac.process_invite_response(invitation, &rejected.response).unwrap()
    else {
        panic!("expected a retry");
    };
    let (old, new) = (first.headers(), retry.request.headers());
    assert_eq!(header(old, "Call-ID"), header(new, "Call-ID"));
    assert_eq!(header(old, "From"), header(new, "From"));
    assert_ne!(header(old, "Via"), header(new, "Via"));
    assert_eq!(header(new, "CSeq").unwrap(), "2 INVITE");
    assert_eq!(
        parse_session_expires(new).unwrap().unwrap().delta_seconds(),
        3600
    );
    assert_eq!(parse_min_se(new).unwrap().unwrap().delta_seconds(), 3600);

    let accepted = uas.answer_invite(&retry.request, None).unwrap();
    assert_eq!(accepted.response.code(), 200);
    let caller_id = established(uac.process_invite_response(retry, &accepted.response).unwrap());
    assert_eq!(
        caller.scheduler.armed(&caller_id),
        Some((SessionTimerKind::Expiry, Duration::from_secs(3568)))
    );
}

#[test]
fn second_422_fails_the_call() {
    let caller = Side::new();
    let uac = caller.uac(supported());

    let invitation = uac.invite(&uri("sip:bob@example.com"), None).unwrap();
    let too_small =
        UserAgentServer::create_session_interval_too_small(&invitation.request, 3600).unwrap();
    let InviteOutcome::Retry(retry) = uac.process_invite_response(invitation, &too_small).unwrap()
    else {
        panic!("expected a retry");
    };

    let again = UserAgentServer::create_session_interval_too_small(&retry.request, 7200).unwrap();
    match uac.process_invite_response(retry, &again).unwrap() {
        InviteOutcome::Failed { code, failure } => {
            assert_eq!(code, 422);
            assert_eq!(failure, Some(SessionTimerFailure::NegotiationFailed));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(caller.dialogs.count(), 0);
}

#[test]
fn required_timer_meets_disabled_callee() {
    let (caller, callee) = (Side::new(), Side::new());
    let uac = caller.uac(SessionTimerConfig::default().with_support_level(SupportLevel::Required));
    let uas = callee.uas(SessionTimerConfig::default());

    let invitation = uac.invite(&uri("sip:bob@example.com"), None).unwrap();
    let answer = uas.answer_invite(&invitation.request, None).unwrap();
    assert_eq!(answer.response.code(), 420);
    assert_eq!(header(answer.response.headers(), "Unsupported").unwrap(), "timer");

    match uac.process_invite_response(invitation, &answer.response).unwrap() {
        InviteOutcome::Failed { code, failure } => {
            assert_eq!(code, 420);
            assert_eq!(failure, Some(SessionTimerFailure::UnsupportedByPeer));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn callee_refresh_rearms_caller_watchdog() {
    let (caller, callee) = (Side::new(), Side::new());
    let uac = caller.uac(supported());
    let caller_server = caller.uas(supported());
    let uas = callee.uas(supported());
    let callee_client = callee.uac(supported());

    let invitation = uac.invite(&uri("sip:bob@example.com"), None).unwrap();
    let answer = uas.answer_invite(&invitation.request, None).unwrap();
    let caller_id = established(uac.process_invite_response(invitation, &answer.response).unwrap());
    let callee_id = answer.dialog_id.unwrap();
    let watchdog = caller.scheduler.handle(&caller_id).unwrap();

    let event = callee.scheduler.fire(&callee_id).unwrap();
    let Some(SessionTimerOutcome::Refresh(plan)) = callee.dialogs.handle_timer_event(&event) else {
        panic!("expected a refresh plan");
    };
    assert_eq!(plan.method, Method::Update);
    let update = callee
        .dialogs
        .with_dialog_mut(&callee_id, |dialog| {
            callee_client.create_session_refresh(dialog, &plan)
        })
        .unwrap()
        .unwrap();
    assert_eq!(header(update.headers(), "Session-Expires").unwrap(), "1800;refresher=uac");
    assert_eq!(
        header(update.headers(), "Contact").unwrap(),
        "<sip:bob@server.example.com>"
    );

    let ok = caller_server.answer_refresh(&update).unwrap();
    assert_eq!(ok.code(), 200);
    assert_eq!(header(ok.headers(), "Require").unwrap(), "timer");

    let rearmed = caller.scheduler.handle(&caller_id).unwrap();
    assert_ne!(rearmed.generation(), watchdog.generation());
    assert_eq!(
        caller.scheduler.armed(&caller_id),
        Some((SessionTimerKind::Expiry, Duration::from_secs(1768)))
    );

    let outcome = callee
        .dialogs
        .with_dialog_mut(&callee_id, |dialog| {
            dialog
                .session_timer
                .on_refresh_response(Ok(&ok), callee.scheduler.as_ref())
        })
        .unwrap();
    assert!(matches!(
        outcome,
        sip_dialog::RefreshOutcome::Refreshed { interval: 1800, .. }
    ));
    assert_eq!(
        callee.scheduler.armed(&callee_id),
        Some((SessionTimerKind::Refresh, Duration::from_secs(900)))
    );
}

#[test]
fn caller_preference_makes_callee_require_timer() {
    let (caller, callee) = (Side::new(), Side::new());
    let uac = caller.uac(supported().with_refresher_preference(RefresherPreference::LocalPreferred));
    let uas = callee.uas(supported());

    let invitation = uac.invite(&uri("sip:bob@example.com"), None).unwrap();
    let answer = uas.answer_invite(&invitation.request, None).unwrap();
    assert_eq!(
        header(answer.response.headers(), "Session-Expires").unwrap(),
        "1800;refresher=uac"
    );
    assert_eq!(header(answer.response.headers(), "Require").unwrap(), "timer");

    let caller_id = established(uac.process_invite_response(invitation, &answer.response).unwrap());
    assert_eq!(
        caller.scheduler.armed(&caller_id),
        Some((SessionTimerKind::Refresh, Duration::from_secs(900)))
    );
}

proptest! {
    #[test]
    fn proposal_below_floor_is_always_422(min in 90u32..=3600, below in 1u32..90) {
        let proposal = min.saturating_sub(below).max(1);
        let callee = Side::new();
        let uas = callee.uas(
            supported()
                .with_default_interval(3600)
                .and_then(|c| c.with_min_interval(min))
                .unwrap(),
        );
        let session_expires = proposal.to_string();
        let invite = with_headers(
            build_invite("sip:bob@example.com", "z9hG4bKprop", "call-prop@example.com"),
            &[("Supported", "timer"), ("Session-Expires", &session_expires)],
        );

        let answer = uas.answer_invite(&invite, None).unwrap();
        prop_assert_eq!(answer.response.code(), 422);
        prop_assert_eq!(
            parse_min_se(answer.response.headers()).unwrap().unwrap().delta_seconds(),
            min
        );
        prop_assert!(answer.dialog_id.is_none());
    }
}
