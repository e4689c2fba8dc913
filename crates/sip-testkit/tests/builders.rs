// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use sip_core::Method;
use sip_parse::{header, parse_request, parse_response, parse_session_expires};
use sip_testkit::{
    as_bytes, build_invite, build_update, response_as_bytes, response_to,
    scenario_session_timer_invite, CALLEE_TAG,
};

#[test]
fn invite_survives_the_wire() {
    let invite = build_invite("sip:bob@example.com", "z9hG4bKa", "call-a@example.com");
    let parsed = parse_request(&as_bytes(&invite)).expect("INVITE should parse");

    assert_eq!(parsed.method(), &Method::Invite);
    assert_eq!(parsed.uri().as_str(), "sip:bob@example.com");
    assert_eq!(header(parsed.headers(), "CSeq").unwrap(), "1 INVITE");
}

#[test]
fn update_is_in_dialog() {
    let update = build_update("sip:bob@example.com", "call-a@example.com", 2);
    let parsed = parse_request(&as_bytes(&update)).expect("UPDATE should parse");

    assert_eq!(parsed.method(), &Method::Update);
    assert!(header(parsed.headers(), "To").unwrap().ends_with(CALLEE_TAG));
    assert_eq!(header(parsed.headers(), "CSeq").unwrap(), "2 UPDATE");
}

#[test]
fn response_copies_dialog_headers() {
    let invite = build_invite("sip:bob@example.com", "z9hG4bKa", "call-a@example.com");
    let ok = response_to(&invite, 200);
    let parsed = parse_response(&response_as_bytes(&ok)).expect("200 should parse");

    assert_eq!(parsed.code(), 200);
    assert_eq!(header(parsed.headers(), "Call-ID").unwrap(), "call-a@example.com");
    assert!(header(parsed.headers(), "To").unwrap().contains("tag=5678"));
    assert!(parsed.headers().contains("Contact"));

    let trying = response_to(&invite, 100);
    assert!(!header(trying.headers(), "To").unwrap().contains("tag="));
}

#[test]
fn session_timer_scenario_carries_interval_both_ways() {
    let (invite, ok) = scenario_session_timer_invite("sip:bob@example.com", 1800);
    let offered = parse_session_expires(invite.headers()).unwrap().unwrap();
    let answered = parse_session_expires(ok.headers()).unwrap().unwrap();

    assert_eq!(offered.delta_seconds(), 1800);
    assert_eq!(offered.refresher(), None);
    assert_eq!(answered.delta_seconds(), 1800);
    assert_eq!(answered.refresher(), Some(sip_core::RefresherRole::Uas));
}
