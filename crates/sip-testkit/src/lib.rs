// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request and response builders for session timer tests.
//!
//! Every builder produces a message as alice (`tag=1234`) calling bob
//! (`tag=5678` once the dialog exists). Extra headers such as
//! `Session-Expires` are added with [`with_headers`] and
//! [`response_with_headers`].
//!
//! # Example
//! ```
//! use sip_testkit::{build_invite, with_headers};
//! let req = with_headers(
//!     build_invite("sip:bob@example.com", "z9hG4bKinv1", "call-1@example.com"),
//!     &[("Supported", "timer"), ("Session-Expires", "1800")],
//! );
//! assert_eq!(req.method().as_str(), "INVITE");
//! assert_eq!(req.headers().get("Session-Expires").unwrap(), "1800");
//! ```

use bytes::Bytes;
use sip_core::{Headers, Method, Request, RequestLine, Response, SipUri, StatusLine};
use sip_parse::{header, serialize_request, serialize_response};
use smol_str::SmolStr;

/// From tag used by every builder.
pub const CALLER_TAG: &str = "1234";

/// To tag the callee puts on its responses and in-dialog requests.
pub const CALLEE_TAG: &str = "5678";

fn caller_headers(method: &Method, branch: &str, call_id: &str, cseq: u32) -> Headers {
    let mut headers = Headers::new();
    headers.push(
        SmolStr::new("Via"),
        SmolStr::new(format!(
            "SIP/2.0/UDP client.example.com:5060;branch={}",
            branch
        )),
    );
    headers.push(
        SmolStr::new("From"),
        SmolStr::new(format!("<sip:alice@example.com>;tag={}", CALLER_TAG)),
    );
    headers.push(SmolStr::new("To"), SmolStr::new("<sip:bob@example.com>"));
    headers.push(SmolStr::new("Call-ID"), SmolStr::new(call_id));
    headers.push(
        SmolStr::new("CSeq"),
        SmolStr::new(format!("{} {}", cseq, method.as_str())),
    );
    headers.push(SmolStr::new("Max-Forwards"), SmolStr::new("70"));
    headers.push(
        SmolStr::new("Contact"),
        SmolStr::new("<sip:alice@client.example.com:5060>"),
    );
    headers
}

/// Constructs a minimal INVITE request for the provided URI string.
pub fn build_invite(uri: &str, branch: &str, call_id: &str) -> Request {
    Request::new(
        RequestLine::new(Method::Invite, SipUri::parse(uri).unwrap()),
        caller_headers(&Method::Invite, branch, call_id, 1),
        Bytes::new(),
    )
    .unwrap()
}

/// Constructs an in-dialog request from the caller (To carries the callee
/// tag), e.g. an UPDATE or re-INVITE session refresh.
pub fn build_in_dialog(method: Method, uri: &str, call_id: &str, cseq: u32) -> Request {
    let branch = format!("z9hG4bK{}{}", method.as_str().to_ascii_lowercase(), cseq);
    let mut headers = caller_headers(&method, &branch, call_id, cseq);
    headers.set(
        SmolStr::new("To"),
        SmolStr::new(format!("<sip:bob@example.com>;tag={}", CALLEE_TAG)),
    );
    Request::new(
        RequestLine::new(method, SipUri::parse(uri).unwrap()),
        headers,
        Bytes::new(),
    )
    .unwrap()
}

/// Constructs an UPDATE on the dialog identified by `call_id`.
pub fn build_update(uri: &str, call_id: &str, cseq: u32) -> Request {
    build_in_dialog(Method::Update, uri, call_id, cseq)
}

/// Constructs a minimal response with the given status code.
pub fn build_response(code: u16, reason: &str) -> Response {
    let mut headers = Headers::new();
    headers.push(
        SmolStr::new("Via"),
        SmolStr::new("SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKtest"),
    );
    headers.push(
        SmolStr::new("From"),
        SmolStr::new(format!("<sip:alice@example.com>;tag={}", CALLER_TAG)),
    );
    headers.push(
        SmolStr::new("To"),
        SmolStr::new(format!("<sip:bob@example.com>;tag={}", CALLEE_TAG)),
    );
    headers.push(
        SmolStr::new("Call-ID"),
        SmolStr::new("test-callid@example.com"),
    );
    headers.push(SmolStr::new("CSeq"), SmolStr::new("1 INVITE"));

    Response::new(
        StatusLine::new(code, reason).unwrap(),
        headers,
        Bytes::new(),
    )
    .unwrap()
}

/// Answers `request` the way the callee would: Via, From, Call-ID and CSeq
/// copied, the callee tag added to To for anything but 100, and a Contact on
/// 2xx.
pub fn response_to(request: &Request, code: u16) -> Response {
    let mut headers = Headers::new();
    for name in ["Via", "From", "Call-ID", "CSeq"] {
        if let Some(value) = header(request.headers(), name) {
            headers.push(SmolStr::new(name), value.clone());
        }
    }
    if let Some(to) = header(request.headers(), "To") {
        let to = if code > 100 && !to.contains("tag=") {
            SmolStr::new(format!("{};tag={}", to, CALLEE_TAG))
        } else {
            to.clone()
        };
        headers.push(SmolStr::new("To"), to);
    }
    if (200..300).contains(&code) {
        headers.push(
            SmolStr::new("Contact"),
            SmolStr::new("<sip:bob@server.example.com:5060>"),
        );
    }

    Response::new(StatusLine::for_code(code).unwrap(), headers, Bytes::new()).unwrap()
}

/// Appends `extra` headers to a request.
pub fn with_headers(mut request: Request, extra: &[(&str, &str)]) -> Request {
    for (name, value) in extra {
        request
            .headers_mut()
            .push(SmolStr::new(name), SmolStr::new(value));
    }
    request
}

/// Appends `extra` headers to a response.
pub fn response_with_headers(mut response: Response, extra: &[(&str, &str)]) -> Response {
    for (name, value) in extra {
        response
            .headers_mut()
            .push(SmolStr::new(name), SmolStr::new(value));
    }
    response
}

/// Serializes a request to bytes for transport-layer testing.
pub fn as_bytes(request: &Request) -> Bytes {
    serialize_request(request)
}

/// Serializes a response to bytes for transport-layer testing.
pub fn response_as_bytes(response: &Response) -> Bytes {
    serialize_response(response)
}

/// End-to-end helper: an INVITE offering timers and the 200 OK that accepts
/// them with the callee as refresher.
pub fn scenario_session_timer_invite(target: &str, interval: u32) -> (Request, Response) {
    let session_expires = interval.to_string();
    let invite = with_headers(
        build_invite(target, "z9hG4bKst1", "call-timer@example.com"),
        &[
            ("Supported", "timer"),
            ("Session-Expires", &session_expires),
            ("Min-SE", "90"),
        ],
    );
    let answered = format!("{};refresher=uas", interval);
    let ok = response_with_headers(
        response_to(&invite, 200),
        &[("Supported", "timer"), ("Session-Expires", &answered)],
    );
    (invite, ok)
}
