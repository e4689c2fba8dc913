// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire codec and structured header access.
//!
//! Header lookups go through [`header`] and [`header_values`], which resolve
//! RFC 3261 compact forms in both directions, so a message carrying `x: 1800`
//! answers to `Session-Expires` and vice versa.

use bytes::{Bytes, BytesMut};
use sip_core::{Headers, Method, Request, RequestLine, Response, SipUri, SipVersion, StatusLine};
use smol_str::SmolStr;
use tracing::trace;

mod typed_headers;

pub use typed_headers::{
    parse_allow, parse_min_se, parse_require, parse_session_expires, parse_supported,
    parse_unsupported, token_list,
};

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Full name / compact form pairs (RFC 3261 §7.3.3, RFC 4028 §4).
const COMPACT_FORMS: [(&str, &str); 9] = [
    ("Call-ID", "i"),
    ("Contact", "m"),
    ("Content-Length", "l"),
    ("Content-Type", "c"),
    ("From", "f"),
    ("Session-Expires", "x"),
    ("Supported", "k"),
    ("To", "t"),
    ("Via", "v"),
];

/// Parses a SIP request from raw bytes.
pub fn parse_request(datagram: &Bytes) -> Option<Request> {
    if datagram.len() > DEFAULT_MAX_MESSAGE_SIZE {
        return None;
    }
    let (head, body) = split_head_body(datagram)?;
    let mut lines = head.split("\r\n");
    let (method, uri) = parse_request_line(lines.next()?)?;
    let headers = parse_headers(lines)?;
    if !cseq_matches(&headers, &method) {
        trace!(method = %method, "CSeq method does not match request line");
        return None;
    }
    let body = extract_body(body, &headers)?;
    Request::new(RequestLine::new(method, uri), headers, body).ok()
}

/// Parses a SIP response from raw bytes.
pub fn parse_response(datagram: &Bytes) -> Option<Response> {
    if datagram.len() > DEFAULT_MAX_MESSAGE_SIZE {
        return None;
    }
    let (head, body) = split_head_body(datagram)?;
    let mut lines = head.split("\r\n");
    let status = parse_status_line(lines.next()?)?;
    let headers = parse_headers(lines)?;
    let body = extract_body(body, &headers)?;
    Response::new(status, headers, body).ok()
}

/// Serializes a request, rewriting `Content-Length` to match the body.
pub fn serialize_request(req: &Request) -> Bytes {
    let start = format!(
        "{} {} {}",
        req.method(),
        req.uri(),
        req.start_line().version()
    );
    serialize(&start, req.headers(), req.body())
}

/// Serializes a response, rewriting `Content-Length` to match the body.
pub fn serialize_response(res: &Response) -> Bytes {
    let start = format!(
        "{} {} {}",
        res.start_line().version(),
        res.code(),
        res.reason()
    );
    serialize(&start, res.headers(), res.body())
}

fn serialize(start: &str, headers: &Headers, body: &Bytes) -> Bytes {
    use std::fmt::Write;

    let mut buf = String::with_capacity(512);
    let _ = write!(buf, "{}\r\n", start);
    for h in headers.iter() {
        if same_header(&h.name, "Content-Length") {
            continue;
        }
        let _ = write!(buf, "{}: {}\r\n", h.name, h.value.trim());
    }
    let _ = write!(buf, "Content-Length: {}\r\n\r\n", body.len());

    let mut out = BytesMut::with_capacity(buf.len() + body.len());
    out.extend_from_slice(buf.as_bytes());
    out.extend_from_slice(body);
    out.freeze()
}

/// Returns the first value for `name`, matching its compact form too.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a SmolStr> {
    headers
        .iter()
        .find(|h| same_header(&h.name, name))
        .map(|h| &h.value)
}

/// Returns every value for `name` in message order, matching its compact form too.
pub fn header_values<'a>(
    headers: &'a Headers,
    name: &'a str,
) -> impl Iterator<Item = &'a SmolStr> + 'a {
    headers
        .iter()
        .filter(move |h| same_header(&h.name, name))
        .map(|h| &h.value)
}

/// Replaces every value of `name`, including lines sent under its compact
/// form, with a single full-name header.
pub fn set_header(headers: &mut Headers, name: &str, value: impl Into<SmolStr>) {
    let full = canonical_header_name(name);
    if let Some((_, compact)) = COMPACT_FORMS
        .iter()
        .find(|(long, _)| long.eq_ignore_ascii_case(full))
    {
        headers.remove(compact);
    }
    headers.set(full, value);
}

/// Expands a compact header name to its full form; other names pass through.
pub fn canonical_header_name(name: &str) -> &str {
    COMPACT_FORMS
        .iter()
        .find(|(_, compact)| compact.eq_ignore_ascii_case(name))
        .map_or(name, |(full, _)| *full)
}

fn same_header(a: &str, b: &str) -> bool {
    canonical_header_name(a).eq_ignore_ascii_case(canonical_header_name(b))
}

fn parse_request_line(line: &str) -> Option<(Method, SipUri)> {
    use nom::{
        bytes::complete::take_while1, character::complete::space1, combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<_>>(is_token_char),
        space1::<_, nom::error::Error<_>>,
        take_while1::<_, _, nom::error::Error<_>>(|c: char| !c.is_whitespace()),
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (method, _, uri, _, version)) = parser(line.trim()).ok()?;
    SipVersion::from_token(version)?;
    Some((Method::from_token(method), SipUri::parse(uri)?))
}

fn parse_status_line(line: &str) -> Option<StatusLine> {
    use nom::{
        bytes::complete::tag_no_case,
        character::complete::{space1, u16 as nom_u16},
        combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        tag_no_case::<_, _, nom::error::Error<_>>("SIP/2.0"),
        space1::<_, nom::error::Error<_>>,
        nom_u16::<_, nom::error::Error<_>>,
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (_, _, code, _, reason)) = parser(line.trim()).ok()?;
    StatusLine::new(code, reason.trim()).ok()
}

fn split_head_body(datagram: &Bytes) -> Option<(&str, &[u8])> {
    let data = datagram.as_ref();
    let delim = b"\r\n\r\n";
    match data.windows(delim.len()).position(|w| w == delim) {
        Some(pos) => Some((std::str::from_utf8(&data[..pos]).ok()?, &data[pos + 4..])),
        None => Some((std::str::from_utf8(data).ok()?, &[])),
    }
}

/// Parses header lines, unfolding continuations (RFC 3261 §7.3.1).
/// Header names are stored as received; lookups resolve compact forms.
fn parse_headers<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<Headers> {
    let mut headers = Headers::new();
    let mut current: Option<(SmolStr, String)> = None;

    for line in lines.into_iter().filter(|l| !l.is_empty()) {
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = current.as_mut()?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.is_empty() || !name.chars().all(is_token_char) {
            return None;
        }
        if let Some((prev, value)) = current.take() {
            headers.push(prev, value.trim());
        }
        current = Some((SmolStr::new(name), value.trim().to_owned()));
    }
    if let Some((name, value)) = current {
        headers.push(name, value.trim());
    }
    Some(headers)
}

fn extract_body(body: &[u8], headers: &Headers) -> Option<Bytes> {
    let declared = match header(headers, "Content-Length") {
        Some(value) => value.trim().parse::<usize>().ok()?,
        None => body.len(),
    };
    if declared > body.len() {
        return None;
    }
    Some(Bytes::copy_from_slice(&body[..declared]))
}

fn cseq_matches(headers: &Headers, method: &Method) -> bool {
    header(headers, "CSeq")
        .and_then(|cseq| cseq.split_whitespace().nth(1))
        .map_or(true, |m| Method::from_token(m) == *method)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '%' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '~'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(text: &str) -> Bytes {
        Bytes::from(text.replace('\n', "\r\n"))
    }

    #[test]
    fn parses_invite_with_compact_timer_headers() {
        let raw = bytes(
            "INVITE sip:bob@example.com SIP/2.0\n\
             v: SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776\n\
             i: a84b4c76e66710\n\
             CSeq: 314159 INVITE\n\
             k: timer, 100rel\n\
             x: 1800;refresher=uac\n\
             Min-SE: 90\n\
             l: 0\n\n",
        );
        let req = parse_request(&raw).expect("request");
        assert_eq!(req.method(), &Method::Invite);
        assert_eq!(header(req.headers(), "Call-ID").unwrap(), "a84b4c76e66710");
        assert_eq!(
            header(req.headers(), "Session-Expires").unwrap(),
            "1800;refresher=uac"
        );
        assert!(parse_supported(req.headers()).contains("timer"));
    }

    #[test]
    fn full_name_lookup_matches_compact_query() {
        let mut headers = Headers::new();
        headers.push("Session-Expires", "600");
        assert_eq!(header(&headers, "x").unwrap(), "600");
    }

    #[test]
    fn lookup_name_can_be_a_temporary() {
        let mut headers = Headers::new();
        headers.push("x", "600");
        let found = {
            let name = String::from("session-expires");
            header(&headers, &name)
        };
        assert_eq!(found.unwrap(), "600");
    }

    #[test]
    fn set_header_drops_compact_duplicates() {
        let mut headers = Headers::new();
        headers.push("x", "90");
        headers.push("Session-Expires", "120");
        set_header(&mut headers, "Session-Expires", "1800;refresher=uas");
        assert_eq!(headers.len(), 1);
        assert_eq!(header(&headers, "x").unwrap(), "1800;refresher=uas");
    }

    #[test]
    fn folded_header_lines_are_joined() {
        let raw = bytes(
            "SIP/2.0 200 OK\n\
             Supported: timer,\n\
             \t100rel\n\
             Content-Length: 0\n\n",
        );
        let res = parse_response(&raw).expect("response");
        assert_eq!(parse_supported(res.headers()).tokens(), &["timer", "100rel"]);
    }

    #[test]
    fn rejects_mismatched_cseq_method() {
        let raw = bytes(
            "UPDATE sip:bob@example.com SIP/2.0\n\
             CSeq: 2 INVITE\n\n",
        );
        assert!(parse_request(&raw).is_none());
    }

    #[test]
    fn serialize_rewrites_content_length() {
        let mut headers = Headers::new();
        headers.push("Min-SE", "90");
        headers.push("Content-Length", "999");
        let res = Response::new(StatusLine::for_code(422).unwrap(), headers, Bytes::new()).unwrap();
        let wire = serialize_response(&res);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("SIP/2.0 422 Session Interval Too Small\r\n"));
        assert!(text.contains("Content-Length: 0\r\n\r\n"));
        assert!(!text.contains("999"));

        let parsed = parse_response(&wire).unwrap();
        assert_eq!(parse_min_se(parsed.headers()).unwrap().unwrap().delta_seconds(), 90);
    }
}
