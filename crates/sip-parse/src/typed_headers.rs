// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed readers for the headers session timer negotiation consumes.

use sip_core::{
    AllowHeader, Headers, MinSessionExpires, RequireHeader, SessionExpires, SessionTimerError,
    SupportedHeader, TokenList,
};

/// Collects the tokens of every `name` header into one list.
///
/// Multiple header lines are equivalent to one comma separated line
/// (RFC 3261 §7.3.1); duplicates are dropped.
pub fn token_list(headers: &Headers, name: &str) -> TokenList {
    let mut list = TokenList::new();
    for value in crate::header_values(headers, name) {
        list.merge(&TokenList::parse(value));
    }
    list
}

pub fn parse_supported(headers: &Headers) -> SupportedHeader {
    token_list(headers, "Supported")
}

pub fn parse_require(headers: &Headers) -> RequireHeader {
    token_list(headers, "Require")
}

pub fn parse_unsupported(headers: &Headers) -> TokenList {
    token_list(headers, "Unsupported")
}

pub fn parse_allow(headers: &Headers) -> AllowHeader {
    token_list(headers, "Allow")
}

/// Reads `Session-Expires` (or `x`).
///
/// `Ok(None)` means the header is absent. A header that is present but
/// malformed is an error rather than silently absent, so the caller can tell
/// "peer did not ask for timers" from "peer sent garbage".
pub fn parse_session_expires(
    headers: &Headers,
) -> Result<Option<SessionExpires>, SessionTimerError> {
    crate::header(headers, "Session-Expires")
        .map(|value| SessionExpires::parse(value))
        .transpose()
}

/// Reads `Min-SE`. Absent yields `Ok(None)`; callers apply the 90 second
/// default themselves.
pub fn parse_min_se(headers: &Headers) -> Result<Option<MinSessionExpires>, SessionTimerError> {
    crate::header(headers, "Min-SE")
        .map(|value| MinSessionExpires::parse(value))
        .transpose()
}
