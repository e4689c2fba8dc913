// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Option tag policy for the `timer` extension.
//!
//! Maps the configured [`SupportLevel`] onto `Supported`/`Require` entries and
//! reads the peer's tags back. Token-list headers are merged rather than
//! overwritten, so decorating a request twice leaves it unchanged.

use sip_core::{Headers, TokenList, TIMER_OPTION_TAG};
use sip_parse::{parse_require, parse_supported, set_header, token_list};
use tracing::debug;

use crate::error::SessionTimerFailure;
use crate::session_timer_config::{SessionTimerConfig, SupportLevel};

/// Methods advertised in `Allow` when the request has none yet.
pub const DEFAULT_ALLOW: &str = "INVITE, ACK, CANCEL, BYE, OPTIONS, UPDATE";

/// Headers whose values are comma separated token lists.
const TOKEN_LIST_HEADERS: [&str; 4] = ["Supported", "Require", "Allow", "Unsupported"];

/// What the peer said about the `timer` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerCapability {
    None,
    Supported,
    Required,
}

impl PeerCapability {
    /// True if the peer can act as refresher.
    pub fn supports_timer(&self) -> bool {
        !matches!(self, PeerCapability::None)
    }
}

/// Adds the option tags and `Allow` entries an establishing request needs.
///
/// `Disabled` adds no `timer` tag at all, `Supported` lists it in `Supported`,
/// `Required` lists it in both. `UPDATE` is always ensured in `Allow` because
/// either side may later refresh with it.
pub fn decorate_outgoing_request(config: &SessionTimerConfig, headers: &mut Headers) {
    match config.support_level() {
        SupportLevel::Disabled => {}
        SupportLevel::Supported => add_token(headers, "Supported", TIMER_OPTION_TAG),
        SupportLevel::Required => {
            add_token(headers, "Supported", TIMER_OPTION_TAG);
            add_token(headers, "Require", TIMER_OPTION_TAG);
        }
    }
    ensure_update_allowed(headers);
}

/// Ensures `UPDATE` appears in `Allow`, creating the header if needed.
pub fn ensure_update_allowed(headers: &mut Headers) {
    if headers.contains("Allow") {
        add_token(headers, "Allow", "UPDATE");
    } else {
        headers.push("Allow", DEFAULT_ALLOW);
    }
}

/// Reads the peer's `Supported`/`Require` tags.
///
/// A peer that requires `timer` while we have timers disabled is an
/// [`UnsupportedByPeer`](SessionTimerFailure::UnsupportedByPeer) condition:
/// the request must be answered with 420 and negotiation does not start.
pub fn interpret_incoming(
    headers: &Headers,
    config: &SessionTimerConfig,
) -> Result<PeerCapability, SessionTimerFailure> {
    let capability = if parse_require(headers).contains(TIMER_OPTION_TAG) {
        PeerCapability::Required
    } else if parse_supported(headers).contains(TIMER_OPTION_TAG) {
        PeerCapability::Supported
    } else {
        PeerCapability::None
    };

    if capability == PeerCapability::Required && !config.timers_enabled() {
        debug!("peer requires timer but session timers are disabled");
        return Err(SessionTimerFailure::UnsupportedByPeer);
    }
    Ok(capability)
}

/// Copies `additions` into `target`.
///
/// Token-list headers merge into whatever `target` already lists; every other
/// header replaces the existing value.
pub fn apply_headers(target: &mut Headers, additions: &Headers) {
    for header in additions.iter() {
        let is_list = TOKEN_LIST_HEADERS
            .iter()
            .any(|name| header.name.eq_ignore_ascii_case(name));
        if is_list {
            for token in TokenList::parse(&header.value).tokens() {
                add_token(target, &header.name, token);
            }
        } else {
            set_header(target, &header.name, header.value.clone());
        }
    }
}

fn add_token(headers: &mut Headers, name: &str, token: &str) {
    let mut list = token_list(headers, name);
    if list.insert(token) || list_spread_over_lines(headers, name) {
        set_header(headers, name, list.to_string());
    }
}

fn list_spread_over_lines(headers: &Headers, name: &str) -> bool {
    sip_parse::header_values(headers, name).count() > 1
}
