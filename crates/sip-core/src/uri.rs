// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

/// A `sip:` or `sips:` URI (RFC 3261 §19.1).
///
/// Only the parts a dialog needs are broken out; the original text is kept
/// so the URI serializes exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    raw: SmolStr,
    sips: bool,
    user: Option<SmolStr>,
    host: SmolStr,
    port: Option<u16>,
    params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl SipUri {
    /// Parses a SIP or SIPS URI. URI headers (`?...`) are ignored.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.chars().any(|c| c.is_ascii_control() || c == ' ') {
            return None;
        }
        let (scheme, rest) = input.split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let addr = rest.split_once('?').map_or(rest, |(addr, _)| addr);
        let mut parts = addr.split(';');
        let base = parts.next()?;

        let mut params = BTreeMap::new();
        for param in parts.filter(|p| !p.is_empty()) {
            match param.split_once('=') {
                Some((k, v)) => params.insert(SmolStr::new(k), Some(SmolStr::new(v))),
                None => params.insert(SmolStr::new(param), None),
            };
        }

        let (user, host_port) = match base.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(SmolStr::new(user)), host),
            Some(_) => return None,
            None => (None, base),
        };
        let (host, port) = split_host_port(host_port)?;

        Some(Self {
            raw: SmolStr::new(input),
            sips,
            user,
            host: SmolStr::new(host.to_ascii_lowercase()),
            port,
            params,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_sips(&self) -> bool {
        self.sips
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if input.is_empty() {
        return None;
    }
    // IPv6 reference: [::1]:5060
    if let Some(rest) = input.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some((addr, port));
    }
    match input.split_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host, Some(port.parse().ok()?))),
        Some(_) => None,
        None => Some((input, None)),
    }
}
