// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

/// Protocol version carried on request and status lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SipVersion {
    #[default]
    V2,
}

impl SipVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            SipVersion::V2 => "SIP/2.0",
        }
    }

    /// Accepts the version token from a start line, ignoring case.
    pub fn from_token(token: &str) -> Option<Self> {
        token
            .trim()
            .eq_ignore_ascii_case("SIP/2.0")
            .then_some(SipVersion::V2)
    }
}

impl fmt::Display for SipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
