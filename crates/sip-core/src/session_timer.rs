// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session Timer header values (RFC 4028).
//!
//! ```text
//! Session-Expires: 1800;refresher=uac
//! x: 1800
//! Min-SE: 90
//! Supported: timer
//! ```
//!
//! [`SessionExpires`] and [`MinSessionExpires`] are the typed forms of the two
//! headers. Construction through `new` enforces the RFC 4028 floor of 90
//! seconds; `parse` only enforces the grammar and the upper bound, because the
//! answering side must be able to see an undersized proposal in order to
//! reject it with a 422.
//!
//! ```
//! use sip_core::{RefresherRole, SessionExpires};
//!
//! let se = SessionExpires::new(1800).unwrap().with_refresher(RefresherRole::Uac);
//! assert_eq!(se.to_string(), "1800;refresher=uac");
//!
//! let small = SessionExpires::parse("60").unwrap();
//! assert!(!small.is_valid());
//! ```

use std::fmt;

/// Option tag advertised in `Supported`/`Require`/`Unsupported`.
pub const TIMER_OPTION_TAG: &str = "timer";

/// RFC 4028 floor for both `Session-Expires` and `Min-SE`.
pub const RFC_MIN_SESSION_INTERVAL: u32 = 90;

/// Recommended `Session-Expires` when nothing else is configured.
pub const DEFAULT_SESSION_INTERVAL: u32 = 1800;

/// Largest session interval accepted (24 hours).
const MAX_SESSION_EXPIRES: u32 = 86400;

/// Largest `Min-SE` accepted (2 hours).
const MAX_MIN_SE: u32 = 7200;

/// Validation failures for session timer values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTimerError {
    TooSmall {
        field: &'static str,
        min: u32,
        actual: u32,
    },
    TooLarge {
        field: &'static str,
        max: u32,
        actual: u32,
    },
    InvalidFormat(String),
    InvalidCharacter(String),
}

impl fmt::Display for SessionTimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTimerError::TooSmall { field, min, actual } => {
                write!(f, "{} too small: {} < {} (minimum)", field, actual, min)
            }
            SessionTimerError::TooLarge { field, max, actual } => {
                write!(f, "{} too large: {} > {} (maximum)", field, actual, max)
            }
            SessionTimerError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            SessionTimerError::InvalidCharacter(msg) => write!(f, "Invalid character: {}", msg),
        }
    }
}

impl std::error::Error for SessionTimerError {}

/// The `Session-Expires` header.
///
/// ```text
/// Session-Expires  = ("Session-Expires" / "x") HCOLON delta-seconds
///                    *(SEMI se-params)
/// se-params        = refresher-param / generic-param
/// refresher-param  = "refresher" EQUAL ("uas" / "uac")
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionExpires {
    delta_seconds: u32,
    refresher: Option<RefresherRole>,
}

impl SessionExpires {
    /// Creates a header value, enforcing 90..=86400 seconds.
    ///
    /// ```
    /// use sip_core::SessionExpires;
    ///
    /// assert_eq!(SessionExpires::new(1800).unwrap().delta_seconds(), 1800);
    /// assert!(SessionExpires::new(60).is_err());
    /// assert!(SessionExpires::new(100_000).is_err());
    /// ```
    pub fn new(delta_seconds: u32) -> Result<Self, SessionTimerError> {
        check_range("Session-Expires", delta_seconds, Self::minimum(), Self::maximum())?;
        Ok(Self {
            delta_seconds,
            refresher: None,
        })
    }

    pub fn delta_seconds(&self) -> u32 {
        self.delta_seconds
    }

    pub fn refresher(&self) -> Option<RefresherRole> {
        self.refresher
    }

    pub fn with_refresher(mut self, role: RefresherRole) -> Self {
        self.refresher = Some(role);
        self
    }

    /// Same interval with the refresher parameter set or cleared.
    pub fn with_optional_refresher(mut self, role: Option<RefresherRole>) -> Self {
        self.refresher = role;
        self
    }

    /// Parses a header value received from a peer.
    ///
    /// Any non-zero delta-seconds parses; values outside 90..=86400 are
    /// reported by [`is_valid`](Self::is_valid) so the caller can answer 422
    /// or clamp.
    /// Generic parameters are ignored. A refresher value other than `uac` or
    /// `uas`, or a repeated refresher parameter, is a format error.
    ///
    /// ```
    /// use sip_core::{RefresherRole, SessionExpires};
    ///
    /// let se = SessionExpires::parse(" 3600 ; refresher=UAS ;foo=bar").unwrap();
    /// assert_eq!(se.delta_seconds(), 3600);
    /// assert_eq!(se.refresher(), Some(RefresherRole::Uas));
    ///
    /// assert!(SessionExpires::parse("0").is_err());
    /// assert!(SessionExpires::parse("1800;refresher=proxy").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, SessionTimerError> {
        if input.chars().any(|c| c.is_control()) {
            return Err(SessionTimerError::InvalidCharacter(
                "control character in Session-Expires".to_string(),
            ));
        }

        let mut parts = input.split(';');
        let delta_seconds = parse_delta_seconds("Session-Expires", parts.next().unwrap_or(""))?;
        if delta_seconds == 0 {
            return Err(SessionTimerError::TooSmall {
                field: "Session-Expires",
                min: 1,
                actual: 0,
            });
        }
        let mut refresher = None;
        for param in parts.map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = match param.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (param, None),
            };
            if !name.eq_ignore_ascii_case("refresher") {
                continue;
            }
            if refresher.is_some() {
                return Err(SessionTimerError::InvalidFormat(
                    "duplicate refresher parameter".to_string(),
                ));
            }
            let value = value.unwrap_or("");
            refresher = Some(RefresherRole::parse(value).ok_or_else(|| {
                SessionTimerError::InvalidFormat(format!("unknown refresher '{}'", value))
            })?);
        }

        Ok(Self {
            delta_seconds,
            refresher,
        })
    }

    pub const fn minimum() -> u32 {
        RFC_MIN_SESSION_INTERVAL
    }

    pub const fn maximum() -> u32 {
        MAX_SESSION_EXPIRES
    }

    pub const fn default_interval() -> u32 {
        DEFAULT_SESSION_INTERVAL
    }

    /// True when the interval is one a UA may agree to (90..=86400).
    pub fn is_valid(&self) -> bool {
        (Self::minimum()..=Self::maximum()).contains(&self.delta_seconds)
    }
}

impl fmt::Display for SessionExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.delta_seconds)?;
        if let Some(refresher) = self.refresher {
            write!(f, ";refresher={}", refresher)?;
        }
        Ok(())
    }
}

/// The `Min-SE` header: the smallest session interval the sender accepts.
///
/// ```
/// use sip_core::MinSessionExpires;
///
/// let min_se = MinSessionExpires::parse(" 120 ").unwrap();
/// assert_eq!(min_se.delta_seconds(), 120);
/// assert!(MinSessionExpires::parse("60").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinSessionExpires {
    delta_seconds: u32,
}

impl MinSessionExpires {
    pub fn new(delta_seconds: u32) -> Result<Self, SessionTimerError> {
        check_range("Min-SE", delta_seconds, Self::default_minimum(), Self::maximum())?;
        Ok(Self { delta_seconds })
    }

    pub fn delta_seconds(&self) -> u32 {
        self.delta_seconds
    }

    pub fn parse(input: &str) -> Result<Self, SessionTimerError> {
        if input.chars().any(|c| c.is_control()) {
            return Err(SessionTimerError::InvalidCharacter(
                "control character in Min-SE".to_string(),
            ));
        }
        // Min-SE allows generic parameters after the value.
        let value = input.split(';').next().unwrap_or("");
        let delta_seconds = parse_delta_seconds("Min-SE", value)?;
        // A peer's floor has no upper bound; only ours is capped.
        check_range("Min-SE", delta_seconds, Self::default_minimum(), u32::MAX)?;
        Ok(Self { delta_seconds })
    }

    /// Min-SE assumed when the header is absent.
    pub const fn default_minimum() -> u32 {
        RFC_MIN_SESSION_INTERVAL
    }

    pub const fn maximum() -> u32 {
        MAX_MIN_SE
    }
}

impl Default for MinSessionExpires {
    fn default() -> Self {
        Self {
            delta_seconds: Self::default_minimum(),
        }
    }
}

impl fmt::Display for MinSessionExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.delta_seconds)
    }
}

/// Value of the `refresher` parameter.
///
/// The tag is relative to the transaction carrying the header: `uac` is the
/// sender of the request, whichever side of the dialog that is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefresherRole {
    Uac,
    Uas,
}

impl RefresherRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefresherRole::Uac => "uac",
            RefresherRole::Uas => "uas",
        }
    }

    /// Case-insensitive parse of `uac`/`uas`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("uac") {
            Some(RefresherRole::Uac)
        } else if input.eq_ignore_ascii_case("uas") {
            Some(RefresherRole::Uas)
        } else {
            None
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            RefresherRole::Uac => RefresherRole::Uas,
            RefresherRole::Uas => RefresherRole::Uac,
        }
    }
}

impl fmt::Display for RefresherRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_delta_seconds(field: &'static str, raw: &str) -> Result<u32, SessionTimerError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SessionTimerError::InvalidFormat(format!("empty {}", field)));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SessionTimerError::InvalidFormat(format!(
            "{} is not delta-seconds: '{}'",
            field, raw
        )));
    }
    // Overflowing u32 is certainly above any maximum.
    raw.parse::<u32>().map_err(|_| SessionTimerError::TooLarge {
        field,
        max: u32::MAX,
        actual: u32::MAX,
    })
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), SessionTimerError> {
    if value < min {
        return Err(SessionTimerError::TooSmall {
            field,
            min,
            actual: value,
        });
    }
    if value > max {
        return Err(SessionTimerError::TooLarge {
            field,
            max,
            actual: value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expires_formats_refresher_param() {
        let se = SessionExpires::new(1800)
            .unwrap()
            .with_refresher(RefresherRole::Uas);
        assert_eq!(se.to_string(), "1800;refresher=uas");
        assert_eq!(SessionExpires::new(3600).unwrap().to_string(), "3600");
    }

    #[test]
    fn session_expires_parse_keeps_undersized_values() {
        let se = SessionExpires::parse("60;refresher=uac").unwrap();
        assert_eq!(se.delta_seconds(), 60);
        assert_eq!(se.refresher(), Some(RefresherRole::Uac));
        assert!(!se.is_valid());
    }

    #[test]
    fn session_expires_parse_rejects_bad_input() {
        assert!(matches!(
            SessionExpires::parse(""),
            Err(SessionTimerError::InvalidFormat(_))
        ));
        assert!(matches!(
            SessionExpires::parse("abc"),
            Err(SessionTimerError::InvalidFormat(_))
        ));
        assert!(matches!(
            SessionExpires::parse("-5"),
            Err(SessionTimerError::InvalidFormat(_))
        ));
        assert!(!SessionExpires::parse("86401").unwrap().is_valid());
        assert!(matches!(
            SessionExpires::parse("99999999999"),
            Err(SessionTimerError::TooLarge { .. })
        ));
        assert!(matches!(
            SessionExpires::parse("1800\r\nRequire: timer"),
            Err(SessionTimerError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn session_expires_rejects_duplicate_refresher() {
        assert!(SessionExpires::parse("1800;refresher=uac;refresher=uas").is_err());
        assert!(SessionExpires::parse("1800;refresher").is_err());
    }

    #[test]
    fn session_expires_ignores_generic_params() {
        let se = SessionExpires::parse("1800;x-vendor=1;Refresher=uac").unwrap();
        assert_eq!(se.refresher(), Some(RefresherRole::Uac));
    }

    #[test]
    fn min_se_caps_only_local_values() {
        assert_eq!(MinSessionExpires::parse("90").unwrap().delta_seconds(), 90);
        assert_eq!(MinSessionExpires::parse("300;ext=1").unwrap().delta_seconds(), 300);
        assert!(matches!(
            MinSessionExpires::parse("89"),
            Err(SessionTimerError::TooSmall { min: 90, actual: 89, .. })
        ));
        assert_eq!(MinSessionExpires::parse("10000").unwrap().delta_seconds(), 10000);
        assert!(matches!(
            MinSessionExpires::new(7201),
            Err(SessionTimerError::TooLarge { max: 7200, .. })
        ));
        assert_eq!(MinSessionExpires::default().delta_seconds(), 90);
    }

    #[test]
    fn refresher_role_parse_and_opposite() {
        assert_eq!(RefresherRole::parse("UAC"), Some(RefresherRole::Uac));
        assert_eq!(RefresherRole::parse(" uas "), Some(RefresherRole::Uas));
        assert_eq!(RefresherRole::parse("proxy"), None);
        assert_eq!(RefresherRole::Uac.opposite(), RefresherRole::Uas);
    }

    #[test]
    fn error_display() {
        let err = SessionExpires::new(60).unwrap_err();
        assert_eq!(err.to_string(), "Session-Expires too small: 60 < 90 (minimum)");
    }
}
