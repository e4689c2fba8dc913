// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! User-agent wide session timer settings.
//!
//! ```
//! use sip_dialog::session_timer_config::{RefresherPreference, SessionTimerConfig, SupportLevel};
//!
//! let config = SessionTimerConfig::default()
//!     .with_support_level(SupportLevel::Supported)
//!     .with_refresher_preference(RefresherPreference::LocalPreferred)
//!     .with_default_interval(1200)
//!     .unwrap();
//! assert!(config.timers_enabled());
//! assert_eq!(config.default_interval(), 1200);
//! ```

use std::fmt;
use std::str::FromStr;

use sip_core::{
    MinSessionExpires, RefresherRole, SessionExpires, SessionTimerError, DEFAULT_SESSION_INTERVAL,
    RFC_MIN_SESSION_INTERVAL,
};

/// How much this user agent cares about session timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupportLevel {
    /// Timers are never advertised or negotiated.
    #[default]
    Disabled,
    /// `timer` goes in `Supported`.
    Supported,
    /// `timer` goes in both `Supported` and `Require`.
    Required,
}

impl SupportLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportLevel::Disabled => "disabled",
            SupportLevel::Supported => "supported",
            SupportLevel::Required => "required",
        }
    }
}

impl fmt::Display for SupportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportLevel {
    type Err = SessionTimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(SupportLevel::Disabled),
            "supported" => Ok(SupportLevel::Supported),
            "required" => Ok(SupportLevel::Required),
            other => Err(SessionTimerError::InvalidFormat(format!(
                "unknown support level '{}'",
                other
            ))),
        }
    }
}

/// Which side this user agent asks to do the refreshing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefresherPreference {
    /// No `refresher` parameter is proposed.
    #[default]
    None,
    LocalPreferred,
    RemotePreferred,
}

impl RefresherPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefresherPreference::None => "none",
            RefresherPreference::LocalPreferred => "local",
            RefresherPreference::RemotePreferred => "remote",
        }
    }
}

impl fmt::Display for RefresherPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefresherPreference {
    type Err = SessionTimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RefresherPreference::None),
            "local" => Ok(RefresherPreference::LocalPreferred),
            "remote" => Ok(RefresherPreference::RemotePreferred),
            other => Err(SessionTimerError::InvalidFormat(format!(
                "unknown refresher preference '{}'",
                other
            ))),
        }
    }
}

/// Session timer configuration, fixed once a user agent is created.
///
/// Intervals are in seconds. `default_refresher` decides who refreshes when
/// neither side states a preference; RFC 4028 practice is the party sending
/// the 2xx, i.e. the UAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimerConfig {
    support_level: SupportLevel,
    refresher_preference: RefresherPreference,
    default_interval: u32,
    min_interval: u32,
    default_refresher: RefresherRole,
}

impl Default for SessionTimerConfig {
    fn default() -> Self {
        Self {
            support_level: SupportLevel::Disabled,
            refresher_preference: RefresherPreference::None,
            default_interval: DEFAULT_SESSION_INTERVAL,
            min_interval: RFC_MIN_SESSION_INTERVAL,
            default_refresher: RefresherRole::Uas,
        }
    }
}

impl SessionTimerConfig {
    pub fn with_support_level(mut self, level: SupportLevel) -> Self {
        self.support_level = level;
        self
    }

    pub fn with_refresher_preference(mut self, preference: RefresherPreference) -> Self {
        self.refresher_preference = preference;
        self
    }

    pub fn with_default_refresher(mut self, role: RefresherRole) -> Self {
        self.default_refresher = role;
        self
    }

    /// Sets the interval proposed in outgoing requests.
    pub fn with_default_interval(mut self, seconds: u32) -> Result<Self, SessionTimerError> {
        self.default_interval = seconds;
        self.validate()?;
        Ok(self)
    }

    /// Sets the local Min-SE.
    pub fn with_min_interval(mut self, seconds: u32) -> Result<Self, SessionTimerError> {
        self.min_interval = seconds;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SessionTimerError> {
        MinSessionExpires::new(self.min_interval)?;
        SessionExpires::new(self.default_interval)?;
        if self.default_interval < self.min_interval {
            return Err(SessionTimerError::TooSmall {
                field: "default interval",
                min: self.min_interval,
                actual: self.default_interval,
            });
        }
        Ok(())
    }

    pub fn support_level(&self) -> SupportLevel {
        self.support_level
    }

    pub fn refresher_preference(&self) -> RefresherPreference {
        self.refresher_preference
    }

    pub fn default_interval(&self) -> u32 {
        self.default_interval
    }

    pub fn min_interval(&self) -> u32 {
        self.min_interval
    }

    pub fn default_refresher(&self) -> RefresherRole {
        self.default_refresher
    }

    pub fn timers_enabled(&self) -> bool {
        self.support_level != SupportLevel::Disabled
    }
}
