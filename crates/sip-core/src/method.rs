use std::fmt;

use smol_str::SmolStr;

/// SIP request methods.
///
/// Only the methods a dialog with session timers exchanges get their own
/// variant; everything else is carried as [`Method::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Update,
    Prack,
    Unknown(SmolStr),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Update => "UPDATE",
            Method::Prack => "PRACK",
            Method::Unknown(token) => token.as_str(),
        }
    }

    /// Parses a method token. Matching ignores case; extension methods are
    /// preserved verbatim.
    pub fn from_token(token: &str) -> Self {
        const KNOWN: [(&str, Method); 7] = [
            ("INVITE", Method::Invite),
            ("ACK", Method::Ack),
            ("BYE", Method::Bye),
            ("CANCEL", Method::Cancel),
            ("OPTIONS", Method::Options),
            ("UPDATE", Method::Update),
            ("PRACK", Method::Prack),
        ];
        KNOWN
            .into_iter()
            .find(|(name, _)| token.eq_ignore_ascii_case(name))
            .map(|(_, method)| method)
            .unwrap_or_else(|| Method::Unknown(SmolStr::new(token)))
    }

    /// Returns true for the methods that can carry a session refresh
    /// (RFC 4028 §7: re-INVITE and UPDATE).
    pub fn can_refresh_session(&self) -> bool {
        matches!(self, Method::Invite | Method::Update)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
