// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{headers::Headers, method::Method, uri::SipUri, version::SipVersion};

const MAX_REASON_LENGTH: usize = 256;
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    InvalidStatusCode { code: u16 },
    ReasonTooLong { max: usize, actual: usize },
    InvalidReason(String),
    BodyTooLarge { max: usize, actual: usize },
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStatusCode { code } => {
                write!(f, "invalid SIP status code: {} (must be 100-699)", code)
            }
            Self::ReasonTooLong { max, actual } => {
                write!(f, "reason phrase too long (max {}, got {})", max, actual)
            }
            Self::InvalidReason(msg) => write!(f, "invalid reason phrase: {}", msg),
            Self::BodyTooLarge { max, actual } => {
                write!(f, "body too large (max {}, got {})", max, actual)
            }
        }
    }
}

impl std::error::Error for MessageError {}

/// `Method SP Request-URI SP SIP-Version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    uri: SipUri,
    version: SipVersion,
}

impl RequestLine {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            method,
            uri,
            version: SipVersion::V2,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn version(&self) -> SipVersion {
        self.version
    }
}

/// `SIP-Version SP Status-Code SP Reason-Phrase`
///
/// Construction rejects codes outside 100-699 and reason phrases containing
/// control characters, so a status line can never smuggle extra header lines.
///
/// ```
/// use sip_core::StatusLine;
///
/// let status = StatusLine::new(422, "Session Interval Too Small").unwrap();
/// assert_eq!(status.code(), 422);
/// assert!(StatusLine::new(200, "OK\r\nMin-SE: 1").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    version: SipVersion,
    code: u16,
    reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl AsRef<str>) -> Result<Self, MessageError> {
        if !(100..=699).contains(&code) {
            return Err(MessageError::InvalidStatusCode { code });
        }
        let reason = reason.as_ref();
        validate_reason_phrase(reason)?;
        Ok(Self {
            version: SipVersion::V2,
            code,
            reason: SmolStr::new(reason),
        })
    }

    /// Builds a status line using the registered reason phrase for `code`.
    pub fn for_code(code: u16) -> Result<Self, MessageError> {
        Self::new(code, canonical_reason(code))
    }

    pub fn version(&self) -> SipVersion {
        self.version
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Reason phrases for the status codes this stack generates itself.
pub fn canonical_reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        420 => "Bad Extension",
        421 => "Extension Required",
        422 => "Session Interval Too Small",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        491 => "Request Pending",
        500 => "Server Internal Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A SIP request. Fields are private; the body size is validated on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    start: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;
        Ok(Self {
            start,
            headers,
            body,
        })
    }

    pub fn start_line(&self) -> &RequestLine {
        &self.start
    }

    pub fn method(&self) -> &Method {
        self.start.method()
    }

    pub fn uri(&self) -> &SipUri {
        self.start.uri()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (RequestLine, Headers, Bytes) {
        (self.start, self.headers, self.body)
    }
}

/// A SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    start: StatusLine,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;
        Ok(Self {
            start,
            headers,
            body,
        })
    }

    pub fn start_line(&self) -> &StatusLine {
        &self.start
    }

    pub fn code(&self) -> u16 {
        self.start.code()
    }

    pub fn reason(&self) -> &str {
        self.start.reason()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.code())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }

    /// True for any final non-2xx response.
    pub fn is_failure(&self) -> bool {
        self.code() >= 300
    }
}

fn validate_reason_phrase(reason: &str) -> Result<(), MessageError> {
    if reason.len() > MAX_REASON_LENGTH {
        return Err(MessageError::ReasonTooLong {
            max: MAX_REASON_LENGTH,
            actual: reason.len(),
        });
    }
    if reason.chars().any(|c| c.is_ascii_control()) {
        return Err(MessageError::InvalidReason(
            "contains control characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_body_size(body: &Bytes) -> Result<(), MessageError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(MessageError::BodyTooLarge {
            max: MAX_BODY_SIZE,
            actual: body.len(),
        });
    }
    Ok(())
}
