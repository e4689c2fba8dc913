// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP types shared by the session timer stack.
//!
//! - **Messages**: [`Request`], [`Response`] with validated start lines
//! - **Headers**: the ordered [`Headers`] container and comma separated [`TokenList`]s
//! - **Session timers**: RFC 4028 [`SessionExpires`], [`MinSessionExpires`], [`RefresherRole`]
//!
//! Strings use [`SmolStr`](smol_str::SmolStr) and bodies [`Bytes`](bytes::Bytes).
//!
//! ```
//! use sip_core::{SessionExpires, SipUri};
//!
//! let uri = SipUri::parse("sip:alice@example.com").unwrap();
//! assert_eq!(uri.host(), "example.com");
//!
//! let se = SessionExpires::parse("1800;refresher=uac").unwrap();
//! assert_eq!(se.delta_seconds(), 1800);
//! ```

pub mod headers;
pub mod method;
pub mod msg;
pub mod session_timer;
pub mod token_list;
pub mod uri;
pub mod version;

pub use headers::{Header, Headers};
pub use method::Method;
pub use msg::{canonical_reason, MessageError, Request, RequestLine, Response, StatusLine};
pub use session_timer::{
    MinSessionExpires, RefresherRole, SessionExpires, SessionTimerError,
    DEFAULT_SESSION_INTERVAL, RFC_MIN_SESSION_INTERVAL, TIMER_OPTION_TAG,
};
pub use token_list::{AllowHeader, RequireHeader, SupportedHeader, TokenList};
pub use uri::SipUri;
pub use version::SipVersion;
