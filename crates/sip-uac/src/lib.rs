// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UAC helpers for sessions that negotiate RFC 4028 session timers.
//!
//! [`UserAgentClient`] builds the establishing INVITE with the configured
//! timer headers, reacts to the answer (including the single 422 retry) and
//! creates the dialog once a 2xx arrives. Refresh requests and teardown on
//! expiry are driven by [`session_refresh::SessionRefreshDriver`].
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_core::SipUri;
//! use sip_dialog::{DialogManager, ManualScheduler, SessionTimerConfig, SupportLevel};
//! use sip_uac::UserAgentClient;
//!
//! let uac = UserAgentClient::new(
//!     SipUri::parse("sip:alice@example.com").unwrap(),
//!     SipUri::parse("sip:alice@client.example.com").unwrap(),
//!     Arc::new(DialogManager::new()),
//!     Arc::new(ManualScheduler::default()),
//! )
//! .with_session_timer_config(
//!     SessionTimerConfig::default().with_support_level(SupportLevel::Supported),
//! )
//! .unwrap();
//! let invitation = uac
//!     .invite(&SipUri::parse("sip:bob@example.com").unwrap(), None)
//!     .unwrap();
//! assert!(invitation.request.headers().contains("Session-Expires"));
//! ```

pub mod session_refresh;

pub use session_refresh::{
    DriverOutcome, RequestSender, SessionRefreshDriver, SessionTerminationHandler,
};

use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sip_core::{Headers, Method, Request, RequestLine, Response, SipUri};
use sip_dialog::capability::{apply_headers, ensure_update_allowed};
use sip_dialog::{
    parse_cseq_number, parse_uri_from_header, Dialog, DialogId, DialogManager,
    NegotiationOutcome, RefreshPlan, SessionTimerConfig, SessionTimerContext,
    SessionTimerFailure, TimerScheduler,
};
use sip_observe::{noop_observer, SessionTimerObserver};
use sip_parse::header;
use smol_str::SmolStr;
use tracing::{debug, info};

/// UAC helper for establishing sessions with session timers.
pub struct UserAgentClient {
    /// Local SIP URI (From)
    pub local_uri: SipUri,

    /// Local Contact URI
    pub contact_uri: SipUri,

    /// Display name for From header
    pub display_name: Option<String>,

    /// Dialogs established through this client
    pub dialog_manager: Arc<DialogManager>,

    scheduler: Arc<dyn TimerScheduler>,
    session_timer_config: SessionTimerConfig,
    observer: Arc<dyn SessionTimerObserver>,

    /// Local tag for From header (generated once)
    local_tag: SmolStr,
}

/// An INVITE in flight together with the timer state negotiating it.
#[derive(Debug)]
pub struct Invitation {
    pub request: Request,
    pub session_timer: SessionTimerContext,
}

impl Invitation {
    pub fn call_id(&self) -> Option<&SmolStr> {
        header(self.request.headers(), "Call-ID")
    }
}

/// Result of feeding a response to [`UserAgentClient::process_invite_response`].
#[derive(Debug)]
pub enum InviteOutcome {
    /// Provisional response; keep waiting with the same invitation.
    Pending(Invitation),
    /// 422: send this new INVITE, it carries the raised interval.
    Retry(Invitation),
    /// 2xx: the dialog is stored and its timer armed when timers were adopted.
    Established { dialog_id: DialogId, timers_armed: bool },
    /// Final failure. `failure` is set when session timers caused it.
    Failed {
        code: u16,
        failure: Option<SessionTimerFailure>,
    },
}

impl UserAgentClient {
    /// Creates a new UAC with the given local URI and contact.
    ///
    /// Dialogs land in `dialog_manager`; their timers are armed on
    /// `scheduler`.
    pub fn new(
        local_uri: SipUri,
        contact_uri: SipUri,
        dialog_manager: Arc<DialogManager>,
        scheduler: Arc<dyn TimerScheduler>,
    ) -> Self {
        Self {
            local_uri,
            contact_uri,
            display_name: None,
            dialog_manager,
            scheduler,
            session_timer_config: SessionTimerConfig::default(),
            observer: noop_observer(),
            local_tag: generate_tag(),
        }
    }

    /// Sets display name for From header.
    pub fn with_display_name(mut self, name: String) -> Self {
        self.display_name = Some(name);
        self
    }

    /// Replaces the session timer settings used for new INVITEs.
    pub fn with_session_timer_config(mut self, config: SessionTimerConfig) -> Result<Self> {
        config.validate()?;
        self.session_timer_config = config;
        Ok(self)
    }

    /// Observer handed to every session timer context this client creates.
    pub fn with_observer(mut self, observer: Arc<dyn SessionTimerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn session_timer_config(&self) -> &SessionTimerConfig {
        &self.session_timer_config
    }

    pub fn scheduler(&self) -> &dyn TimerScheduler {
        self.scheduler.as_ref()
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    /// Creates an INVITE to `target_uri` carrying the session timer offer.
    pub fn invite(&self, target_uri: &SipUri, sdp_body: Option<&str>) -> Result<Invitation> {
        let mut session_timer =
            SessionTimerContext::new_uac(self.session_timer_config.clone(), self.observer.clone());
        let mut request = self.create_invite(target_uri, sdp_body)?;
        apply_headers(request.headers_mut(), &session_timer.negotiate_outgoing());

        debug!(
            target = %target_uri.as_str(),
            state = %session_timer.state(),
            "INVITE created"
        );
        Ok(Invitation {
            request,
            session_timer,
        })
    }

    /// Creates a bare INVITE request.
    pub fn create_invite(&self, target_uri: &SipUri, sdp_body: Option<&str>) -> Result<Request> {
        let mut headers = Headers::new();

        headers.push(
            SmolStr::new("Via"),
            SmolStr::new(format!(
                "SIP/2.0/UDP placeholder;branch={}",
                generate_branch()
            )),
        );
        headers.push(SmolStr::new("From"), SmolStr::new(self.format_from_header()));
        headers.push(
            SmolStr::new("To"),
            SmolStr::new(format!("<{}>", target_uri.as_str())),
        );
        headers.push(SmolStr::new("Call-ID"), SmolStr::new(generate_call_id()));
        headers.push(SmolStr::new("CSeq"), SmolStr::new("1 INVITE"));
        headers.push(
            SmolStr::new("Contact"),
            SmolStr::new(format!("<{}>", self.contact_uri.as_str())),
        );
        headers.push(SmolStr::new("Max-Forwards"), SmolStr::new("70"));
        headers.push(SmolStr::new("User-Agent"), SmolStr::new("siphon-rs/0.1.0"));

        let body = match sdp_body {
            Some(sdp) => {
                headers.push(
                    SmolStr::new("Content-Type"),
                    SmolStr::new("application/sdp"),
                );
                headers.push(
                    SmolStr::new("Content-Length"),
                    SmolStr::new(sdp.len().to_string()),
                );
                Bytes::copy_from_slice(sdp.as_bytes())
            }
            None => {
                headers.push(SmolStr::new("Content-Length"), SmolStr::new("0"));
                Bytes::new()
            }
        };

        Ok(Request::new(
            RequestLine::new(Method::Invite, target_uri.clone()),
            headers,
            body,
        )?)
    }

    /// Processes a response to an INVITE sent with [`invite`](Self::invite).
    pub fn process_invite_response(
        &self,
        invitation: Invitation,
        response: &Response,
    ) -> Result<InviteOutcome> {
        let Invitation {
            request,
            mut session_timer,
        } = invitation;

        match session_timer.on_response(response) {
            NegotiationOutcome::Pending => Ok(InviteOutcome::Pending(Invitation {
                request,
                session_timer,
            })),
            NegotiationOutcome::RetryWithInterval(interval) => {
                let retry = self.create_retry(&request, &mut session_timer)?;
                info!(interval, "retrying INVITE after 422");
                Ok(InviteOutcome::Retry(Invitation {
                    request: retry,
                    session_timer,
                }))
            }
            NegotiationOutcome::Rejected(failure) => Ok(InviteOutcome::Failed {
                code: response.code(),
                failure: Some(failure),
            }),
            NegotiationOutcome::NotAdopted if !response.is_success() => {
                Ok(InviteOutcome::Failed {
                    code: response.code(),
                    failure: None,
                })
            }
            NegotiationOutcome::Adopted { .. } | NegotiationOutcome::NotAdopted => {
                self.establish(&request, response, session_timer)
            }
        }
    }

    fn establish(
        &self,
        request: &Request,
        response: &Response,
        session_timer: SessionTimerContext,
    ) -> Result<InviteOutcome> {
        let remote_uri = extract_to_uri(response).ok_or_else(|| anyhow!("2xx without To URI"))?;
        let dialog = Dialog::new_uac(
            request,
            response,
            self.local_uri.clone(),
            remote_uri,
            session_timer,
        )
        .ok_or_else(|| anyhow!("2xx does not identify a dialog"))?;
        let dialog_id = dialog.id.clone();

        info!(
            call_id = %dialog_id.call_id,
            state = ?dialog.state,
            timers = %dialog.session_timer.state(),
            "UAC created dialog"
        );

        self.dialog_manager.insert(dialog);
        let timers_armed = self
            .dialog_manager
            .arm_session_timer(&dialog_id, self.scheduler.as_ref());
        Ok(InviteOutcome::Established {
            dialog_id,
            timers_armed,
        })
    }

    /// The INVITE to resend after a 422: same Call-ID and From tag, next
    /// CSeq, new branch and the raised Session-Expires/Min-SE.
    fn create_retry(
        &self,
        previous: &Request,
        session_timer: &mut SessionTimerContext,
    ) -> Result<Request> {
        let cseq = parse_cseq_number(previous.headers())
            .ok_or_else(|| anyhow!("INVITE without CSeq"))?
            + 1;

        let mut headers = Headers::new();
        for entry in previous.headers().iter() {
            let value = if entry.name.eq_ignore_ascii_case("Via") {
                SmolStr::new(format!(
                    "SIP/2.0/UDP placeholder;branch={}",
                    generate_branch()
                ))
            } else if entry.name.eq_ignore_ascii_case("CSeq") {
                SmolStr::new(format!("{} INVITE", cseq))
            } else {
                entry.value.clone()
            };
            headers.push(entry.name.clone(), value);
        }
        apply_headers(&mut headers, &session_timer.negotiate_outgoing());

        Ok(Request::new(
            RequestLine::new(Method::Invite, previous.uri().clone()),
            headers,
            previous.body().clone(),
        )?)
    }

    /// Creates the UPDATE or re-INVITE described by `plan` within `dialog`.
    ///
    /// Works for dialogs of either role: From and To are taken from the
    /// dialog, not from this client.
    pub fn create_session_refresh(&self, dialog: &mut Dialog, plan: &RefreshPlan) -> Result<Request> {
        let mut request = self.create_in_dialog(dialog, plan.method.clone())?;
        let headers = request.headers_mut();
        apply_headers(headers, &plan.headers);
        if plan.method == Method::Invite {
            ensure_update_allowed(headers);
        }
        debug!(
            dialog = %dialog.id,
            method = plan.method.as_str(),
            session_expires = plan.session_expires,
            "session refresh created"
        );
        Ok(request)
    }

    /// Creates a BYE request to end `dialog`.
    pub fn create_bye(&self, dialog: &mut Dialog) -> Result<Request> {
        self.create_in_dialog(dialog, Method::Bye)
    }

    fn create_in_dialog(&self, dialog: &mut Dialog, method: Method) -> Result<Request> {
        let mut headers = Headers::new();

        headers.push(
            SmolStr::new("Via"),
            SmolStr::new(format!(
                "SIP/2.0/UDP placeholder;branch={}",
                generate_branch()
            )),
        );
        headers.push(
            SmolStr::new("From"),
            SmolStr::new(format!(
                "<{}>;tag={}",
                dialog.local_uri.as_str(),
                dialog.id.local_tag
            )),
        );
        headers.push(
            SmolStr::new("To"),
            SmolStr::new(format!(
                "<{}>;tag={}",
                dialog.remote_uri.as_str(),
                dialog.id.remote_tag
            )),
        );
        headers.push(SmolStr::new("Call-ID"), dialog.id.call_id.clone());

        let cseq = dialog.next_local_cseq();
        headers.push(
            SmolStr::new("CSeq"),
            SmolStr::new(format!("{} {}", cseq, method.as_str())),
        );
        if method.can_refresh_session() {
            headers.push(
                SmolStr::new("Contact"),
                SmolStr::new(format!("<{}>", dialog.local_contact.as_str())),
            );
        }
        headers.push(SmolStr::new("Max-Forwards"), SmolStr::new("70"));
        headers.push(SmolStr::new("Content-Length"), SmolStr::new("0"));

        Ok(Request::new(
            RequestLine::new(method, dialog.remote_target.clone()),
            headers,
            Bytes::new(),
        )?)
    }

    fn format_from_header(&self) -> String {
        if let Some(ref display) = self.display_name {
            format!(
                "\"{}\" <{}>;tag={}",
                display,
                self.local_uri.as_str(),
                self.local_tag.as_str()
            )
        } else {
            format!(
                "<{}>;tag={}",
                self.local_uri.as_str(),
                self.local_tag.as_str()
            )
        }
    }
}

/// Helper to generate a random tag.
fn generate_tag() -> SmolStr {
    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    SmolStr::new(tag)
}

/// Helper to generate a branch parameter (RFC 3261 magic cookie).
fn generate_branch() -> String {
    let random: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("z9hG4bK{}", random)
}

/// Helper to generate a Call-ID.
fn generate_call_id() -> String {
    let random: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    format!("{}@localhost", random)
}

fn extract_to_uri(response: &Response) -> Option<SipUri> {
    parse_uri_from_header(header(response.headers(), "To")?)
}
