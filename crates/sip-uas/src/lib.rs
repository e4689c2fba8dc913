// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UAS (User Agent Server) helper for answering session timer negotiation.
//!
//! Answers INVITEs with a 2xx that carries the chosen interval and refresher,
//! or with 420/422 when the offer cannot be accepted. In-dialog UPDATE and
//! re-INVITE refreshes are answered the same way and re-arm the dialog's
//! timers.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_dialog::{DialogManager, ManualScheduler};
//! use sip_uas::UserAgentServer;
//! # use sip_core::SipUri;
//! let local_uri = SipUri::parse("sip:bob@example.com").unwrap();
//! let contact_uri = SipUri::parse("sip:bob@192.168.1.100").unwrap();
//! let uas = UserAgentServer::new(
//!     local_uri,
//!     contact_uri,
//!     Arc::new(DialogManager::new()),
//!     Arc::new(ManualScheduler::default()),
//! );
//! ```

use anyhow::{anyhow, Result};
use bytes::Bytes;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sip_core::{Headers, Method, Request, Response, SipUri, StatusLine, TIMER_OPTION_TAG};
use sip_dialog::capability::apply_headers;
use sip_dialog::{
    extract_tag, parse_uri_from_header, Dialog, DialogId, DialogManager, RequestOutcome,
    SessionTimerConfig, SessionTimerContext, TimerScheduler,
};
use sip_observe::{noop_observer, SessionTimerObserver};
use sip_parse::{header, set_header};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{info, warn};

/// UAS helper for sessions that negotiate session timers.
pub struct UserAgentServer {
    /// Local SIP URI (To/Contact)
    pub local_uri: SipUri,

    /// Contact URI for responses
    pub contact_uri: SipUri,

    /// Dialog manager for call state
    pub dialog_manager: Arc<DialogManager>,

    scheduler: Arc<dyn TimerScheduler>,
    session_timer_config: SessionTimerConfig,
    observer: Arc<dyn SessionTimerObserver>,
}

/// The response to send for an INVITE, and the dialog it created.
#[derive(Debug)]
pub struct InviteAnswer {
    pub response: Response,
    /// Set when the response is a 2xx.
    pub dialog_id: Option<DialogId>,
    pub timers_armed: bool,
}

impl UserAgentServer {
    /// Creates a new UAS with the given local URI and contact.
    pub fn new(
        local_uri: SipUri,
        contact_uri: SipUri,
        dialog_manager: Arc<DialogManager>,
        scheduler: Arc<dyn TimerScheduler>,
    ) -> Self {
        Self {
            local_uri,
            contact_uri,
            dialog_manager,
            scheduler,
            session_timer_config: SessionTimerConfig::default(),
            observer: noop_observer(),
        }
    }

    /// Replaces the session timer settings used for incoming INVITEs.
    pub fn with_session_timer_config(mut self, config: SessionTimerConfig) -> Result<Self> {
        config.validate()?;
        self.session_timer_config = config;
        Ok(self)
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionTimerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn session_timer_config(&self) -> &SessionTimerConfig {
        &self.session_timer_config
    }

    /// Creates a generic response with the given status code and reason.
    ///
    /// Via, From, To, Call-ID and CSeq are copied from the request. The To
    /// tag is left as received.
    pub fn create_response(request: &Request, code: u16, reason: &str) -> Result<Response> {
        let mut headers = copy_dialog_headers(request);
        headers.push(SmolStr::new("Content-Length"), SmolStr::new("0"));

        Ok(Response::new(
            StatusLine::new(code, reason)?,
            headers,
            Bytes::new(),
        )?)
    }

    /// Creates a 100 Trying response.
    pub fn create_trying(request: &Request) -> Result<Response> {
        Self::create_response(request, 100, "Trying")
    }

    /// Creates a 200 OK response with Contact, a To tag and an optional body.
    pub fn create_ok(&self, request: &Request, body: Option<&str>) -> Result<Response> {
        let mut headers = copy_dialog_headers(request);
        ensure_to_tag(&mut headers);
        headers.push(
            SmolStr::new("Contact"),
            SmolStr::new(format!("<{}>", self.contact_uri.as_str())),
        );

        let body = match body {
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

        Ok(Response::new(StatusLine::new(200, "OK")?, headers, body)?)
    }

    /// Creates a 420 Bad Extension listing `timer` as unsupported.
    pub fn create_bad_extension(request: &Request) -> Result<Response> {
        let mut response = Self::create_response(request, 420, "Bad Extension")?;
        response
            .headers_mut()
            .push(SmolStr::new("Unsupported"), SmolStr::new(TIMER_OPTION_TAG));
        ensure_to_tag(response.headers_mut());
        Ok(response)
    }

    /// Creates a 422 Session Interval Too Small carrying our Min-SE.
    pub fn create_session_interval_too_small(request: &Request, min_se: u32) -> Result<Response> {
        let mut response = Self::create_response(request, 422, "Session Interval Too Small")?;
        response
            .headers_mut()
            .push(SmolStr::new("Min-SE"), SmolStr::new(min_se.to_string()));
        ensure_to_tag(response.headers_mut());
        Ok(response)
    }

    /// Answers a session-establishing INVITE.
    ///
    /// On a 2xx the dialog is stored and its session timer armed; the
    /// response must then actually be sent.
    pub fn answer_invite(&self, request: &Request, sdp_body: Option<&str>) -> Result<InviteAnswer> {
        if request.method() != &Method::Invite {
            return Err(anyhow!("Not an INVITE request"));
        }

        let mut timers =
            SessionTimerContext::new_uas(self.session_timer_config.clone(), self.observer.clone());
        let headers = match timers.on_incoming_establishing_request(request) {
            RequestOutcome::Accept(headers) => headers,
            RequestOutcome::RejectBadExtension => {
                info!("rejecting INVITE that requires session timers");
                return Ok(InviteAnswer {
                    response: Self::create_bad_extension(request)?,
                    dialog_id: None,
                    timers_armed: false,
                });
            }
            RequestOutcome::RejectIntervalTooSmall { min_se } => {
                info!(min_se, "rejecting INVITE with too small Session-Expires");
                return Ok(InviteAnswer {
                    response: Self::create_session_interval_too_small(request, min_se)?,
                    dialog_id: None,
                    timers_armed: false,
                });
            }
        };

        let mut response = self.create_ok(request, sdp_body)?;
        apply_headers(response.headers_mut(), &headers);

        let remote_uri = extract_from_uri(request)?;
        let dialog = Dialog::new_uas(
            request,
            &response,
            self.local_uri.clone(),
            remote_uri,
            timers,
        )
        .ok_or_else(|| anyhow!("Failed to create dialog"))?;
        let dialog_id = dialog.id.clone();

        info!(
            call_id = %dialog_id.call_id,
            state = ?dialog.state,
            timers = %dialog.session_timer.state(),
            "UAS created dialog"
        );

        self.dialog_manager.insert(dialog);
        let timers_armed = self
            .dialog_manager
            .arm_session_timer(&dialog_id, self.scheduler.as_ref());
        Ok(InviteAnswer {
            response,
            dialog_id: Some(dialog_id),
            timers_armed,
        })
    }

    /// Answers an UPDATE or re-INVITE received on an existing dialog.
    ///
    /// An accepted refresh re-arms the dialog's timers; 420 and 422 leave
    /// them running. Unknown dialogs get a 481.
    pub fn answer_refresh(&self, request: &Request) -> Result<Response> {
        if !request.method().can_refresh_session() {
            return Err(anyhow!("{} cannot refresh a session", request.method().as_str()));
        }
        let Some(dialog_id) = self.dialog_manager.find_id_by_request(request) else {
            return Self::create_response(request, 481, "Call/Transaction Does Not Exist");
        };

        let scheduler = self.scheduler.as_ref();
        self.dialog_manager
            .with_dialog_mut(&dialog_id, |dialog| {
                if let Err(err) = dialog.update_from_request(request) {
                    warn!(dialog = %dialog_id, error = %err, "refresh rejected");
                    return Self::create_response(request, 500, "Server Internal Error");
                }
                match dialog.session_timer.on_refresh_received(request, scheduler) {
                    RequestOutcome::Accept(headers) => {
                        let mut response = self.create_ok(request, None)?;
                        apply_headers(response.headers_mut(), &headers);
                        Ok(response)
                    }
                    RequestOutcome::RejectBadExtension => Self::create_bad_extension(request),
                    RequestOutcome::RejectIntervalTooSmall { min_se } => {
                        Self::create_session_interval_too_small(request, min_se)
                    }
                }
            })
            .ok_or_else(|| anyhow!("dialog {} disappeared", dialog_id))?
    }

    /// Handles a BYE: the dialog is removed and its timers disarmed.
    pub fn handle_bye(&self, request: &Request) -> Result<Response> {
        if request.method() != &Method::Bye {
            return Err(anyhow!("Not a BYE request"));
        }
        let terminated = self
            .dialog_manager
            .find_id_by_request(request)
            .and_then(|id| self.dialog_manager.terminate(&id, self.scheduler.as_ref()));
        match terminated {
            Some(dialog) => {
                info!(call_id = %dialog.id.call_id, "dialog ended by BYE");
                Self::create_response(request, 200, "OK")
            }
            None => Self::create_response(request, 481, "Call/Transaction Does Not Exist"),
        }
    }
}

fn copy_dialog_headers(request: &Request) -> Headers {
    let mut headers = Headers::new();
    for via in request.headers().get_all("Via") {
        headers.push(SmolStr::new("Via"), via.clone());
    }
    for name in ["From", "To", "Call-ID", "CSeq"] {
        if let Some(value) = header(request.headers(), name) {
            headers.push(SmolStr::new(name), value.clone());
        }
    }
    headers
}

fn ensure_to_tag(headers: &mut Headers) {
    let Some(to) = header(headers, "To").cloned() else {
        return;
    };
    if extract_tag(&to).is_none() {
        set_header(headers, "To", format!("{};tag={}", to, generate_tag()));
    }
}

fn extract_from_uri(request: &Request) -> Result<SipUri> {
    header(request.headers(), "From")
        .and_then(|from| parse_uri_from_header(from))
        .ok_or_else(|| anyhow!("Missing or invalid From header"))
}

fn generate_tag() -> SmolStr {
    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    SmolStr::new(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_dialog::{ManualScheduler, NegotiationState, SessionTimerKind, SupportLevel};
    use sip_parse::{parse_min_se, parse_require, parse_session_expires, parse_unsupported};
    use sip_testkit::{build_invite, build_update, with_headers};
    use std::time::Duration;

    fn uri(s: &str) -> SipUri {
        SipUri::parse(s).unwrap()
    }

    fn server(scheduler: Arc<ManualScheduler>) -> UserAgentServer {
        UserAgentServer::new(
            uri("sip:bob@example.com"),
            uri("sip:bob@server.example.com"),
            Arc::new(DialogManager::new()),
            scheduler,
        )
        .with_session_timer_config(
            SessionTimerConfig::default().with_support_level(SupportLevel::Supported),
        )
        .unwrap()
    }

    fn invite(extra: &[(&str, &str)]) -> Request {
        with_headers(
            build_invite("sip:bob@example.com", "z9hG4bKuas", "call-uas@example.com"),
            extra,
        )
    }

    #[test]
    fn answers_timer_offer_as_refresher() {
        let scheduler = Arc::new(ManualScheduler::default());
        let uas = server(scheduler.clone());
        let answer = uas
            .answer_invite(
                &invite(&[("Supported", "timer"), ("Session-Expires", "1800")]),
                Some("v=0\r\n"),
            )
            .unwrap();

        assert_eq!(answer.response.code(), 200);
        let se = parse_session_expires(answer.response.headers())
            .unwrap()
            .unwrap();
        assert_eq!(se.delta_seconds(), 1800);
        assert_eq!(se.refresher(), Some(sip_core::RefresherRole::Uas));
        assert!(!parse_require(answer.response.headers()).contains("timer"));
        assert_eq!(answer.response.body().as_ref(), b"v=0\r\n");

        let dialog_id = answer.dialog_id.unwrap();
        assert!(answer.timers_armed);
        assert_eq!(
            scheduler.armed(&dialog_id),
            Some((SessionTimerKind::Refresh, Duration::from_secs(900)))
        );
    }

    #[test]
    fn too_small_offer_gets_422_with_min_se() {
        let uas = server(Arc::new(ManualScheduler::default()));
        let answer = uas
            .answer_invite(
                &invite(&[("Supported", "timer"), ("Session-Expires", "60")]),
                None,
            )
            .unwrap();

        assert_eq!(answer.response.code(), 422);
        assert_eq!(
            parse_min_se(answer.response.headers())
                .unwrap()
                .unwrap()
                .delta_seconds(),
            90
        );
        assert!(answer.dialog_id.is_none());
        assert_eq!(uas.dialog_manager.count(), 0);
    }

    #[test]
    fn required_timer_with_timers_disabled_gets_420() {
        let config = SessionTimerConfig::default().with_support_level(SupportLevel::Disabled);
        let uas = server(Arc::new(ManualScheduler::default()))
            .with_session_timer_config(config)
            .unwrap();
        let answer = uas
            .answer_invite(
                &invite(&[("Require", "timer"), ("Session-Expires", "1800")]),
                None,
            )
            .unwrap();

        assert_eq!(answer.response.code(), 420);
        assert!(parse_unsupported(answer.response.headers()).contains("timer"));
        assert!(extract_tag(header(answer.response.headers(), "To").unwrap()).is_some());
    }

    #[test]
    fn refresh_for_unknown_dialog_is_481() {
        let uas = server(Arc::new(ManualScheduler::default()));
        let update = build_update("sip:bob@example.com", "nowhere@example.com", 2);
        assert_eq!(uas.answer_refresh(&update).unwrap().code(), 481);
    }

    #[test]
    fn bye_disarms_timers() {
        let scheduler = Arc::new(ManualScheduler::default());
        let uas = server(scheduler.clone());
        let answer = uas
            .answer_invite(
                &invite(&[("Supported", "timer"), ("Session-Expires", "1800")]),
                None,
            )
            .unwrap();
        let dialog_id = answer.dialog_id.unwrap();

        let mut bye = sip_testkit::build_in_dialog(
            Method::Bye,
            "sip:bob@example.com",
            "call-uas@example.com",
            2,
        );
        let to = header(answer.response.headers(), "To").unwrap().clone();
        set_header(bye.headers_mut(), "To", to);

        assert_eq!(uas.handle_bye(&bye).unwrap().code(), 200);
        assert_eq!(scheduler.armed(&dialog_id), None);
        assert!(!uas.dialog_manager.contains(&dialog_id));
        assert_eq!(uas.handle_bye(&bye).unwrap().code(), 481);
    }

    #[test]
    fn bye_with_non_ascii_from_parameter_is_matched() {
        let uas = server(Arc::new(ManualScheduler::default()));
        let answer = uas.answer_invite(&invite(&[]), None).unwrap();
        let dialog_id = answer.dialog_id.unwrap();

        let mut bye = sip_testkit::build_in_dialog(
            Method::Bye,
            "sip:bob@example.com",
            "call-uas@example.com",
            2,
        );
        let to = header(answer.response.headers(), "To").unwrap().clone();
        set_header(bye.headers_mut(), "To", to);
        set_header(
            bye.headers_mut(),
            "From",
            format!("<sip:alice@example.com>;tagé=1;tag={}", dialog_id.remote_tag),
        );

        assert_eq!(uas.handle_bye(&bye).unwrap().code(), 200);
        assert!(!uas.dialog_manager.contains(&dialog_id));
    }

    #[test]
    fn timers_off_when_caller_does_not_offer_them() {
        let uas = server(Arc::new(ManualScheduler::default()));
        let answer = uas.answer_invite(&invite(&[]), None).unwrap();
        let dialog_id = answer.dialog_id.unwrap();

        assert_eq!(answer.response.code(), 200);
        assert!(!answer.timers_armed);
        let state = uas
            .dialog_manager
            .with_dialog(&dialog_id, |d| d.session_timer.state())
            .unwrap();
        assert_eq!(state, NegotiationState::Disabled);
    }
}
