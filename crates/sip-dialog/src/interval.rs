// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session interval negotiation (RFC 4028 §§7-9).
//!
//! One [`IntervalNegotiator`] lives in each session timer context and carries
//! what has been proposed so far: our interval, our (possibly raised) Min-SE,
//! and whatever the peer proposed. It decides:
//!
//! - what to put in `Session-Expires`/`Min-SE` on an outgoing request,
//! - how to react to a 422 (raise and retry once, then give up),
//! - whether a 2xx interval is acceptable,
//! - what to answer when the peer proposes an interval.

use sip_core::RFC_MIN_SESSION_INTERVAL;
use tracing::debug;

use crate::error::SessionTimerFailure;
use crate::session_timer_config::SessionTimerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalNegotiator {
    proposed: Option<u32>,
    local_min: u32,
    peer_min: Option<u32>,
    peer_proposal: Option<u32>,
    retried: bool,
}

impl IntervalNegotiator {
    pub fn new(config: &SessionTimerConfig) -> Self {
        Self {
            proposed: None,
            local_min: config.min_interval(),
            peer_min: None,
            peer_proposal: None,
            retried: false,
        }
    }

    /// `(Session-Expires, Min-SE)` for the next outgoing request.
    ///
    /// The first call fixes the proposal at the configured default (never
    /// below our Min-SE); later calls return the same pair until a 422 raises
    /// it.
    pub fn propose(&mut self, config: &SessionTimerConfig) -> (u32, u32) {
        let local_min = self.local_min;
        let interval = *self
            .proposed
            .get_or_insert_with(|| config.default_interval().max(local_min));
        (interval, self.local_min)
    }

    /// Starts a new attempt (a session refresh) from the current interval.
    /// Each attempt gets its own single 422 retry.
    pub fn begin_attempt(&mut self, interval: u32) {
        self.proposed = Some(interval.max(self.local_min));
        self.retried = false;
    }

    /// Handles a 422 carrying the peer's `Min-SE`.
    ///
    /// Returns the raised interval to retry with, or `NegotiationFailed` when
    /// this attempt has already been retried once.
    pub fn on_interval_too_small(
        &mut self,
        response_min_se: Option<u32>,
        config: &SessionTimerConfig,
    ) -> Result<u32, SessionTimerFailure> {
        if self.retried {
            debug!(?response_min_se, "second 422 in one attempt");
            return Err(SessionTimerFailure::NegotiationFailed);
        }
        self.retried = true;

        let required = response_min_se
            .unwrap_or(self.local_min)
            .max(config.min_interval());
        self.peer_min = Some(required);
        self.local_min = self.local_min.max(required);
        let current = self.proposed.unwrap_or(config.default_interval());
        let raised = current.max(required);
        self.proposed = Some(raised);
        debug!(required, raised, "raising session interval after 422");
        Ok(raised)
    }

    /// Checks the interval a 2xx settled on. The responder may lower our
    /// proposal but not below our Min-SE.
    pub fn accept_response(&self, interval: u32) -> Result<u32, u32> {
        let floor = self.floor();
        if interval < floor {
            Err(floor)
        } else {
            Ok(interval)
        }
    }

    /// Chooses the interval to answer a peer's request with.
    ///
    /// Smaller of the peer's proposal and our default, but never below the
    /// larger of the peer's Min-SE and ours. A proposal under our own Min-SE
    /// is refused with `IntervalTooSmall` carrying that Min-SE, which the
    /// caller turns into a 422.
    pub fn answer(
        &mut self,
        peer_proposal: Option<u32>,
        peer_min: Option<u32>,
        config: &SessionTimerConfig,
    ) -> Result<u32, SessionTimerFailure> {
        self.peer_proposal = peer_proposal;
        self.peer_min = peer_min;

        let local_floor = self.local_min.max(config.min_interval());
        if let Some(proposal) = peer_proposal {
            if proposal < local_floor {
                return Err(SessionTimerFailure::IntervalTooSmall {
                    min_se: local_floor,
                });
            }
        }

        let floor = local_floor.max(peer_min.unwrap_or(RFC_MIN_SESSION_INTERVAL));
        let wanted = peer_proposal.map_or(config.default_interval(), |p| {
            p.min(config.default_interval())
        });
        Ok(wanted.max(floor))
    }

    /// Our current Min-SE.
    pub fn local_min(&self) -> u32 {
        self.local_min
    }

    pub fn proposed(&self) -> Option<u32> {
        self.proposed
    }

    pub fn peer_min(&self) -> Option<u32> {
        self.peer_min
    }

    pub fn peer_proposal(&self) -> Option<u32> {
        self.peer_proposal
    }

    pub fn has_retried(&self) -> bool {
        self.retried
    }

    fn floor(&self) -> u32 {
        self.local_min.max(RFC_MIN_SESSION_INTERVAL)
    }
}
