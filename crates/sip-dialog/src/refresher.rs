// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresher election.
//!
//! The wire carries `refresher=uac|uas`, which is relative to whichever
//! transaction carries the header. A dialog cares about `Local`/`Remote`, so
//! every conversion takes `local_is_uac`: whether this side sent the request
//! of that transaction.

use sip_core::RefresherRole;
use tracing::debug;

use crate::session_timer_config::RefresherPreference;

/// Which end of the dialog sends refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Refresher {
    Local,
    Remote,
}

impl Refresher {
    pub fn from_role(role: RefresherRole, local_is_uac: bool) -> Self {
        match (role, local_is_uac) {
            (RefresherRole::Uac, true) | (RefresherRole::Uas, false) => Refresher::Local,
            (RefresherRole::Uac, false) | (RefresherRole::Uas, true) => Refresher::Remote,
        }
    }

    pub fn to_role(self, local_is_uac: bool) -> RefresherRole {
        let local = if local_is_uac {
            RefresherRole::Uac
        } else {
            RefresherRole::Uas
        };
        match self {
            Refresher::Local => local,
            Refresher::Remote => local.opposite(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Refresher::Local)
    }
}

/// The `refresher` parameter a proposer attaches, if any.
pub fn proposal_param(
    preference: RefresherPreference,
    local_is_uac: bool,
) -> Option<RefresherRole> {
    match preference {
        RefresherPreference::None => None,
        RefresherPreference::LocalPreferred => Some(Refresher::Local.to_role(local_is_uac)),
        RefresherPreference::RemotePreferred => Some(Refresher::Remote.to_role(local_is_uac)),
    }
}

/// Resolves the refresher from a 2xx as the request's sender.
///
/// The responder has the final say; a choice that differs from our proposal
/// is accepted as is. A 2xx without the parameter falls back to
/// `default_role`.
pub fn resolve_from_response(
    proposed: Option<RefresherRole>,
    answered: Option<RefresherRole>,
    default_role: RefresherRole,
) -> Refresher {
    let role = answered.unwrap_or(default_role);
    if let (Some(p), Some(a)) = (proposed, answered) {
        if p != a {
            debug!(proposed = %p, answered = %a, "responder overrode refresher proposal");
        }
    }
    Refresher::from_role(role, true)
}

/// Chooses the refresher tag for a 2xx we send.
///
/// A tag in the request is honoured, then our own preference, then
/// `default_role`. A peer that did not advertise `timer` cannot refresh, so
/// the answer is always `uas` in that case.
pub fn choose_for_answer(
    requested: Option<RefresherRole>,
    preference: RefresherPreference,
    peer_supports_timer: bool,
    default_role: RefresherRole,
) -> RefresherRole {
    if !peer_supports_timer {
        return RefresherRole::Uas;
    }
    if let Some(role) = requested {
        return role;
    }
    proposal_param(preference, false).unwrap_or(default_role)
}
