//! Consensus evaluation over the active roster.
//!
//! Everything here is a pure function of the current aggregate state. Only
//! responses that are active *and* come from an active roster member count,
//! so removing an approver also removes the weight of their decision.

use serde::{Deserialize, Serialize};

use crate::domain::request::Request;
use crate::workflow::engine::TransitionError;
use crate::workflow::states::{RequestEvent, RequestStatus, TransitionOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub roster_size: usize,
    pub approvals: usize,
    pub rejections: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Approving,
    Approved,
    Rejected,
}

impl Tally {
    pub fn verdict(&self) -> Verdict {
        if self.rejections > 0 {
            Verdict::Rejected
        } else if self.roster_size > 0 && self.approvals >= self.roster_size {
            Verdict::Approved
        } else if self.approvals > 0 {
            Verdict::Approving
        } else {
            Verdict::Pending
        }
    }

    pub fn remaining(&self) -> usize {
        self.roster_size.saturating_sub(self.approvals)
    }
}

pub fn tally(request: &Request) -> Tally {
    let mut tally =
        Tally { roster_size: request.active_approvers().count(), ..Tally::default() };

    for response in request.active_responses() {
        if !request.is_active_approver(&response.member_id) {
            continue;
        }
        if response.is_approval() {
            tally.approvals += 1;
        } else {
            tally.rejections += 1;
        }
    }

    tally
}

/// The event the current tally calls for, if the request is still open.
pub fn pending_event(request: &Request) -> Option<RequestEvent> {
    if request.status.is_terminal() {
        return None;
    }

    match tally(request).verdict() {
        Verdict::Rejected => Some(RequestEvent::Rejection),
        Verdict::Approved => Some(RequestEvent::FinalApproval),
        Verdict::Approving if request.status == RequestStatus::Pending => {
            Some(RequestEvent::PartialApproval)
        }
        Verdict::Approving | Verdict::Pending => None,
    }
}

/// Re-runs consensus and applies the resulting transition. Called after every
/// response or roster mutation.
pub fn reconcile(request: &mut Request) -> Result<Option<TransitionOutcome>, TransitionError> {
    match pending_event(request) {
        Some(event) => request.apply(event).map(Some),
        None => Ok(None),
    }
}
