use thiserror::Error;

use crate::workflow::states::{RequestEvent, RequestStatus, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: RequestStatus, event: RequestEvent },
}

/// The complete transition table of the approval workflow.
pub fn transition(
    current: RequestStatus,
    event: RequestEvent,
) -> Result<TransitionOutcome, TransitionError> {
    use RequestEvent::{FinalApproval, PartialApproval, Rejection, Reopen};
    use RequestStatus::{Approved, Approving, Pending, Rejected};

    let to = match (current, event) {
        (Pending, PartialApproval) | (Approving, PartialApproval) => Approving,
        (Pending, FinalApproval) | (Approving, FinalApproval) => Approved,
        (Pending, Rejection) | (Approving, Rejection) => Rejected,
        (Rejected, Reopen) => Pending,
        _ => return Err(TransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}
