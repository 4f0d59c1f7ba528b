use serde::Serialize;
use thiserror::Error;

use crate::domain::approver::ApproverDesignationId;
use crate::domain::member::{MemberId, StageId};
use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::response::ResponseId;
use crate::ports::StoreError;
use crate::workflow::engine::TransitionError;

/// Coarse classification callers can branch on; every error maps to exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Authorization,
    RosterViolation,
    TerminalState,
    ResolutionFailure,
    Validation,
    Conflict,
    Persistence,
    Configuration,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("request {0} not found")]
    RequestNotFound(RequestId),
    #[error("approver designation {0} not found")]
    ApproverNotFound(ApproverDesignationId),
    #[error("response {0} not found")]
    ResponseNotFound(ResponseId),
    #[error("stage {0} not found")]
    StageNotFound(StageId),
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("member {member_id} is not allowed to {action}")]
    NotAuthorized { member_id: MemberId, action: &'static str },
    #[error("member {member_id} does not belong to the project owning stage {stage_id}")]
    NotProjectMember { member_id: MemberId, stage_id: StageId },
    #[error(
        "approvers do not belong to the project owning stage {stage_id}: {}",
        join_ids(.member_ids)
    )]
    ApproversOutsideProject { stage_id: StageId, member_ids: Vec<MemberId> },
    #[error("member {member_id} is not a designated approver for request {request_id}")]
    NotDesignatedApprover { request_id: RequestId, member_id: MemberId },
    #[error("member {member_id} has already responded to request {request_id}")]
    DuplicateResponse { request_id: RequestId, member_id: MemberId },
    #[error("request {request_id} is already {status} and accepts no further responses")]
    TerminalState { request_id: RequestId, status: RequestStatus },
    #[error("approver members could not be resolved: {}", join_ids(.member_ids))]
    UnresolvedApprovers { member_ids: Vec<MemberId> },
    #[error("a request needs at least one approver")]
    EmptyRoster,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

fn join_ids(ids: &[MemberId]) -> String {
    ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", ")
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestNotFound(_)
            | Self::ApproverNotFound(_)
            | Self::ResponseNotFound(_)
            | Self::StageNotFound(_)
            | Self::MemberNotFound(_) => ErrorKind::NotFound,
            Self::NotAuthorized { .. }
            | Self::NotProjectMember { .. }
            | Self::ApproversOutsideProject { .. } => ErrorKind::Authorization,
            Self::NotDesignatedApprover { .. } | Self::DuplicateResponse { .. } => {
                ErrorKind::RosterViolation
            }
            Self::TerminalState { .. } => ErrorKind::TerminalState,
            Self::UnresolvedApprovers { .. } => ErrorKind::ResolutionFailure,
            Self::EmptyRoster | Self::Validation(_) | Self::Transition(_) => ErrorKind::Validation,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequestNotFound(_) => "request_not_found",
            Self::ApproverNotFound(_) => "approver_not_found",
            Self::ResponseNotFound(_) => "response_not_found",
            Self::StageNotFound(_) => "stage_not_found",
            Self::MemberNotFound(_) => "member_not_found",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::NotProjectMember { .. } | Self::ApproversOutsideProject { .. } => {
                "not_project_member"
            }
            Self::NotDesignatedApprover { .. } => "not_designated_approver",
            Self::DuplicateResponse { .. } => "duplicate_response",
            Self::TerminalState { .. } => "request_terminal",
            Self::UnresolvedApprovers { .. } => "unresolved_approvers",
            Self::EmptyRoster => "empty_roster",
            Self::Validation(_) => "validation_failed",
            Self::Transition(_) => "invalid_transition",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Workflow(error) => error.kind(),
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Workflow(error) => error.code(),
            Self::Conflict(_) => "concurrent_modification",
            Self::Persistence(_) => "persistence_failure",
            Self::Configuration(_) => "configuration_failure",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<TransitionError> for ApplicationError {
    fn from(value: TransitionError) -> Self {
        Self::Workflow(WorkflowError::Transition(value))
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Backend(message) => Self::Persistence(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { code: &'static str, message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { code: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested record does not exist or was withdrawn.",
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::Conflict { .. } => {
                "The request is not in a state that accepts this action. Refresh and retry."
            }
            Self::Unprocessable { .. } => "Some referenced members could not be found.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { code, .. }
            | Self::Forbidden { code, .. }
            | Self::Conflict { code, .. }
            | Self::Unprocessable { code, .. }
            | Self::BadRequest { code, .. }
            | Self::ServiceUnavailable { code, .. }
            | Self::Internal { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound { message, .. }
            | Self::Forbidden { message, .. }
            | Self::Conflict { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id.as_str(),
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let code = value.code();
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value.kind() {
            ErrorKind::NotFound => Self::NotFound { code, message, correlation_id },
            ErrorKind::Authorization => Self::Forbidden { code, message, correlation_id },
            ErrorKind::RosterViolation | ErrorKind::TerminalState | ErrorKind::Conflict => {
                Self::Conflict { code, message, correlation_id }
            }
            ErrorKind::ResolutionFailure => Self::Unprocessable { code, message, correlation_id },
            ErrorKind::Validation => Self::BadRequest { code, message, correlation_id },
            ErrorKind::Persistence => Self::ServiceUnavailable { code, message, correlation_id },
            ErrorKind::Configuration => Self::Internal { code, message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::member::{MemberId, StageId};
    use crate::domain::request::{RequestId, RequestStatus};
    use crate::errors::{ApplicationError, ErrorKind, InterfaceError, WorkflowError};
    use crate::ports::StoreError;

    #[test]
    fn roster_violation_maps_to_conflict_interface_error() {
        let interface = ApplicationError::from(WorkflowError::DuplicateResponse {
            request_id: RequestId("REQ-1".to_owned()),
            member_id: MemberId("m-1".to_owned()),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { code: "duplicate_response", ref correlation_id, .. }
                if correlation_id == "req-1"
        ));
    }

    #[test]
    fn terminal_state_error_names_the_status() {
        let error = WorkflowError::TerminalState {
            request_id: RequestId("REQ-9".to_owned()),
            status: RequestStatus::Rejected,
        };
        assert_eq!(error.kind(), ErrorKind::TerminalState);
        assert!(error.to_string().contains("already rejected"));
    }

    #[test]
    fn unresolved_approvers_lists_every_missing_id() {
        let error = WorkflowError::UnresolvedApprovers {
            member_ids: vec![MemberId("m-7".to_owned()), MemberId("m-8".to_owned())],
        };
        assert_eq!(error.to_string(), "approver members could not be resolved: m-7, m-8");
        assert_eq!(error.kind(), ErrorKind::ResolutionFailure);

        let interface = ApplicationError::from(error).into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Unprocessable { .. }));
        assert_eq!(interface.code(), "unresolved_approvers");
    }

    #[test]
    fn approvers_outside_the_project_are_named_together() {
        let error = WorkflowError::ApproversOutsideProject {
            stage_id: StageId("stage-1".to_owned()),
            member_ids: vec![MemberId("m-5".to_owned()), MemberId("m-6".to_owned())],
        };
        assert_eq!(
            error.to_string(),
            "approvers do not belong to the project owning stage stage-1: m-5, m-6"
        );

        let interface = ApplicationError::from(error).into_interface("req-4");
        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.code(), "not_project_member");
    }

    #[test]
    fn authorization_maps_to_forbidden() {
        let interface = ApplicationError::from(WorkflowError::NotAuthorized {
            member_id: MemberId("m-3".to_owned()),
            action: "withdraw this request",
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.user_message(), "You are not allowed to perform this action.");
    }

    #[test]
    fn store_backend_error_maps_to_service_unavailable() {
        let interface = ApplicationError::from(StoreError::Backend("database is locked".to_owned()))
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-4");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("bad retry budget".to_owned())
            .into_interface("req-5");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.message(), "configuration failure: bad retry budget");
    }
}
