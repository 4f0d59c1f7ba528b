pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod factory;
pub mod ports;
pub mod services;
pub mod workflow;

pub use domain::approver::{ApproverDesignation, ApproverDesignationId};
pub use domain::member::{Member, MemberId, MemberRole, ProjectId, Stage, StageId};
pub use domain::request::{Request, RequestId, RequestStatus};
pub use domain::response::{Decision, Response, ResponseId};
pub use errors::{ApplicationError, ErrorKind, InterfaceError, WorkflowError};
pub use factory::{NewRequest, RequestFactory, RequestUpdate};
pub use services::{
    ApproverDesignationService, Caller, RequestService, RequestView, ResponseReceipt,
    ResponseSubmission, WorkflowContext,
};
