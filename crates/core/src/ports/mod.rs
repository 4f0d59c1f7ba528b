//! Contracts for the collaborators the workflow consumes: the request store,
//! the member and stage directories, and domain-event publication.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approver::ApproverDesignationId;
use crate::domain::member::{Member, MemberId, ProjectId, Stage, StageId};
use crate::domain::request::{Request, RequestId, RequestStatus};
use crate::domain::response::{Decision, ResponseId};

pub mod memory;

pub use memory::{
    InMemoryDirectory, InMemoryEventPublisher, InMemoryRequestStore, NoopEventPublisher,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The optimistic version check failed or a uniqueness guard fired.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Loads an active request together with its full roster, responses and
    /// attachments. Withdrawn requests resolve to `None`.
    async fn load(&self, id: &RequestId) -> Result<Option<Request>, StoreError>;

    /// Persists a brand-new aggregate in one unit.
    async fn insert(&self, request: &Request) -> Result<(), StoreError>;

    /// Writes `request` only if the stored version still equals
    /// `expected_version`, bumping the stored version by one.
    async fn commit(&self, request: &Request, expected_version: i64) -> Result<(), StoreError>;

    async fn find_request_for_approver(
        &self,
        id: &ApproverDesignationId,
    ) -> Result<Option<RequestId>, StoreError>;

    async fn find_request_for_response(
        &self,
        id: &ResponseId,
    ) -> Result<Option<RequestId>, StoreError>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn find_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError>;

    /// Returns the resolvable subset of `ids`; callers diff to find the missing.
    async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, StoreError>;
}

#[async_trait]
pub trait StageDirectory: Send + Sync {
    async fn find_stage(&self, id: &StageId) -> Result<Option<Stage>, StoreError>;

    async fn is_project_member(
        &self,
        project_id: &ProjectId,
        member_id: &MemberId,
    ) -> Result<bool, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    RequestCreated {
        request_id: RequestId,
        stage_id: StageId,
        author_id: MemberId,
        parent_id: Option<RequestId>,
    },
    ResponseRecorded {
        request_id: RequestId,
        member_id: MemberId,
        decision: Decision,
    },
    StatusChanged {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
    ApproverRemoved {
        request_id: RequestId,
        approver_id: ApproverDesignationId,
        member_id: MemberId,
    },
    RequestWithdrawn {
        request_id: RequestId,
        member_id: MemberId,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request.created",
            Self::ResponseRecorded { .. } => "request.response_recorded",
            Self::StatusChanged { .. } => "request.status_changed",
            Self::ApproverRemoved { .. } => "request.approver_removed",
            Self::RequestWithdrawn { .. } => "request.withdrawn",
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::RequestCreated { request_id, .. }
            | Self::ResponseRecorded { request_id, .. }
            | Self::StatusChanged { request_id, .. }
            | Self::ApproverRemoved { request_id, .. }
            | Self::RequestWithdrawn { request_id, .. } => request_id,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("event publication failed: {0}")]
pub struct PublishError(pub String);

/// Fire-and-forget publication after a committed change. A failure here never
/// undoes the change that produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), PublishError>;
}
