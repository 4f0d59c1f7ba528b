use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approver::{ApproverDesignation, ApproverDesignationId};
use crate::domain::attachment::{FileAttachment, Link};
use crate::domain::member::{MemberId, StageId};
use crate::domain::response::{Response, ResponseId};
use crate::workflow::consensus::{self, Tally};
use crate::workflow::engine::{transition, TransitionError};
use crate::workflow::states::{RequestEvent, TransitionOutcome};

pub use crate::workflow::states::RequestStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate root of the approval workflow.
///
/// Owns its roster and responses. Status only changes through the transition
/// table in [`crate::workflow::engine`]; the aggregate never recounts the
/// roster on its own, that is the orchestrator's job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub stage_id: StageId,
    pub author_id: MemberId,
    /// The request this one resubmits, if any.
    pub parent_id: Option<RequestId>,
    pub title: String,
    pub content: String,
    pub status: RequestStatus,
    pub approvers: Vec<ApproverDesignation>,
    pub responses: Vec<Response>,
    pub links: Vec<Link>,
    pub files: Vec<FileAttachment>,
    pub deleted: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn create(
        author_id: MemberId,
        stage_id: StageId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId(Uuid::new_v4().to_string()),
            stage_id,
            author_id,
            parent_id: None,
            title: title.into(),
            content: content.into(),
            status: RequestStatus::Pending,
            approvers: Vec::new(),
            responses: Vec::new(),
            links: Vec::new(),
            files: Vec::new(),
            deleted: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Starts a fresh request superseding `parent_id`. The parent is untouched.
    pub fn create_re_request(
        parent_id: RequestId,
        author_id: MemberId,
        stage_id: StageId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut request = Self::create(author_id, stage_id, title, content);
        request.parent_id = Some(parent_id);
        request
    }

    pub fn approve(&mut self) -> Result<TransitionOutcome, TransitionError> {
        self.apply(RequestEvent::FinalApproval)
    }

    pub fn reject(&mut self) -> Result<TransitionOutcome, TransitionError> {
        self.apply(RequestEvent::Rejection)
    }

    pub fn approving(&mut self) -> Result<TransitionOutcome, TransitionError> {
        self.apply(RequestEvent::PartialApproval)
    }

    /// Administrative rollback after a rejection has been withdrawn.
    pub fn change_status_to_pending(&mut self) -> Result<TransitionOutcome, TransitionError> {
        self.apply(RequestEvent::Reopen)
    }

    pub fn apply(&mut self, event: RequestEvent) -> Result<TransitionOutcome, TransitionError> {
        let outcome = transition(self.status, event)?;
        if outcome.changed() {
            self.status = outcome.to;
            self.touch();
        }
        Ok(outcome)
    }

    pub fn add_approvers(&mut self, approvers: Vec<ApproverDesignation>) {
        if approvers.is_empty() {
            return;
        }
        self.approvers.extend(approvers);
        self.touch();
    }

    pub fn add_links(&mut self, links: Vec<Link>) {
        let before = self.links.len();
        for link in links {
            if !self.links.iter().any(|existing| existing.url == link.url) {
                self.links.push(link);
            }
        }
        if self.links.len() != before {
            self.touch();
        }
    }

    pub fn add_files(&mut self, files: Vec<FileAttachment>) {
        if files.is_empty() {
            return;
        }
        self.files.extend(files);
        self.touch();
    }

    pub fn add_response(&mut self, response: Response) {
        self.responses.push(response);
        self.touch();
    }

    pub fn edit(&mut self, title: Option<String>, content: Option<String>) {
        let mut changed = false;
        if let Some(title) = title {
            self.title = title;
            changed = true;
        }
        if let Some(content) = content {
            self.content = content;
            changed = true;
        }
        if changed {
            self.touch();
        }
    }

    /// Withdrawal. Roster and responses stay for audit.
    pub fn delete(&mut self) {
        self.deleted = true;
        self.touch();
    }

    pub fn is_author(&self, member_id: &MemberId) -> bool {
        &self.author_id == member_id
    }

    pub fn active_approvers(&self) -> impl Iterator<Item = &ApproverDesignation> {
        self.approvers.iter().filter(|approver| approver.is_active())
    }

    pub fn active_responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.iter().filter(|response| response.is_active())
    }

    pub fn is_active_approver(&self, member_id: &MemberId) -> bool {
        self.active_approvers().any(|approver| &approver.member_id == member_id)
    }

    pub fn active_response_from(&self, member_id: &MemberId) -> Option<&Response> {
        self.active_responses().find(|response| &response.member_id == member_id)
    }

    pub fn approver_mut(&mut self, id: &ApproverDesignationId) -> Option<&mut ApproverDesignation> {
        self.approvers.iter_mut().find(|approver| &approver.id == id)
    }

    pub fn response_mut(&mut self, id: &ResponseId) -> Option<&mut Response> {
        self.responses.iter_mut().find(|response| &response.id == id)
    }

    pub fn tally(&self) -> Tally {
        consensus::tally(self)
    }

    /// True when exactly one more approval would complete consensus.
    pub fn is_one_remain_until_approved(&self) -> bool {
        let tally = self.tally();
        tally.roster_size > 0 && tally.approvals + 1 == tally.roster_size
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
