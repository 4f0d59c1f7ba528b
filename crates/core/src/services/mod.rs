//! Orchestration over the request store.
//!
//! Every mutation runs through [`WorkflowContext::mutate`]: load a snapshot,
//! decide against it, commit with the snapshot's version. A lost race reloads
//! and decides again, up to `workflow.max_conflict_retries` extra attempts.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::WorkflowConfig;
use crate::domain::member::{Member, MemberId, StageId};
use crate::domain::request::{Request, RequestId};
use crate::errors::{ApplicationError, WorkflowError};
use crate::ports::{
    DomainEvent, EventPublisher, MemberDirectory, NoopEventPublisher, RequestStore,
    StageDirectory, StoreError,
};
use crate::workflow::consensus::Tally;
use crate::workflow::states::TransitionOutcome;

pub mod approver;
pub mod request;

pub use approver::ApproverDesignationService;
pub use request::{RequestService, ResponseReceipt, ResponseSubmission};

/// Who is acting, and the correlation id their call is traced under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub member_id: MemberId,
    pub correlation_id: String,
}

impl Caller {
    pub fn new(member_id: MemberId, correlation_id: impl Into<String>) -> Self {
        Self { member_id, correlation_id: correlation_id.into() }
    }

    pub fn audit_context(&self) -> AuditContext {
        AuditContext::new(self.correlation_id.clone(), format!("member:{}", self.member_id))
    }
}

/// Read model returned to callers: the aggregate plus its live tally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestView {
    pub request: Request,
    pub tally: Tally,
    pub remaining_approvals: usize,
    pub one_remaining: bool,
}

impl From<Request> for RequestView {
    fn from(request: Request) -> Self {
        let tally = request.tally();
        let one_remaining = request.is_one_remain_until_approved();
        Self { remaining_approvals: tally.remaining(), tally, one_remaining, request }
    }
}

pub struct WorkflowContext {
    pub store: Arc<dyn RequestStore>,
    pub members: Arc<dyn MemberDirectory>,
    pub stages: Arc<dyn StageDirectory>,
    pub events: Arc<dyn EventPublisher>,
    pub audit: Arc<dyn AuditSink>,
    pub config: WorkflowConfig,
}

impl WorkflowContext {
    pub fn new(
        store: Arc<dyn RequestStore>,
        members: Arc<dyn MemberDirectory>,
        stages: Arc<dyn StageDirectory>,
    ) -> Self {
        Self {
            store,
            members,
            stages,
            events: Arc::new(NoopEventPublisher),
            audit: Arc::new(TracingAuditSink),
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) async fn load(&self, id: &RequestId) -> Result<Request, ApplicationError> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound(id.clone()).into())
    }

    pub(crate) async fn resolve_caller(&self, caller: &Caller) -> Result<Member, ApplicationError> {
        self.members
            .find_member(&caller.member_id)
            .await?
            .ok_or_else(|| WorkflowError::MemberNotFound(caller.member_id.clone()).into())
    }

    /// The member must belong to the project owning `stage_id`.
    pub(crate) async fn ensure_project_member(
        &self,
        stage_id: &StageId,
        member_id: &MemberId,
    ) -> Result<(), ApplicationError> {
        let stage = self
            .stages
            .find_stage(stage_id)
            .await?
            .ok_or_else(|| WorkflowError::StageNotFound(stage_id.clone()))?;
        if self.stages.is_project_member(&stage.project_id, member_id).await? {
            Ok(())
        } else {
            Err(WorkflowError::NotProjectMember {
                member_id: member_id.clone(),
                stage_id: stage.id.clone(),
            }
            .into())
        }
    }

    /// Runs `decide` against a fresh snapshot and commits the result. `decide`
    /// may run more than once and must not have side effects outside the
    /// request it is handed.
    pub(crate) async fn mutate<T, F>(
        &self,
        id: &RequestId,
        mut decide: F,
    ) -> Result<(Request, T), ApplicationError>
    where
        F: FnMut(&mut Request) -> Result<T, WorkflowError> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            let mut request = self.load(id).await?;
            let expected_version = request.version;
            let value = decide(&mut request)?;

            match self.store.commit(&request, expected_version).await {
                Ok(()) => {
                    request.version = expected_version + 1;
                    return Ok((request, value));
                }
                Err(StoreError::Conflict(reason)) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "request.commit.retry",
                        request_id = %id,
                        attempt,
                        reason = %reason,
                        "lost optimistic version race, reloading request"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Logs and audits each transition, then publishes. Publication failures
    /// are logged and swallowed; the commit already happened.
    pub(crate) async fn after_commit(
        &self,
        caller: &Caller,
        request: &Request,
        transitions: &[TransitionOutcome],
        mut events: Vec<DomainEvent>,
    ) {
        let audit = caller.audit_context();
        for outcome in transitions.iter().filter(|outcome| outcome.changed()) {
            info!(
                event_name = "request.status_changed",
                correlation_id = %caller.correlation_id,
                request_id = %request.id,
                member_id = %caller.member_id,
                from = %outcome.from,
                to = %outcome.to,
                "request status changed"
            );
            self.audit.emit(
                AuditEvent::new(
                    Some(request.id.clone()),
                    audit.correlation_id.clone(),
                    "request.status_changed",
                    AuditCategory::Request,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str()),
            );
            events.push(DomainEvent::StatusChanged {
                request_id: request.id.clone(),
                from: outcome.from,
                to: outcome.to,
            });
        }

        self.publish(caller, events).await;
    }

    async fn publish(&self, caller: &Caller, events: Vec<DomainEvent>) {
        if !self.config.publish_events {
            return;
        }
        for event in events {
            let name = event.name();
            let request_id = event.request_id().clone();
            if let Err(error) = self.events.publish(event).await {
                warn!(
                    event_name = "request.event.publish_failed",
                    correlation_id = %caller.correlation_id,
                    request_id = %request_id,
                    domain_event = name,
                    error = %error,
                    "domain event publication failed; committed change stands"
                );
            }
        }
    }
}

pub(crate) fn ensure_author_or_admin(
    request: &Request,
    member: &Member,
    action: &'static str,
) -> Result<(), WorkflowError> {
    if request.is_author(&member.id) || member.is_admin() {
        return Ok(());
    }
    Err(WorkflowError::NotAuthorized { member_id: member.id.clone(), action })
}

pub(crate) fn ensure_admin(member: &Member, action: &'static str) -> Result<(), WorkflowError> {
    if member.is_admin() {
        return Ok(());
    }
    Err(WorkflowError::NotAuthorized { member_id: member.id.clone(), action })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use crate::audit::InMemoryAuditSink;
    use crate::config::WorkflowConfig;
    use crate::domain::member::{Member, MemberId, MemberRole, ProjectId, Stage, StageId};
    use crate::ports::{InMemoryDirectory, InMemoryEventPublisher, InMemoryRequestStore};

    use super::{Caller, WorkflowContext};

    pub struct Harness {
        pub context: Arc<WorkflowContext>,
        pub store: Arc<InMemoryRequestStore>,
        pub events: InMemoryEventPublisher,
        pub audit: InMemoryAuditSink,
    }

    pub fn caller(id: &str) -> Caller {
        Caller::new(MemberId(id.to_owned()), format!("corr-{id}"))
    }

    pub fn member_ids(ids: &[&str]) -> Vec<MemberId> {
        ids.iter().map(|id| MemberId((*id).to_owned())).collect()
    }

    pub fn harness() -> Harness {
        let project = ProjectId("proj-1".to_owned());
        let mut directory = InMemoryDirectory::default()
            .with_stage(Stage {
                id: StageId("stage-1".to_owned()),
                project_id: project.clone(),
                name: "Review".to_owned(),
            })
            .with_member(Member {
                id: MemberId("admin".to_owned()),
                name: "Admin".to_owned(),
                role: MemberRole::Admin,
            });
        for id in ["author", "m-1", "m-2", "m-3", "m-4"] {
            directory = directory
                .with_member(Member {
                    id: MemberId(id.to_owned()),
                    name: id.to_uppercase(),
                    role: MemberRole::Member,
                })
                .with_project_member(&project, &MemberId(id.to_owned()));
        }

        let directory = Arc::new(directory);
        let store = Arc::new(InMemoryRequestStore::default());
        let events = InMemoryEventPublisher::default();
        let audit = InMemoryAuditSink::default();
        let context = WorkflowContext::new(store.clone(), directory.clone(), directory)
            .with_events(Arc::new(events.clone()))
            .with_audit(Arc::new(audit.clone()))
            .with_config(WorkflowConfig::default());

        Harness { context: Arc::new(context), store, events, audit }
    }
}
