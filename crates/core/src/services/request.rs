use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::attachment::{FileAttachment, Link};
use crate::domain::request::{Request, RequestId, RequestStatus};
use crate::domain::response::{Decision, Response, ResponseId};
use crate::errors::{ApplicationError, WorkflowError};
use crate::factory::{NewRequest, RequestFactory, RequestUpdate};
use crate::ports::DomainEvent;
use crate::workflow::consensus::reconcile;
use crate::workflow::states::TransitionOutcome;

use super::{ensure_admin, ensure_author_or_admin, Caller, RequestView, WorkflowContext};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseSubmission {
    pub decision: Decision,
    pub comment: Option<String>,
    pub links: Vec<Link>,
    pub files: Vec<FileAttachment>,
}

impl ResponseSubmission {
    pub fn new(decision: Decision) -> Self {
        Self { decision, comment: None, links: Vec::new(), files: Vec::new() }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseReceipt {
    pub response_id: ResponseId,
    pub status: RequestStatus,
    pub view: RequestView,
}

pub struct RequestService {
    context: Arc<WorkflowContext>,
    factory: RequestFactory,
}

impl RequestService {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        let factory = RequestFactory::new(context.members.clone(), context.stages.clone());
        Self { context, factory }
    }

    pub async fn create_request(
        &self,
        caller: &Caller,
        draft: NewRequest,
    ) -> Result<RequestView, ApplicationError> {
        let draft = NewRequest { author_id: caller.member_id.clone(), ..draft };
        let request = self.factory.create_request(draft).await?;
        self.persist_new(caller, request).await
    }

    /// Resubmits a closed request. The parent is read, never written.
    pub async fn create_re_request(
        &self,
        caller: &Caller,
        parent_id: &RequestId,
        draft: NewRequest,
    ) -> Result<RequestView, ApplicationError> {
        let parent = self.context.load(parent_id).await?;
        let draft = NewRequest { author_id: caller.member_id.clone(), ..draft };
        let request = self.factory.create_re_request(&parent, draft).await?;
        self.persist_new(caller, request).await
    }

    pub async fn update_request(
        &self,
        caller: &Caller,
        request_id: &RequestId,
        update: RequestUpdate,
    ) -> Result<RequestView, ApplicationError> {
        let member = self.context.resolve_caller(caller).await?;
        let snapshot = self.context.load(request_id).await?;
        let prepared = self.factory.prepare_update(&snapshot.stage_id, update).await?;

        let (request, transition) = self
            .context
            .mutate(request_id, |request| {
                ensure_author_or_admin(request, &member, "update this request")?;
                let roster_grew = prepared.apply(request)?;
                if roster_grew {
                    Ok(reconcile(request)?)
                } else {
                    Ok(None)
                }
            })
            .await?;

        info!(
            event_name = "request.updated",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            member_id = %caller.member_id,
            roster_size = request.active_approvers().count(),
            "request updated"
        );
        self.context.after_commit(caller, &request, &transitions(transition), Vec::new()).await;
        Ok(request.into())
    }

    /// Soft-deletes the request. Recorded responses and designations stay.
    pub async fn withdraw_request(
        &self,
        caller: &Caller,
        request_id: &RequestId,
    ) -> Result<(), ApplicationError> {
        let member = self.context.resolve_caller(caller).await?;
        let (request, ()) = self
            .context
            .mutate(request_id, |request| {
                ensure_author_or_admin(request, &member, "withdraw this request")?;
                request.delete();
                Ok(())
            })
            .await?;

        info!(
            event_name = "request.withdrawn",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            member_id = %caller.member_id,
            status = %request.status,
            "request withdrawn"
        );
        self.emit_audit(caller, &request.id, "request.withdrawn", AuditCategory::Request);
        let events = vec![DomainEvent::RequestWithdrawn {
            request_id: request.id.clone(),
            member_id: caller.member_id.clone(),
        }];
        self.context.after_commit(caller, &request, &[], events).await;
        Ok(())
    }

    /// Records the caller's decision and re-runs consensus in the same commit.
    pub async fn submit_response(
        &self,
        caller: &Caller,
        request_id: &RequestId,
        submission: ResponseSubmission,
    ) -> Result<ResponseReceipt, ApplicationError> {
        let approver = caller.member_id.clone();
        let snapshot = self.context.load(request_id).await?;
        if snapshot.is_active_approver(&approver) {
            self.context.ensure_project_member(&snapshot.stage_id, &approver).await?;
        }

        let (request, (response_id, transition)) = self
            .context
            .mutate(request_id, |request| {
                if request.status.is_terminal() {
                    return Err(WorkflowError::TerminalState {
                        request_id: request.id.clone(),
                        status: request.status,
                    });
                }
                if !request.is_active_approver(&approver) {
                    return Err(WorkflowError::NotDesignatedApprover {
                        request_id: request.id.clone(),
                        member_id: approver.clone(),
                    });
                }
                if request.active_response_from(&approver).is_some() {
                    return Err(WorkflowError::DuplicateResponse {
                        request_id: request.id.clone(),
                        member_id: approver.clone(),
                    });
                }

                let response = Response::new(
                    request.id.clone(),
                    approver.clone(),
                    submission.decision,
                    submission.comment.clone(),
                )
                .with_attachments(submission.links.clone(), submission.files.clone());
                let response_id = response.id.clone();
                request.add_response(response);
                Ok((response_id, reconcile(request)?))
            })
            .await?;

        info!(
            event_name = "request.response_recorded",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            member_id = %approver,
            decision = submission.decision.as_str(),
            status = %request.status,
            "response recorded"
        );
        self.context.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                caller.correlation_id.clone(),
                "request.response_recorded",
                AuditCategory::Response,
                caller.audit_context().actor,
                AuditOutcome::Success,
            )
            .with_metadata("decision", submission.decision.as_str())
            .with_metadata("response_id", response_id.0.clone()),
        );
        let events = vec![DomainEvent::ResponseRecorded {
            request_id: request.id.clone(),
            member_id: approver,
            decision: submission.decision,
        }];
        self.context.after_commit(caller, &request, &transitions(transition), events).await;

        Ok(ResponseReceipt { response_id, status: request.status, view: request.into() })
    }

    /// Admin correction. Consensus is only re-run while the request is open,
    /// and an open request never moves backward.
    pub async fn delete_response(
        &self,
        caller: &Caller,
        response_id: &ResponseId,
    ) -> Result<RequestView, ApplicationError> {
        let member = self.context.resolve_caller(caller).await?;
        ensure_admin(&member, "delete responses")?;

        let request_id = self
            .context
            .store
            .find_request_for_response(response_id)
            .await?
            .ok_or_else(|| WorkflowError::ResponseNotFound(response_id.clone()))?;

        let (request, transition) = self
            .context
            .mutate(&request_id, |request| {
                match request.response_mut(response_id) {
                    Some(response) if response.is_active() => response.delete(),
                    _ => return Err(WorkflowError::ResponseNotFound(response_id.clone())),
                }
                if request.status.is_terminal() {
                    Ok(None)
                } else {
                    Ok(reconcile(request)?)
                }
            })
            .await?;

        info!(
            event_name = "request.response_deleted",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            response_id = %response_id,
            status = %request.status,
            "response deleted"
        );
        self.emit_audit(caller, &request.id, "request.response_deleted", AuditCategory::Administration);
        self.context.after_commit(caller, &request, &transitions(transition), Vec::new()).await;
        Ok(request.into())
    }

    /// Admin rollback of a rejection whose rejecting response has since been
    /// removed. Consensus runs straight after, so a fully approved roster
    /// lands on APPROVED rather than PENDING.
    pub async fn reopen_request(
        &self,
        caller: &Caller,
        request_id: &RequestId,
    ) -> Result<RequestView, ApplicationError> {
        let member = self.context.resolve_caller(caller).await?;
        ensure_admin(&member, "reopen requests")?;

        let (request, transitions) = self
            .context
            .mutate(request_id, |request| {
                if request.status == RequestStatus::Rejected && request.tally().rejections > 0 {
                    return Err(WorkflowError::Validation(format!(
                        "request {} still carries an active rejection",
                        request.id
                    )));
                }
                let mut transitions = vec![request.change_status_to_pending()?];
                if let Some(outcome) = reconcile(request)? {
                    transitions.push(outcome);
                }
                Ok(transitions)
            })
            .await?;

        info!(
            event_name = "request.reopened",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            member_id = %caller.member_id,
            status = %request.status,
            "request reopened"
        );
        self.emit_audit(caller, &request.id, "request.reopened", AuditCategory::Administration);
        self.context.after_commit(caller, &request, &transitions, Vec::new()).await;
        Ok(request.into())
    }

    pub async fn find_request(&self, request_id: &RequestId) -> Result<RequestView, ApplicationError> {
        Ok(self.context.load(request_id).await?.into())
    }

    /// The request followed by its ancestors, newest first. A withdrawn
    /// ancestor ends the walk.
    pub async fn request_chain(&self, request_id: &RequestId) -> Result<Vec<Request>, ApplicationError> {
        let mut chain = vec![self.context.load(request_id).await?];
        let mut visited: HashSet<RequestId> = HashSet::from([request_id.clone()]);

        while let Some(parent_id) = chain.last().and_then(|request| request.parent_id.clone()) {
            if !visited.insert(parent_id.clone()) {
                break;
            }
            match self.context.store.load(&parent_id).await? {
                Some(parent) => chain.push(parent),
                None => break,
            }
        }

        Ok(chain)
    }

    async fn persist_new(
        &self,
        caller: &Caller,
        request: Request,
    ) -> Result<RequestView, ApplicationError> {
        self.context.store.insert(&request).await?;

        info!(
            event_name = "request.created",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            member_id = %caller.member_id,
            parent_id = request.parent_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            roster_size = request.active_approvers().count(),
            "request created"
        );
        self.emit_audit(caller, &request.id, "request.created", AuditCategory::Request);
        let events = vec![DomainEvent::RequestCreated {
            request_id: request.id.clone(),
            stage_id: request.stage_id.clone(),
            author_id: request.author_id.clone(),
            parent_id: request.parent_id.clone(),
        }];
        self.context.after_commit(caller, &request, &[], events).await;
        Ok(request.into())
    }

    fn emit_audit(
        &self,
        caller: &Caller,
        request_id: &RequestId,
        event_type: &str,
        category: AuditCategory,
    ) {
        let audit = caller.audit_context();
        self.context.audit.emit(AuditEvent::new(
            Some(request_id.clone()),
            audit.correlation_id,
            event_type,
            category,
            audit.actor,
            AuditOutcome::Success,
        ));
    }
}

fn transitions(outcome: Option<TransitionOutcome>) -> Vec<TransitionOutcome> {
    outcome.into_iter().collect()
}
