use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approver::ApproverDesignationId;
use crate::errors::{ApplicationError, WorkflowError};
use crate::ports::DomainEvent;
use crate::workflow::consensus::reconcile;

use super::{ensure_author_or_admin, Caller, RequestView, WorkflowContext};

pub struct ApproverDesignationService {
    context: Arc<WorkflowContext>,
}

impl ApproverDesignationService {
    pub fn new(context: Arc<WorkflowContext>) -> Self {
        Self { context }
    }

    /// Removes one approver and re-runs consensus. Shrinking the roster can
    /// complete an approval that was waiting only on the removed member.
    pub async fn delete_approver(
        &self,
        caller: &Caller,
        approver_id: &ApproverDesignationId,
    ) -> Result<RequestView, ApplicationError> {
        let member = self.context.resolve_caller(caller).await?;
        let request_id = self
            .context
            .store
            .find_request_for_approver(approver_id)
            .await?
            .ok_or_else(|| WorkflowError::ApproverNotFound(approver_id.clone()))?;

        let (request, (removed_member, transition)) = self
            .context
            .mutate(&request_id, |request| {
                ensure_author_or_admin(request, &member, "remove approvers")?;
                let removed = match request.approver_mut(approver_id) {
                    Some(approver) if approver.is_active() => {
                        approver.delete();
                        approver.member_id.clone()
                    }
                    _ => return Err(WorkflowError::ApproverNotFound(approver_id.clone())),
                };
                Ok((removed, reconcile(request)?))
            })
            .await?;

        info!(
            event_name = "request.approver_removed",
            correlation_id = %caller.correlation_id,
            request_id = %request.id,
            member_id = %removed_member,
            roster_size = request.active_approvers().count(),
            status = %request.status,
            "approver removed"
        );
        self.context.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                caller.correlation_id.clone(),
                "request.approver_removed",
                AuditCategory::Roster,
                caller.audit_context().actor,
                AuditOutcome::Success,
            )
            .with_metadata("approver_id", approver_id.0.clone())
            .with_metadata("member_id", removed_member.0.clone()),
        );
        let events = vec![DomainEvent::ApproverRemoved {
            request_id: request.id.clone(),
            approver_id: approver_id.clone(),
            member_id: removed_member,
        }];
        let transitions: Vec<_> = transition.into_iter().collect();
        self.context.after_commit(caller, &request, &transitions, events).await;

        Ok(request.into())
    }
}
