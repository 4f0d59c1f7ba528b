use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::member::{Member, MemberId};
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApproverDesignationId(pub String);

impl std::fmt::Display for ApproverDesignationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names one member as an approver for one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverDesignation {
    pub id: ApproverDesignationId,
    pub request_id: RequestId,
    pub member_id: MemberId,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApproverDesignation {
    pub fn new(request_id: RequestId, member_id: MemberId) -> Self {
        let now = Utc::now();
        Self {
            id: ApproverDesignationId(Uuid::new_v4().to_string()),
            request_id,
            member_id,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    pub fn delete(&mut self) {
        self.deleted = true;
        self.updated_at = Utc::now();
    }
}

/// Builds one designation per distinct member, preserving input order.
///
/// Members are expected to be resolved already; resolution failures are
/// reported by the factory before this is reached.
pub fn designate_approvers(request_id: &RequestId, members: &[Member]) -> Vec<ApproverDesignation> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter(|member| seen.insert(member.id.clone()))
        .map(|member| ApproverDesignation::new(request_id.clone(), member.id.clone()))
        .collect()
}
