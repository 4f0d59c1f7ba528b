use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::attachment::{FileAttachment, Link};
use crate::domain::member::MemberId;
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseId(pub String);

impl std::fmt::Display for ResponseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One approver's decision on one request. Content never changes after
/// creation; only the soft-delete flag does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub member_id: MemberId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub links: Vec<Link>,
    pub files: Vec<FileAttachment>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Response {
    pub fn new(
        request_id: RequestId,
        member_id: MemberId,
        decision: Decision,
        comment: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ResponseId(Uuid::new_v4().to_string()),
            request_id,
            member_id,
            decision,
            comment: comment.map(|text| text.trim().to_owned()).filter(|text| !text.is_empty()),
            links: Vec::new(),
            files: Vec::new(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_attachments(mut self, links: Vec<Link>, files: Vec<FileAttachment>) -> Self {
        self.links = links;
        self.files = files;
        self
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    pub fn is_approval(&self) -> bool {
        self.decision == Decision::Approved
    }

    pub fn is_rejection(&self) -> bool {
        self.decision == Decision::Rejected
    }

    pub fn delete(&mut self) {
        self.deleted = true;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::member::MemberId;
    use crate::domain::request::RequestId;

    use super::{Decision, Response};

    #[test]
    fn decision_accepts_verb_and_past_tense() {
        assert_eq!(Decision::parse("approve"), Some(Decision::Approved));
        assert_eq!(Decision::parse("REJECTED"), Some(Decision::Rejected));
        assert_eq!(Decision::parse("abstain"), None);
    }

    #[test]
    fn blank_comment_is_dropped() {
        let response = Response::new(
            RequestId("REQ-1".to_owned()),
            MemberId("m-1".to_owned()),
            Decision::Approved,
            Some("   ".to_owned()),
        );
        assert_eq!(response.comment, None);
        assert!(response.is_active());
        assert!(response.is_approval());
    }
}
