//! Builds and extends requests from caller input.
//!
//! Every check that needs a collaborator (author, stage, project membership,
//! approver resolution) happens here, before anything is written. A failure
//! leaves no trace in the store.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::approver::designate_approvers;
use crate::domain::attachment::{FileAttachment, Link};
use crate::domain::member::{Member, MemberId, Stage, StageId};
use crate::domain::request::Request;
use crate::errors::{ApplicationError, WorkflowError};
use crate::ports::{MemberDirectory, StageDirectory};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRequest {
    pub author_id: MemberId,
    pub stage_id: StageId,
    pub title: String,
    pub content: String,
    pub approver_ids: Vec<MemberId>,
    pub links: Vec<Link>,
    pub files: Vec<FileAttachment>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Members to add to the roster; already-active approvers are skipped.
    pub approver_ids: Vec<MemberId>,
    pub links: Vec<Link>,
    pub files: Vec<FileAttachment>,
}

/// An update whose approver list has already been resolved against the
/// directory. Applying it is pure so it can be replayed on a fresh snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedUpdate {
    title: Option<String>,
    content: Option<String>,
    approvers: Vec<Member>,
    links: Vec<Link>,
    files: Vec<FileAttachment>,
}

impl PreparedUpdate {
    /// Returns `true` when the roster grew.
    pub fn apply(&self, request: &mut Request) -> Result<bool, WorkflowError> {
        let fresh: Vec<Member> = self
            .approvers
            .iter()
            .filter(|member| !request.is_active_approver(&member.id))
            .cloned()
            .collect();

        if !fresh.is_empty() && request.status.is_terminal() {
            return Err(WorkflowError::TerminalState {
                request_id: request.id.clone(),
                status: request.status,
            });
        }

        request.edit(self.title.clone(), self.content.clone());
        request.add_links(self.links.clone());
        request.add_files(self.files.clone());

        let designations = designate_approvers(&request.id, &fresh);
        let roster_grew = !designations.is_empty();
        request.add_approvers(designations);
        Ok(roster_grew)
    }
}

pub struct RequestFactory {
    members: Arc<dyn MemberDirectory>,
    stages: Arc<dyn StageDirectory>,
}

impl RequestFactory {
    pub fn new(members: Arc<dyn MemberDirectory>, stages: Arc<dyn StageDirectory>) -> Self {
        Self { members, stages }
    }

    pub async fn create_request(&self, draft: NewRequest) -> Result<Request, ApplicationError> {
        let (approvers, _stage) = self.check_draft(&draft).await?;
        let request = Request::create(draft.author_id, draft.stage_id, draft.title, draft.content);
        Ok(finish(request, &approvers, draft.links, draft.files))
    }

    /// `parent` must already be loaded through the store, so a withdrawn
    /// parent never reaches this point.
    pub async fn create_re_request(
        &self,
        parent: &Request,
        draft: NewRequest,
    ) -> Result<Request, ApplicationError> {
        if !parent.status.is_terminal() {
            return Err(WorkflowError::Validation(format!(
                "request {} is still {} and cannot be resubmitted",
                parent.id, parent.status
            ))
            .into());
        }

        let (approvers, _stage) = self.check_draft(&draft).await?;
        let request = Request::create_re_request(
            parent.id.clone(),
            draft.author_id,
            draft.stage_id,
            draft.title,
            draft.content,
        );
        Ok(finish(request, &approvers, draft.links, draft.files))
    }

    /// `stage_id` is the stage of the request being updated; added approvers
    /// must belong to its project.
    pub async fn prepare_update(
        &self,
        stage_id: &StageId,
        update: RequestUpdate,
    ) -> Result<PreparedUpdate, ApplicationError> {
        if let Some(title) = &update.title {
            validate_title(title)?;
        }
        let approvers = if update.approver_ids.is_empty() {
            Vec::new()
        } else {
            let stage = self.stage(stage_id).await?;
            let approvers = self.resolve_approvers(&update.approver_ids).await?;
            self.check_approver_membership(&stage, &approvers).await?;
            approvers
        };

        Ok(PreparedUpdate {
            title: update.title.map(|title| title.trim().to_owned()),
            content: update.content,
            approvers,
            links: update.links,
            files: update.files,
        })
    }

    /// All-or-nothing: any unknown id fails the whole list, naming every
    /// missing id. Duplicates collapse to the first occurrence.
    pub async fn resolve_approvers(&self, ids: &[MemberId]) -> Result<Vec<Member>, ApplicationError> {
        let mut seen = HashSet::new();
        let unique: Vec<MemberId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();

        let found = self.members.find_members(&unique).await?;
        let missing: Vec<MemberId> = unique
            .iter()
            .filter(|id| !found.iter().any(|member| &member.id == *id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(WorkflowError::UnresolvedApprovers { member_ids: missing }.into());
        }

        Ok(unique
            .iter()
            .filter_map(|id| found.iter().find(|member| &member.id == id).cloned())
            .collect())
    }

    async fn check_draft(&self, draft: &NewRequest) -> Result<(Vec<Member>, Stage), ApplicationError> {
        validate_title(&draft.title)?;
        if draft.approver_ids.is_empty() {
            return Err(WorkflowError::EmptyRoster.into());
        }

        self.members
            .find_member(&draft.author_id)
            .await?
            .ok_or_else(|| WorkflowError::MemberNotFound(draft.author_id.clone()))?;
        let stage = self.stage(&draft.stage_id).await?;

        if !self.stages.is_project_member(&stage.project_id, &draft.author_id).await? {
            return Err(WorkflowError::NotProjectMember {
                member_id: draft.author_id.clone(),
                stage_id: stage.id.clone(),
            }
            .into());
        }

        let approvers = self.resolve_approvers(&draft.approver_ids).await?;
        self.check_approver_membership(&stage, &approvers).await?;
        Ok((approvers, stage))
    }

    async fn stage(&self, stage_id: &StageId) -> Result<Stage, ApplicationError> {
        self.stages
            .find_stage(stage_id)
            .await?
            .ok_or_else(|| WorkflowError::StageNotFound(stage_id.clone()).into())
    }

    /// Every approver must belong to the project owning `stage`; all
    /// outsiders are named in one error.
    async fn check_approver_membership(
        &self,
        stage: &Stage,
        approvers: &[Member],
    ) -> Result<(), ApplicationError> {
        let mut outsiders = Vec::new();
        for approver in approvers {
            if !self.stages.is_project_member(&stage.project_id, &approver.id).await? {
                outsiders.push(approver.id.clone());
            }
        }

        if outsiders.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::ApproversOutsideProject {
                stage_id: stage.id.clone(),
                member_ids: outsiders,
            }
            .into())
        }
    }
}

fn finish(
    mut request: Request,
    approvers: &[Member],
    links: Vec<Link>,
    files: Vec<FileAttachment>,
) -> Request {
    request.title = request.title.trim().to_owned();
    request.add_links(links);
    request.add_files(files);
    let roster = designate_approvers(&request.id, approvers);
    request.add_approvers(roster);
    request
}

fn validate_title(title: &str) -> Result<(), WorkflowError> {
    if title.trim().is_empty() {
        return Err(WorkflowError::Validation("title must not be blank".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::domain::member::{Member, MemberId, MemberRole, ProjectId, Stage, StageId};
    use crate::domain::request::{Request, RequestStatus};
    use crate::errors::{ApplicationError, WorkflowError};
    use crate::ports::InMemoryDirectory;

    use super::{NewRequest, RequestFactory, RequestUpdate};

    fn member(id: &str) -> Member {
        Member { id: MemberId(id.to_owned()), name: id.to_uppercase(), role: MemberRole::Member }
    }

    fn factory() -> RequestFactory {
        let project = ProjectId("proj-1".to_owned());
        let other = ProjectId("proj-2".to_owned());
        let mut directory = InMemoryDirectory::default()
            .with_stage(Stage {
                id: StageId("stage-1".to_owned()),
                project_id: project.clone(),
                name: "Design".to_owned(),
            })
            .with_member(member("outsider"))
            .with_member(member("stranger"))
            .with_project_member(&other, &MemberId("outsider".to_owned()));
        for id in ["author", "m-1", "m-2"] {
            directory = directory
                .with_member(member(id))
                .with_project_member(&project, &MemberId(id.to_owned()));
        }

        let directory = Arc::new(directory);
        RequestFactory::new(directory.clone(), directory)
    }

    fn stage_id() -> StageId {
        StageId("stage-1".to_owned())
    }

    fn draft(approvers: &[&str]) -> NewRequest {
        NewRequest {
            author_id: MemberId("author".to_owned()),
            stage_id: StageId("stage-1".to_owned()),
            title: "  Launch plan ".to_owned(),
            content: "Please review".to_owned(),
            approver_ids: approvers.iter().map(|id| MemberId((*id).to_owned())).collect(),
            links: Vec::new(),
            files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_designates_each_distinct_approver_once() {
        let request = factory()
            .create_request(draft(&["m-1", "m-2", "m-1"]))
            .await
            .expect("request builds");

        assert_eq!(request.title, "Launch plan");
        assert_eq!(request.status, RequestStatus::Pending);
        let roster: Vec<&str> =
            request.active_approvers().map(|approver| approver.member_id.0.as_str()).collect();
        assert_eq!(roster, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn unresolved_approvers_fail_the_whole_list() {
        let error = factory()
            .create_request(draft(&["m-1", "ghost-1", "ghost-2"]))
            .await
            .expect_err("unknown approvers");

        assert_eq!(
            error,
            ApplicationError::Workflow(WorkflowError::UnresolvedApprovers {
                member_ids: vec![MemberId("ghost-1".to_owned()), MemberId("ghost-2".to_owned())],
            })
        );
    }

    #[tokio::test]
    async fn empty_roster_and_blank_title_are_rejected() {
        let factory = factory();
        let empty = factory.create_request(draft(&[])).await.expect_err("empty roster");
        assert_eq!(empty.code(), "empty_roster");

        let mut blank = draft(&["m-1"]);
        blank.title = "   ".to_owned();
        let blank = factory.create_request(blank).await.expect_err("blank title");
        assert_eq!(blank.code(), "validation_failed");
    }

    #[tokio::test]
    async fn author_outside_the_project_is_not_authorized() {
        let mut outsider = draft(&["m-1"]);
        outsider.author_id = MemberId("outsider".to_owned());
        let error = factory().create_request(outsider).await.expect_err("not a project member");
        assert_eq!(error.code(), "not_project_member");
    }

    #[tokio::test]
    async fn approvers_outside_the_project_are_refused_together() {
        let error = factory()
            .create_request(draft(&["m-1", "outsider", "stranger"]))
            .await
            .expect_err("approvers outside the project");

        assert_eq!(error.code(), "not_project_member");
        assert_eq!(
            error,
            ApplicationError::Workflow(WorkflowError::ApproversOutsideProject {
                stage_id: stage_id(),
                member_ids: vec![MemberId("outsider".to_owned()), MemberId("stranger".to_owned())],
            })
        );
    }

    #[tokio::test]
    async fn update_cannot_add_an_approver_outside_the_project() {
        let error = factory()
            .prepare_update(
                &stage_id(),
                RequestUpdate {
                    approver_ids: vec![MemberId("m-2".to_owned()), MemberId("outsider".to_owned())],
                    ..RequestUpdate::default()
                },
            )
            .await
            .expect_err("outsider added");

        assert_eq!(
            error,
            ApplicationError::Workflow(WorkflowError::ApproversOutsideProject {
                stage_id: stage_id(),
                member_ids: vec![MemberId("outsider".to_owned())],
            })
        );
    }

    #[tokio::test]
    async fn unknown_stage_is_not_found() {
        let mut lost = draft(&["m-1"]);
        lost.stage_id = StageId("stage-404".to_owned());
        let error = factory().create_request(lost).await.expect_err("missing stage");
        assert_eq!(error.code(), "stage_not_found");
    }

    #[tokio::test]
    async fn re_request_needs_a_closed_parent() {
        let factory = factory();
        let mut parent = factory.create_request(draft(&["m-1"])).await.expect("parent");

        let open = factory.create_re_request(&parent, draft(&["m-1"])).await;
        assert!(matches!(open, Err(ApplicationError::Workflow(WorkflowError::Validation(_)))));

        parent.reject().expect("pending -> rejected");
        let child = factory.create_re_request(&parent, draft(&["m-2"])).await.expect("child");
        assert_eq!(child.parent_id, Some(parent.id.clone()));
        assert_eq!(child.status, RequestStatus::Pending);
        assert_eq!(parent.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn update_adds_only_new_members() {
        let factory = factory();
        let mut request: Request = factory.create_request(draft(&["m-1"])).await.expect("request");

        let update = factory
            .prepare_update(
                &stage_id(),
                RequestUpdate {
                    approver_ids: vec![MemberId("m-1".to_owned()), MemberId("m-2".to_owned())],
                    content: Some("Revised".to_owned()),
                    ..RequestUpdate::default()
                },
            )
            .await
            .expect("prepared");

        assert!(update.apply(&mut request).expect("applies"));
        assert_eq!(request.active_approvers().count(), 2);
        assert_eq!(request.content, "Revised");

        assert!(!update.apply(&mut request).expect("idempotent"));
        assert_eq!(request.active_approvers().count(), 2);
    }

    #[tokio::test]
    async fn roster_extension_is_refused_once_terminal() {
        let factory = factory();
        let mut request = factory.create_request(draft(&["m-1"])).await.expect("request");
        request.approve().expect("pending -> approved");

        let update = factory
            .prepare_update(
                &stage_id(),
                RequestUpdate {
                    approver_ids: vec![MemberId("m-2".to_owned())],
                    ..RequestUpdate::default()
                },
            )
            .await
            .expect("prepared");

        let error = update.apply(&mut request).expect_err("terminal");
        assert!(matches!(error, WorkflowError::TerminalState { .. }));
    }
}
