use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use signoff_core::audit::InMemoryAuditSink;
use signoff_core::config::WorkflowConfig;
use signoff_core::domain::approver::ApproverDesignationId;
use signoff_core::ports::{
    DomainEvent, EventPublisher, InMemoryDirectory, InMemoryRequestStore, PublishError,
    RequestStore, StoreError,
};
use signoff_core::{
    ApplicationError, Caller, Decision, ErrorKind, Member, MemberId, MemberRole, NewRequest,
    ProjectId, Request, RequestId, RequestService, RequestStatus, ResponseId, ResponseSubmission,
    Stage, StageId, WorkflowContext,
};

const MEMBERS: [&str; 4] = ["m-1", "m-2", "m-3", "m-4"];

fn directory() -> Arc<InMemoryDirectory> {
    let project = ProjectId("proj-1".to_owned());
    let mut directory = InMemoryDirectory::default().with_stage(Stage {
        id: StageId("stage-1".to_owned()),
        project_id: project.clone(),
        name: "Review".to_owned(),
    });
    for id in std::iter::once("author").chain(MEMBERS) {
        directory = directory
            .with_member(Member {
                id: MemberId(id.to_owned()),
                name: id.to_uppercase(),
                role: MemberRole::Member,
            })
            .with_project_member(&project, &MemberId(id.to_owned()));
    }
    Arc::new(directory)
}

fn context_with(store: Arc<dyn RequestStore>, config: WorkflowConfig) -> Arc<WorkflowContext> {
    let directory = directory();
    Arc::new(
        WorkflowContext::new(store, directory.clone(), directory)
            .with_audit(Arc::new(InMemoryAuditSink::default()))
            .with_config(config),
    )
}

fn caller(id: &str) -> Caller {
    Caller::new(MemberId(id.to_owned()), format!("corr-{id}"))
}

fn draft(approvers: &[&str]) -> NewRequest {
    NewRequest {
        author_id: MemberId("author".to_owned()),
        stage_id: StageId("stage-1".to_owned()),
        title: "Release sign-off".to_owned(),
        content: "Ship 2.4".to_owned(),
        approver_ids: approvers.iter().map(|id| MemberId((*id).to_owned())).collect(),
        links: Vec::new(),
        files: Vec::new(),
    }
}

fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for (index, head) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(index);
        for mut tail in permutations(&rest) {
            tail.insert(0, *head);
            all.push(tail);
        }
    }
    all
}

#[tokio::test]
async fn unanimous_approval_in_any_order_ends_approved() {
    for size in 1..=MEMBERS.len() {
        let roster = &MEMBERS[..size];
        for order in permutations(roster) {
            let service = RequestService::new(context_with(
                Arc::new(InMemoryRequestStore::default()),
                WorkflowConfig::default(),
            ));
            let id = service
                .create_request(&caller("author"), draft(roster))
                .await
                .expect("created")
                .request
                .id;

            for (position, member) in order.iter().enumerate() {
                let receipt = service
                    .submit_response(&caller(member), &id, ResponseSubmission::new(Decision::Approved))
                    .await
                    .expect("approval accepted");
                let expected = if position + 1 == size {
                    RequestStatus::Approved
                } else {
                    RequestStatus::Approving
                };
                assert_eq!(receipt.status, expected, "roster {roster:?} order {order:?}");
            }
        }
    }
}

#[tokio::test]
async fn any_rejection_in_any_position_ends_rejected() {
    for size in 1..=MEMBERS.len() {
        let roster = &MEMBERS[..size];
        for order in permutations(roster) {
            for rejector in 0..size {
                let service = RequestService::new(context_with(
                    Arc::new(InMemoryRequestStore::default()),
                    WorkflowConfig::default(),
                ));
                let id = service
                    .create_request(&caller("author"), draft(roster))
                    .await
                    .expect("created")
                    .request
                    .id;

                for (position, member) in order.iter().enumerate() {
                    let decision =
                        if position == rejector { Decision::Rejected } else { Decision::Approved };
                    let result = service
                        .submit_response(&caller(member), &id, ResponseSubmission::new(decision))
                        .await;
                    if position <= rejector {
                        let receipt = result.expect("open request accepts responses");
                        let expected = if position == rejector {
                            RequestStatus::Rejected
                        } else {
                            RequestStatus::Approving
                        };
                        assert_eq!(receipt.status, expected);
                    } else {
                        let error = result.expect_err("rejected request is closed");
                        assert_eq!(error.kind(), ErrorKind::TerminalState);
                    }
                }
            }
        }
    }
}

/// Yields inside every load so concurrent callers decide against the same
/// snapshot, and counts commits refused as stale.
struct Interleaving {
    inner: InMemoryRequestStore,
    conflicts: AtomicUsize,
}

#[async_trait]
impl RequestStore for Interleaving {
    async fn load(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        let loaded = self.inner.load(id).await;
        tokio::task::yield_now().await;
        loaded
    }

    async fn insert(&self, request: &Request) -> Result<(), StoreError> {
        self.inner.insert(request).await
    }

    async fn commit(&self, request: &Request, expected_version: i64) -> Result<(), StoreError> {
        let result = self.inner.commit(request, expected_version).await;
        if matches!(result, Err(StoreError::Conflict(_))) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn find_request_for_approver(
        &self,
        id: &ApproverDesignationId,
    ) -> Result<Option<RequestId>, StoreError> {
        self.inner.find_request_for_approver(id).await
    }

    async fn find_request_for_response(
        &self,
        id: &ResponseId,
    ) -> Result<Option<RequestId>, StoreError> {
        self.inner.find_request_for_response(id).await
    }
}

#[tokio::test]
async fn concurrent_last_approvals_persist_exactly_one_response() {
    let store = Arc::new(Interleaving {
        inner: InMemoryRequestStore::default(),
        conflicts: AtomicUsize::new(0),
    });
    let service = Arc::new(RequestService::new(context_with(store.clone(), WorkflowConfig::default())));
    let id = service
        .create_request(&caller("author"), draft(&["m-1", "m-2"]))
        .await
        .expect("created")
        .request
        .id;
    service
        .submit_response(&caller("m-1"), &id, ResponseSubmission::new(Decision::Approved))
        .await
        .expect("first approval");

    let approver = caller("m-2");
    let (left, right) = tokio::join!(
        service.submit_response(&approver, &id, ResponseSubmission::new(Decision::Approved)),
        service.submit_response(&approver, &id, ResponseSubmission::new(Decision::Approved)),
    );

    assert!(store.conflicts.load(Ordering::SeqCst) >= 1, "the losing commit must be refused as stale");
    let successes = [left.is_ok(), right.is_ok()].into_iter().filter(|ok| *ok).count();
    assert_eq!(successes, 1);
    let failure = left.err().or(right.err()).expect("one attempt fails");
    assert!(matches!(failure.kind(), ErrorKind::TerminalState | ErrorKind::RosterViolation));

    let stored = store.inner.snapshot(&id).await.expect("stored");
    assert_eq!(stored.status, RequestStatus::Approved);
    let from_m2 = stored
        .responses
        .iter()
        .filter(|response| response.member_id == MemberId("m-2".to_owned()))
        .count();
    assert_eq!(from_m2, 1);
}

/// Delegates to the in-memory store but fails every commit as a lost race.
struct AlwaysStale {
    inner: InMemoryRequestStore,
    commits: AtomicUsize,
}

#[async_trait]
impl RequestStore for AlwaysStale {
    async fn load(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        self.inner.load(id).await
    }

    async fn insert(&self, request: &Request) -> Result<(), StoreError> {
        self.inner.insert(request).await
    }

    async fn commit(&self, request: &Request, _expected_version: i64) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Conflict(format!("request {} moved on", request.id)))
    }

    async fn find_request_for_approver(
        &self,
        id: &ApproverDesignationId,
    ) -> Result<Option<RequestId>, StoreError> {
        self.inner.find_request_for_approver(id).await
    }

    async fn find_request_for_response(
        &self,
        id: &ResponseId,
    ) -> Result<Option<RequestId>, StoreError> {
        self.inner.find_request_for_response(id).await
    }
}

#[tokio::test]
async fn conflicts_are_retried_up_to_the_budget_then_surface() {
    let store = Arc::new(AlwaysStale {
        inner: InMemoryRequestStore::default(),
        commits: AtomicUsize::new(0),
    });
    let config = WorkflowConfig { max_conflict_retries: 2, ..WorkflowConfig::default() };
    let service = RequestService::new(context_with(store.clone(), config));
    let id = service
        .create_request(&caller("author"), draft(&["m-1"]))
        .await
        .expect("created")
        .request
        .id;

    let error = service
        .submit_response(&caller("m-1"), &id, ResponseSubmission::new(Decision::Approved))
        .await
        .expect_err("every commit is stale");

    assert!(matches!(error, ApplicationError::Conflict(_)));
    assert_eq!(error.code(), "concurrent_modification");
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
}

struct BrokenPublisher {
    attempts: AtomicUsize,
}

#[async_trait]
impl EventPublisher for BrokenPublisher {
    async fn publish(&self, _event: DomainEvent) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError("broker unreachable".to_owned()))
    }
}

#[tokio::test]
async fn publisher_failure_does_not_roll_back_the_transition() {
    let store = Arc::new(InMemoryRequestStore::default());
    let publisher = Arc::new(BrokenPublisher { attempts: AtomicUsize::new(0) });
    let directory = directory();
    let context = WorkflowContext::new(store.clone(), directory.clone(), directory)
        .with_events(publisher.clone())
        .with_audit(Arc::new(InMemoryAuditSink::default()));
    let service = RequestService::new(Arc::new(context));

    let id = service
        .create_request(&caller("author"), draft(&["m-1"]))
        .await
        .expect("created despite publisher")
        .request
        .id;
    let receipt = service
        .submit_response(&caller("m-1"), &id, ResponseSubmission::new(Decision::Approved))
        .await
        .expect("approval stands");

    assert_eq!(receipt.status, RequestStatus::Approved);
    assert_eq!(store.snapshot(&id).await.map(|request| request.status), Some(RequestStatus::Approved));
    assert!(publisher.attempts.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn disabled_publication_skips_the_publisher() {
    let publisher = Arc::new(BrokenPublisher { attempts: AtomicUsize::new(0) });
    let directory = directory();
    let context = WorkflowContext::new(
        Arc::new(InMemoryRequestStore::default()),
        directory.clone(),
        directory,
    )
    .with_events(publisher.clone())
    .with_config(WorkflowConfig { publish_events: false, ..WorkflowConfig::default() });
    let service = RequestService::new(Arc::new(context));

    service.create_request(&caller("author"), draft(&["m-1"])).await.expect("created");
    assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
}
