use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::approver::ApproverDesignationId;
use crate::domain::member::{Member, MemberId, ProjectId, Stage, StageId};
use crate::domain::request::{Request, RequestId};
use crate::domain::response::ResponseId;

use super::{
    DomainEvent, EventPublisher, MemberDirectory, PublishError, RequestStore, StageDirectory,
    StoreError,
};

#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, Request>>,
}

impl InMemoryRequestStore {
    /// Includes withdrawn requests, unlike [`RequestStore::load`].
    pub async fn snapshot(&self, id: &RequestId) -> Option<Request> {
        self.requests.read().await.get(&id.0).cloned()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn load(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).filter(|request| !request.deleted).cloned())
    }

    async fn insert(&self, request: &Request) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(StoreError::Conflict(format!("request {} already exists", request.id)));
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn commit(&self, request: &Request, expected_version: i64) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        let Some(stored) = requests.get_mut(&request.id.0) else {
            return Err(StoreError::Conflict(format!("request {} no longer exists", request.id)));
        };
        if stored.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "request {} is at version {}, expected {expected_version}",
                request.id, stored.version
            )));
        }

        let mut next = request.clone();
        next.version = expected_version + 1;
        *stored = next;
        Ok(())
    }

    async fn find_request_for_approver(
        &self,
        id: &ApproverDesignationId,
    ) -> Result<Option<RequestId>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| !request.deleted)
            .find(|request| request.approvers.iter().any(|approver| &approver.id == id))
            .map(|request| request.id.clone()))
    }

    async fn find_request_for_response(
        &self,
        id: &ResponseId,
    ) -> Result<Option<RequestId>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|request| !request.deleted)
            .find(|request| request.responses.iter().any(|response| &response.id == id))
            .map(|request| request.id.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    members: RwLock<HashMap<String, Member>>,
    stages: RwLock<HashMap<String, Stage>>,
    project_members: RwLock<HashSet<(String, String)>>,
}

impl InMemoryDirectory {
    pub fn with_member(mut self, member: Member) -> Self {
        self.members.get_mut().insert(member.id.0.clone(), member);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.get_mut().insert(stage.id.0.clone(), stage);
        self
    }

    pub fn with_project_member(mut self, project_id: &ProjectId, member_id: &MemberId) -> Self {
        self.project_members.get_mut().insert((project_id.0.clone(), member_id.0.clone()));
        self
    }
}

#[async_trait]
impl MemberDirectory for InMemoryDirectory {
    async fn find_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.members.read().await.get(&id.0).cloned())
    }

    async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, StoreError> {
        let members = self.members.read().await;
        Ok(ids.iter().filter_map(|id| members.get(&id.0).cloned()).collect())
    }
}

#[async_trait]
impl StageDirectory for InMemoryDirectory {
    async fn find_stage(&self, id: &StageId) -> Result<Option<Stage>, StoreError> {
        Ok(self.stages.read().await.get(&id.0).cloned())
    }

    async fn is_project_member(
        &self,
        project_id: &ProjectId,
        member_id: &MemberId,
    ) -> Result<bool, StoreError> {
        let memberships = self.project_members.read().await;
        Ok(memberships.contains(&(project_id.0.clone(), member_id.0.clone())))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn events(&self) -> Vec<DomainEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: DomainEvent) -> Result<(), PublishError> {
        Ok(())
    }
}
