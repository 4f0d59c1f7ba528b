//! JSON API for the request workflow.
//!
//! - `POST   /api/v1/requests`                   create a request
//! - `GET    /api/v1/requests/{id}`              request view with tally
//! - `PUT    /api/v1/requests/{id}`              edit text, extend roster, attach
//! - `DELETE /api/v1/requests/{id}`              withdraw
//! - `GET    /api/v1/requests/{id}/chain`        the request and its ancestors
//! - `POST   /api/v1/requests/{id}/re-requests`  resubmit a closed request
//! - `POST   /api/v1/requests/{id}/responses`    record an approval or rejection
//! - `POST   /api/v1/requests/{id}/reopen`       admin reopen of a rejection
//! - `DELETE /api/v1/approvers/{id}`             remove an approver
//! - `DELETE /api/v1/responses/{id}`             admin removal of a response
//!
//! Mutations identify the caller through the `x-member-id` header. An
//! `x-correlation-id` header is honoured when present.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use signoff_core::domain::attachment::{FileAttachment, Link};
use signoff_core::{
    ApplicationError, ApproverDesignationId, ApproverDesignationService, Caller, Decision,
    InterfaceError, MemberId, NewRequest, Request, RequestId, RequestService, RequestStatus,
    RequestUpdate, RequestView, ResponseId, ResponseSubmission, StageId, WorkflowContext,
};
use tracing::{error, warn};
use uuid::Uuid;

pub const MEMBER_HEADER: &str = "x-member-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    requests: Arc<RequestService>,
    approvers: Arc<ApproverDesignationService>,
}

impl ApiState {
    pub fn new(workflow: Arc<WorkflowContext>) -> Self {
        Self {
            requests: Arc::new(RequestService::new(workflow.clone())),
            approvers: Arc::new(ApproverDesignationService::new(workflow)),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request))
        .route(
            "/api/v1/requests/{id}",
            get(find_request).put(update_request).delete(withdraw_request),
        )
        .route("/api/v1/requests/{id}/chain", get(request_chain))
        .route("/api/v1/requests/{id}/re-requests", post(create_re_request))
        .route("/api/v1/requests/{id}/responses", post(submit_response))
        .route("/api/v1/requests/{id}/reopen", post(reopen_request))
        .route("/api/v1/approvers/{id}", delete(delete_approver))
        .route("/api/v1/responses/{id}", delete(delete_response))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LinkInput {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl From<LinkInput> for Link {
    fn from(input: LinkInput) -> Self {
        Link::new(input.url, input.title)
    }
}

#[derive(Debug, Deserialize)]
pub struct FileInput {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

impl From<FileInput> for FileAttachment {
    fn from(input: FileInput) -> Self {
        FileAttachment {
            content_type: input.content_type,
            size_bytes: input.size_bytes,
            ..FileAttachment::new(input.name, input.url)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub stage_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub approver_member_ids: Vec<String>,
    #[serde(default)]
    pub links: Vec<LinkInput>,
    #[serde(default)]
    pub files: Vec<FileInput>,
}

impl CreateRequestBody {
    fn into_draft(self, author_id: MemberId) -> NewRequest {
        NewRequest {
            author_id,
            stage_id: StageId(self.stage_id),
            title: self.title,
            content: self.content,
            approver_ids: member_ids(self.approver_member_ids),
            links: self.links.into_iter().map(Link::from).collect(),
            files: self.files.into_iter().map(FileAttachment::from).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequestBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub approver_member_ids: Vec<String>,
    #[serde(default)]
    pub links: Vec<LinkInput>,
    #[serde(default)]
    pub files: Vec<FileInput>,
}

impl From<UpdateRequestBody> for RequestUpdate {
    fn from(body: UpdateRequestBody) -> Self {
        RequestUpdate {
            title: body.title,
            content: body.content,
            approver_ids: member_ids(body.approver_member_ids),
            links: body.links.into_iter().map(Link::from).collect(),
            files: body.files.into_iter().map(FileAttachment::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitResponseBody {
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub links: Vec<LinkInput>,
    #[serde(default)]
    pub files: Vec<FileInput>,
}

impl From<SubmitResponseBody> for ResponseSubmission {
    fn from(body: SubmitResponseBody) -> Self {
        ResponseSubmission {
            decision: body.decision,
            comment: body.comment,
            links: body.links.into_iter().map(Link::from).collect(),
            files: body.files.into_iter().map(FileAttachment::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseRecorded {
    pub response_id: ResponseId,
    pub status: RequestStatus,
    pub request: RequestView,
}

#[derive(Debug, Serialize)]
pub struct RequestChain {
    pub requests: Vec<Request>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: String,
}

/// Transport error carrying the caller-visible code and correlation id.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                code = self.0.code(),
                status = status.as_u16(),
                error = %self.0.message(),
                "request failed"
            );
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %self.0.correlation_id(),
                code = self.0.code(),
                status = status.as_u16(),
                "request rejected"
            );
        }

        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.message().to_owned(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestView>), ApiError> {
    let caller = caller(&headers)?;
    let draft = body.into_draft(caller.member_id.clone());
    let view = state
        .requests
        .create_request(&caller, draft)
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn create_re_request(
    State(state): State<ApiState>,
    Path(parent_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestView>), ApiError> {
    let caller = caller(&headers)?;
    let draft = body.into_draft(caller.member_id.clone());
    let view = state
        .requests
        .create_re_request(&caller, &RequestId(parent_id), draft)
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn find_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestView>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let view = state
        .requests
        .find_request(&RequestId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(view))
}

async fn request_chain(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestChain>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let requests = state
        .requests
        .request_chain(&RequestId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(RequestChain { requests }))
}

async fn update_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateRequestBody>,
) -> Result<Json<RequestView>, ApiError> {
    let caller = caller(&headers)?;
    let view = state
        .requests
        .update_request(&caller, &RequestId(id), body.into())
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok(Json(view))
}

async fn withdraw_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = caller(&headers)?;
    state
        .requests
        .withdraw_request(&caller, &RequestId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_response(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SubmitResponseBody>,
) -> Result<(StatusCode, Json<ResponseRecorded>), ApiError> {
    let caller = caller(&headers)?;
    let receipt = state
        .requests
        .submit_response(&caller, &RequestId(id), body.into())
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok((
        StatusCode::CREATED,
        Json(ResponseRecorded {
            response_id: receipt.response_id,
            status: receipt.status,
            request: receipt.view,
        }),
    ))
}

async fn reopen_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestView>, ApiError> {
    let caller = caller(&headers)?;
    let view = state
        .requests
        .reopen_request(&caller, &RequestId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok(Json(view))
}

async fn delete_approver(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestView>, ApiError> {
    let caller = caller(&headers)?;
    let view = state
        .approvers
        .delete_approver(&caller, &ApproverDesignationId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok(Json(view))
}

async fn delete_response(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestView>, ApiError> {
    let caller = caller(&headers)?;
    let view = state
        .requests
        .delete_response(&caller, &ResponseId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok(Json(view))
}

fn member_ids(raw: Vec<String>) -> Vec<MemberId> {
    raw.into_iter().map(MemberId).collect()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, CORRELATION_HEADER)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let correlation_id = correlation_id(headers);
    match header_value(headers, MEMBER_HEADER) {
        Some(member_id) => Ok(Caller::new(MemberId(member_id.to_owned()), correlation_id)),
        None => Err(ApiError(InterfaceError::BadRequest {
            code: "missing_member_id",
            message: format!("the `{MEMBER_HEADER}` header is required"),
            correlation_id,
        })),
    }
}
