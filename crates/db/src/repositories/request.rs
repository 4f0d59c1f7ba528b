use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};
use tracing::debug;

use signoff_core::domain::approver::{ApproverDesignation, ApproverDesignationId};
use signoff_core::domain::attachment::{FileAttachment, Link};
use signoff_core::domain::member::{MemberId, StageId};
use signoff_core::domain::request::{Request, RequestId, RequestStatus};
use signoff_core::domain::response::{Decision, Response, ResponseId};
use signoff_core::ports::{RequestStore, StoreError};

use super::{decode_flag, parse_timestamp, RepositoryError};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, stage_id, author_id, parent_id, title, content, status,
     deleted, version, created_at, updated_at";

/// Stores the whole request aggregate. Every read and write runs in one
/// transaction; writes are guarded by the `version` column.
pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM request WHERE id = ? AND deleted = 0"
        ))
        .bind(&id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut request = request_from_row(&row)?;

        request.approvers = sqlx::query(
            "SELECT id, request_id, member_id, deleted, created_at, updated_at
             FROM approver_designation
             WHERE request_id = ?
             ORDER BY rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(approver_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        request.responses = sqlx::query(
            "SELECT id, request_id, member_id, decision, comment, deleted, created_at, updated_at
             FROM response
             WHERE request_id = ?
             ORDER BY rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(response_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let links = sqlx::query(
            "SELECT id, response_id, url, title FROM request_link WHERE request_id = ? ORDER BY rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&mut *tx)
        .await?;
        for row in &links {
            let response_id: Option<String> = row.try_get("response_id")?;
            let link = Link { id: row.try_get("id")?, url: row.try_get("url")?, title: row.try_get("title")? };
            match response_id {
                None => request.links.push(link),
                Some(response_id) => owning_response(&mut request, &response_id)?.links.push(link),
            }
        }

        let files = sqlx::query(
            "SELECT id, response_id, name, url, content_type, size_bytes
             FROM request_file
             WHERE request_id = ?
             ORDER BY rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&mut *tx)
        .await?;
        for row in &files {
            let response_id: Option<String> = row.try_get("response_id")?;
            let file = FileAttachment {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                url: row.try_get("url")?,
                content_type: row.try_get("content_type")?,
                size_bytes: row.try_get("size_bytes")?,
            };
            match response_id {
                None => request.files.push(file),
                Some(response_id) => owning_response(&mut request, &response_id)?.files.push(file),
            }
        }

        tx.commit().await?;
        Ok(Some(request))
    }

    async fn insert_aggregate(&self, request: &Request) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO request ({REQUEST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&request.id.0)
        .bind(&request.stage_id.0)
        .bind(&request.author_id.0)
        .bind(request.parent_id.as_ref().map(|id| id.0.as_str()))
        .bind(&request.title)
        .bind(&request.content)
        .bind(request.status.as_str())
        .bind(i64::from(request.deleted))
        .bind(request.version)
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        write_children(&mut tx, request).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_aggregate(
        &self,
        request: &Request,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE request
             SET title = ?, content = ?, status = ?, deleted = ?,
                 version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&request.title)
        .bind(&request.content)
        .bind(request.status.as_str())
        .bind(i64::from(request.deleted))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            debug!(
                request_id = %request.id,
                expected_version,
                "request version moved on before commit"
            );
            return Err(RepositoryError::Stale(format!(
                "request {} is no longer at version {expected_version}",
                request.id
            )));
        }

        write_children(&mut tx, request).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn request_owning(
        &self,
        query: &str,
        child_id: &str,
    ) -> Result<Option<RequestId>, RepositoryError> {
        let request_id: Option<String> =
            sqlx::query_scalar(query).bind(child_id).fetch_optional(&self.pool).await?;
        Ok(request_id.map(RequestId))
    }
}

#[async_trait]
impl RequestStore for SqlRequestStore {
    async fn load(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.fetch(id).await?)
    }

    async fn insert(&self, request: &Request) -> Result<(), StoreError> {
        Ok(self.insert_aggregate(request).await?)
    }

    async fn commit(&self, request: &Request, expected_version: i64) -> Result<(), StoreError> {
        Ok(self.commit_aggregate(request, expected_version).await?)
    }

    async fn find_request_for_approver(
        &self,
        id: &ApproverDesignationId,
    ) -> Result<Option<RequestId>, StoreError> {
        Ok(self
            .request_owning(
                "SELECT d.request_id
                 FROM approver_designation d
                 JOIN request r ON r.id = d.request_id
                 WHERE d.id = ? AND r.deleted = 0",
                &id.0,
            )
            .await?)
    }

    async fn find_request_for_response(
        &self,
        id: &ResponseId,
    ) -> Result<Option<RequestId>, StoreError> {
        Ok(self
            .request_owning(
                "SELECT p.request_id
                 FROM response p
                 JOIN request r ON r.id = p.request_id
                 WHERE p.id = ? AND r.deleted = 0",
                &id.0,
            )
            .await?)
    }
}

/// Upserts the soft-delete state of designations and responses and appends
/// any attachments not yet stored. Content columns of existing responses are
/// never rewritten.
async fn write_children(
    tx: &mut Transaction<'_, Sqlite>,
    request: &Request,
) -> Result<(), RepositoryError> {
    for approver in &request.approvers {
        sqlx::query(
            "INSERT INTO approver_designation (id, request_id, member_id, deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 deleted = excluded.deleted,
                 updated_at = excluded.updated_at",
        )
        .bind(&approver.id.0)
        .bind(&request.id.0)
        .bind(&approver.member_id.0)
        .bind(i64::from(approver.deleted))
        .bind(approver.created_at.to_rfc3339())
        .bind(approver.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;
    }

    for response in &request.responses {
        sqlx::query(
            "INSERT INTO response (id, request_id, member_id, decision, comment, deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 deleted = excluded.deleted,
                 updated_at = excluded.updated_at",
        )
        .bind(&response.id.0)
        .bind(&request.id.0)
        .bind(&response.member_id.0)
        .bind(response.decision.as_str())
        .bind(&response.comment)
        .bind(i64::from(response.deleted))
        .bind(response.created_at.to_rfc3339())
        .bind(response.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        for link in &response.links {
            insert_link(tx, &request.id, Some(&response.id), link).await?;
        }
        for file in &response.files {
            insert_file(tx, &request.id, Some(&response.id), file).await?;
        }
    }

    for link in &request.links {
        insert_link(tx, &request.id, None, link).await?;
    }
    for file in &request.files {
        insert_file(tx, &request.id, None, file).await?;
    }

    Ok(())
}

async fn insert_link(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: &RequestId,
    response_id: Option<&ResponseId>,
    link: &Link,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO request_link (id, request_id, response_id, url, title)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&link.id)
    .bind(&request_id.0)
    .bind(response_id.map(|id| id.0.as_str()))
    .bind(&link.url)
    .bind(&link.title)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_file(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: &RequestId,
    response_id: Option<&ResponseId>,
    file: &FileAttachment,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO request_file (id, request_id, response_id, name, url, content_type, size_bytes)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&file.id)
    .bind(&request_id.0)
    .bind(response_id.map(|id| id.0.as_str()))
    .bind(&file.name)
    .bind(&file.url)
    .bind(&file.content_type)
    .bind(file.size_bytes)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn owning_response<'a>(
    request: &'a mut Request,
    response_id: &str,
) -> Result<&'a mut Response, RepositoryError> {
    let id = ResponseId(response_id.to_owned());
    let request_id = request.id.clone();
    request.response_mut(&id).ok_or_else(|| {
        RepositoryError::Decode(format!(
            "attachment references response {response_id} outside request {request_id}"
        ))
    })
}

fn request_from_row(row: &SqliteRow) -> Result<Request, RepositoryError> {
    let status: String = row.try_get("status")?;
    let status = RequestStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status}`")))?;
    let parent_id: Option<String> = row.try_get("parent_id")?;

    Ok(Request {
        id: RequestId(row.try_get("id")?),
        stage_id: StageId(row.try_get("stage_id")?),
        author_id: MemberId(row.try_get("author_id")?),
        parent_id: parent_id.map(RequestId),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        status,
        approvers: Vec::new(),
        responses: Vec::new(),
        links: Vec::new(),
        files: Vec::new(),
        deleted: decode_flag("deleted", row.try_get("deleted")?)?,
        version: row.try_get("version")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn approver_from_row(row: &SqliteRow) -> Result<ApproverDesignation, RepositoryError> {
    Ok(ApproverDesignation {
        id: ApproverDesignationId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        member_id: MemberId(row.try_get("member_id")?),
        deleted: decode_flag("deleted", row.try_get("deleted")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn response_from_row(row: &SqliteRow) -> Result<Response, RepositoryError> {
    let decision: String = row.try_get("decision")?;
    let decision = Decision::parse(&decision)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{decision}`")))?;

    Ok(Response {
        id: ResponseId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        member_id: MemberId(row.try_get("member_id")?),
        decision,
        comment: row.try_get("comment")?,
        links: Vec::new(),
        files: Vec::new(),
        deleted: decode_flag("deleted", row.try_get("deleted")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
