use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::member::{Member, MemberId, MemberRole, ProjectId, Stage, StageId};
use signoff_core::ports::{MemberDirectory, StageDirectory, StoreError};

use super::RepositoryError;
use crate::DbPool;

/// Read side of the member/project/stage tables.
pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn member(&self, id: &MemberId) -> Result<Option<Member>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, role FROM member WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn members(&self, ids: &[MemberId]) -> Result<Vec<Member>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT id, name, role FROM member WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(&id.0);
        }

        query.fetch_all(&self.pool).await?.iter().map(member_from_row).collect()
    }

    async fn stage(&self, id: &StageId) -> Result<Option<Stage>, RepositoryError> {
        let row = sqlx::query("SELECT id, project_id, name FROM stage WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<Stage, RepositoryError> {
            Ok(Stage {
                id: StageId(row.try_get("id")?),
                project_id: ProjectId(row.try_get("project_id")?),
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn membership(
        &self,
        project_id: &ProjectId,
        member_id: &MemberId,
    ) -> Result<bool, RepositoryError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM project_member WHERE project_id = ?1 AND member_id = ?2)",
        )
        .bind(&project_id.0)
        .bind(&member_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists == 1)
    }
}

#[async_trait]
impl MemberDirectory for SqlDirectory {
    async fn find_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.member(id).await?)
    }

    async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, StoreError> {
        Ok(self.members(ids).await?)
    }
}

#[async_trait]
impl StageDirectory for SqlDirectory {
    async fn find_stage(&self, id: &StageId) -> Result<Option<Stage>, StoreError> {
        Ok(self.stage(id).await?)
    }

    async fn is_project_member(
        &self,
        project_id: &ProjectId,
        member_id: &MemberId,
    ) -> Result<bool, StoreError> {
        Ok(self.membership(project_id, member_id).await?)
    }
}

fn member_from_row(row: &SqliteRow) -> Result<Member, RepositoryError> {
    let role: String = row.try_get("role")?;
    let role = MemberRole::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown member role `{role}`")))?;

    Ok(Member { id: MemberId(row.try_get("id")?), name: row.try_get("name")?, role })
}
