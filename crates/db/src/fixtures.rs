use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Members seeded by the fixture, with their expected role.
const SEED_MEMBERS: &[(&str, &str)] = &[
    ("mem-admin", "admin"),
    ("mem-author", "member"),
    ("mem-alice", "member"),
    ("mem-bob", "member"),
    ("mem-carol", "member"),
    ("mem-outsider", "member"),
];

const SEED_PROJECT_IDS: &[&str] = &["proj-platform", "proj-research"];

/// Stages seeded by the fixture and the project each belongs to.
const SEED_STAGES: &[(&str, &str)] = &[
    ("stage-design-review", "proj-platform"),
    ("stage-release", "proj-platform"),
    ("stage-intake", "proj-research"),
];

const SEED_MEMBERSHIPS: &[(&str, &str)] = &[
    ("proj-platform", "mem-admin"),
    ("proj-platform", "mem-author"),
    ("proj-platform", "mem-alice"),
    ("proj-platform", "mem-bob"),
    ("proj-platform", "mem-carol"),
    ("proj-research", "mem-outsider"),
];

/// Deterministic member/project/stage directory used by local runs and the
/// integration tests. Loading is idempotent.
pub struct DirectorySeed;

impl DirectorySeed {
    pub const SQL: &str = include_str!("../../../config/fixtures/directory_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            members: SEED_MEMBERS.len(),
            projects: SEED_PROJECT_IDS.len(),
            stages: SEED_STAGES.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (member_id, role) in SEED_MEMBERS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM member WHERE id = ?1 AND role = ?2)",
            )
            .bind(member_id)
            .bind(role)
            .fetch_one(pool)
            .await?;
            checks.push((*member_id, exists == 1));
        }

        for project_id in SEED_PROJECT_IDS {
            let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM project WHERE id = ?1)")
                .bind(project_id)
                .fetch_one(pool)
                .await?;
            checks.push((*project_id, exists == 1));
        }

        for (stage_id, project_id) in SEED_STAGES {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM stage WHERE id = ?1 AND project_id = ?2)",
            )
            .bind(stage_id)
            .bind(project_id)
            .fetch_one(pool)
            .await?;
            checks.push((*stage_id, exists == 1));
        }

        let memberships: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM project_member WHERE project_id IN {}",
            sql_array_from_ids(SEED_PROJECT_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("project-memberships", memberships == SEED_MEMBERSHIPS.len() as i64));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded directory along with every request raised against a
    /// seeded stage.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let stage_ids = SEED_STAGES.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        let member_ids = SEED_MEMBERS.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        let quoted_stages = sql_array_from_ids(&stage_ids);
        let quoted_projects = sql_array_from_ids(SEED_PROJECT_IDS);
        let quoted_members = sql_array_from_ids(&member_ids);

        let mut tx = pool.begin().await?;
        sqlx::query(&format!("DELETE FROM request WHERE stage_id IN {quoted_stages}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM project_member WHERE project_id IN {quoted_projects}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM stage WHERE id IN {quoted_stages}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM project WHERE id IN {quoted_projects}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM member WHERE id IN {quoted_members}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub members: usize,
    pub projects: usize,
    pub stages: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
