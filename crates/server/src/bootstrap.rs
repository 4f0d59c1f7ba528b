use std::sync::Arc;

use signoff_core::audit::TracingAuditSink;
use signoff_core::config::{AppConfig, ConfigError, LoadOptions};
use signoff_core::WorkflowContext;
use signoff_db::{connect_with_config, migrations, DbPool, SqlDirectory, SqlRequestStore};
use thiserror::Error;
use tracing::info;

use crate::events::TracingEventPublisher;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<WorkflowContext>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        migrations = migrations::known_versions(),
        "database migrations applied"
    );

    let directory = Arc::new(SqlDirectory::new(db_pool.clone()));
    let workflow = Arc::new(
        WorkflowContext::new(
            Arc::new(SqlRequestStore::new(db_pool.clone())),
            directory.clone(),
            directory,
        )
        .with_events(Arc::new(TracingEventPublisher))
        .with_audit(Arc::new(TracingAuditSink))
        .with_config(config.workflow.clone()),
    );

    Ok(Application { config, db_pool, workflow })
}

#[cfg(test)]
mod tests {
    use signoff_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_urls() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/signoff".to_owned()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("invalid url").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_applies_workflow_overrides() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_owned()),
                max_conflict_retries: Some(5),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('request', 'approver_designation', 'response')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 3);
        assert_eq!(app.config.workflow.max_conflict_retries, 5);

        app.db_pool.close().await;
    }
}
