use std::sync::Arc;

use serde::Serialize;
use signoff_core::{Request, RequestId, RequestService, RequestView, WorkflowContext};
use signoff_db::{connect_with_config, SqlDirectory, SqlRequestStore};

use crate::commands::{prepare, CommandResult};

#[derive(Debug, Serialize)]
struct Inspection {
    view: RequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain: Option<Vec<ChainEntry>>,
}

/// Ancestor summary; the full aggregate is only printed for the inspected request.
#[derive(Debug, PartialEq, Eq, Serialize)]
struct ChainEntry {
    id: String,
    status: String,
    title: String,
}

impl From<&Request> for ChainEntry {
    fn from(request: &Request) -> Self {
        Self {
            id: request.id.0.clone(),
            status: request.status.as_str().to_string(),
            title: request.title.clone(),
        }
    }
}

pub fn run(request_id: &str, include_chain: bool) -> CommandResult {
    let (config, runtime) = match prepare("inspect") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let request_id = RequestId(request_id.to_string());

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let directory = Arc::new(SqlDirectory::new(pool.clone()));
        let context = WorkflowContext::new(
            Arc::new(SqlRequestStore::new(pool.clone())),
            directory.clone(),
            directory,
        )
        .with_config(config.workflow.clone());
        let service = RequestService::new(Arc::new(context));

        let inspection = async {
            let view = service.find_request(&request_id).await?;
            let chain = if include_chain {
                let chain = service.request_chain(&request_id).await?;
                Some(chain.iter().skip(1).map(ChainEntry::from).collect())
            } else {
                None
            };
            Ok::<_, signoff_core::ApplicationError>(Inspection { view, chain })
        }
        .await
        .map_err(|error| (error.code(), error.to_string(), 7u8));

        pool.close().await;
        inspection
    });

    match result {
        Ok(inspection) => match serde_json::to_string_pretty(&inspection) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("inspect", "serialization", error.to_string(), 8),
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("inspect", error_class, message, exit_code)
        }
    }
}
