use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use signoff_cli::commands::{doctor, inspect, migrate, seed};
use signoff_core::{Caller, MemberId, NewRequest, RequestService, StageId, WorkflowContext};
use signoff_db::{connect_with_settings, SqlDirectory, SqlRequestStore};

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("SIGNOFF_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "schema at version 2");
    });
}

#[test]
fn migrate_reports_config_failure() {
    with_env(&[("SIGNOFF_DATABASE_URL", "mysql://localhost/signoff")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "{}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "{}", second.output);
        assert_eq!(first_payload["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn doctor_flags_an_unmigrated_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "{}", after.output);
        assert_eq!(parse_payload(&after.output)["overall_status"], "pass");
    });
}

#[test]
fn inspect_reports_missing_requests_with_their_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = inspect::run("REQ-missing", false);
        assert_eq!(result.exit_code, 7);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "inspect");
        assert_eq!(payload["error_class"], "request_not_found");
    });
}

#[test]
fn inspect_prints_the_tally_of_a_stored_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);
        let request_id = create_request(&url);

        let result = inspect::run(&request_id, true);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["view"]["request"]["id"], request_id.as_str());
        assert_eq!(payload["view"]["request"]["status"], "pending");
        assert_eq!(payload["view"]["tally"]["roster_size"], 2);
        assert_eq!(payload["chain"], Value::Array(Vec::new()));
    });
}

fn create_request(url: &str) -> String {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 30).await.expect("connect");
        let directory = Arc::new(SqlDirectory::new(pool.clone()));
        let context = WorkflowContext::new(
            Arc::new(SqlRequestStore::new(pool.clone())),
            directory.clone(),
            directory,
        );
        let service = RequestService::new(Arc::new(context));

        let view = service
            .create_request(
                &Caller::new(MemberId("mem-author".to_string()), "cli-test"),
                NewRequest {
                    author_id: MemberId("mem-author".to_string()),
                    stage_id: StageId("stage-release".to_string()),
                    title: "Cut release 2.4".to_string(),
                    content: String::new(),
                    approver_ids: vec![
                        MemberId("mem-alice".to_string()),
                        MemberId("mem-bob".to_string()),
                    ],
                    links: Vec::new(),
                    files: Vec::new(),
                },
            )
            .await
            .expect("request created");
        pool.close().await;
        view.request.id.0
    })
}

fn file_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("signoff.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SIGNOFF_DATABASE_URL",
        "SIGNOFF_DATABASE_MAX_CONNECTIONS",
        "SIGNOFF_DATABASE_TIMEOUT_SECS",
        "SIGNOFF_SERVER_BIND_ADDRESS",
        "SIGNOFF_SERVER_PORT",
        "SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SIGNOFF_WORKFLOW_MAX_CONFLICT_RETRIES",
        "SIGNOFF_WORKFLOW_PUBLISH_EVENTS",
        "SIGNOFF_LOGGING_LEVEL",
        "SIGNOFF_LOGGING_FORMAT",
        "SIGNOFF_LOG_LEVEL",
        "SIGNOFF_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
