use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// `(key path, environment variables that can set it)`, in display order.
const FIELDS: &[(&str, &[&str])] = &[
    ("database.url", &["SIGNOFF_DATABASE_URL"]),
    ("database.max_connections", &["SIGNOFF_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["SIGNOFF_DATABASE_TIMEOUT_SECS"]),
    ("server.bind_address", &["SIGNOFF_SERVER_BIND_ADDRESS"]),
    ("server.port", &["SIGNOFF_SERVER_PORT"]),
    ("server.graceful_shutdown_secs", &["SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS"]),
    ("workflow.max_conflict_retries", &["SIGNOFF_WORKFLOW_MAX_CONFLICT_RETRIES"]),
    ("workflow.publish_events", &["SIGNOFF_WORKFLOW_PUBLISH_EVENTS"]),
    ("logging.level", &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"]),
    ("logging.format", &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"]),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_keys) in FIELDS {
        lines.push(render_line(
            key_path,
            &effective_value(&config, key_path),
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    lines.join("\n")
}

fn effective_value(config: &AppConfig, key_path: &str) -> String {
    match key_path {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "workflow.max_conflict_retries" => config.workflow.max_conflict_retries.to_string(),
        "workflow.publish_events" => config.workflow.publish_events.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format).to_lowercase(),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    ["signoff.toml", "config/signoff.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
