use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use flux_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key_path: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key_path: &'static str, env_key: &'static str, value: impl ToString) -> Self {
        Self { key_path, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", "FLUX_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "FLUX_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections,
        ),
        Field::new("database.timeout_secs", "FLUX_DATABASE_TIMEOUT_SECS", config.database.timeout_secs),
        Field::new("server.bind_address", "FLUX_SERVER_BIND_ADDRESS", &config.server.bind_address),
        Field::new("server.port", "FLUX_SERVER_PORT", config.server.port),
        Field::new(
            "server.graceful_shutdown_secs",
            "FLUX_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs,
        ),
        Field::new("server.allowed_origin", "FLUX_SERVER_ALLOWED_ORIGIN", &config.server.allowed_origin),
        Field::new(
            "lifecycle.sweep_interval_secs",
            "FLUX_LIFECYCLE_SWEEP_INTERVAL_SECS",
            config.lifecycle.sweep_interval_secs,
        ),
        Field::new(
            "lifecycle.sweep_batch_size",
            "FLUX_LIFECYCLE_SWEEP_BATCH_SIZE",
            config.lifecycle.sweep_batch_size,
        ),
        Field::new(
            "notifications.channel_capacity",
            "FLUX_NOTIFICATIONS_CHANNEL_CAPACITY",
            config.notifications.channel_capacity,
        ),
        Field::new(
            "ledger.signing_key",
            "FLUX_LEDGER_SIGNING_KEY",
            redact_secret(config.ledger.signing_key.expose_secret()),
        ),
        Field::new("logging.level", "FLUX_LOGGING_LEVEL", &config.logging.level),
        Field::new("logging.format", "FLUX_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("flux.toml"), PathBuf::from("config/flux.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

/// Keeps the first four characters so operators can tell keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<unset>".to_string();
    }
    let visible: String = trimmed.chars().take(4).collect();
    format!("{visible}***")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_keep_only_a_short_prefix() {
        assert_eq!(redact_secret("ledger-signing-key-0001"), "ledg***");
        assert_eq!(redact_secret("   "), "<unset>");
    }

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc: toml::Value = "[ledger]\nsigning_key = \"x\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "ledger.signing_key"));
        assert!(!contains_path(&doc, "ledger.secret"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
