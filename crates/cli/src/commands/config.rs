use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use answerbot_core::config::{AppConfig, LoadOptions, DERIVED_INSTANCE_ID_LEN};
use secrecy::ExposeSecret;
use toml::Value;

struct ConfigSources {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

impl ConfigSources {
    fn detect() -> Self {
        let path = detect_config_path();
        let doc = load_config_file_doc(path.as_deref());
        Self { path, doc }
    }

    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        let source = field_source(key_path, env_keys, self.doc.as_ref(), self.path.as_deref());
        render_line(key_path, value, source)
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let sources = ConfigSources::detect();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let explicit_instance_id = config.encryption.instance_id.is_some();
    let database_url = if explicit_instance_id {
        config.database.url.clone()
    } else {
        mask_derived_tail(&config.database.url)
    };
    lines.push(sources.line("database.url", &database_url, &["ANSWERBOT_DATABASE_URL"]));
    lines.push(sources.line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        &["ANSWERBOT_DATABASE_MAX_CONNECTIONS"],
    ));
    lines.push(sources.line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        &["ANSWERBOT_DATABASE_TIMEOUT_SECS"],
    ));

    lines.push(sources.line(
        "server.bind_address",
        &config.server.bind_address,
        &["ANSWERBOT_SERVER_BIND_ADDRESS"],
    ));
    lines.push(sources.line(
        "server.port",
        &config.server.port.to_string(),
        &["ANSWERBOT_SERVER_PORT"],
    ));
    lines.push(sources.line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        &["ANSWERBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    ));

    let instance_id = match &config.encryption.instance_id {
        Some(instance_id) => redact_token(instance_id.expose_secret()),
        None => format!("<derived from last {DERIVED_INSTANCE_ID_LEN} chars of database.url>"),
    };
    lines.push(sources.line(
        "encryption.instance_id",
        &instance_id,
        &["ANSWERBOT_ENCRYPTION_INSTANCE_ID"],
    ));

    lines.push(sources.line(
        "logging.level",
        &config.logging.level,
        &["ANSWERBOT_LOGGING_LEVEL", "ANSWERBOT_LOG_LEVEL"],
    ));
    lines.push(sources.line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["ANSWERBOT_LOGGING_FORMAT", "ANSWERBOT_LOG_FORMAT"],
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("answerbot.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/answerbot.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
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

/// The URL tail doubles as key material when no instance id is configured.
fn mask_derived_tail(url: &str) -> String {
    let chars: Vec<char> = url.chars().collect();
    let keep = chars.len().saturating_sub(DERIVED_INSTANCE_ID_LEN);
    let visible: String = chars[..keep].iter().collect();
    format!("{visible}***")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, mask_derived_tail, redact_token};

    #[test]
    fn derived_tail_is_masked() {
        let url = "sqlite://./data/answerbot-production-database.db";
        let masked = mask_derived_tail(url);

        assert!(masked.ends_with("***"));
        assert!(!masked.contains("production-database.db"));
        assert_eq!(mask_derived_tail("sqlite::memory:"), "***");
    }

    #[test]
    fn nested_key_paths_are_detected_in_config_file() {
        let doc: Value = "[encryption]\ninstance_id = \"abc\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "encryption.instance_id"));
        assert!(!contains_path(&doc, "server.port"));
    }

    #[test]
    fn instance_id_is_never_printed() {
        assert_eq!(redact_token("my-instance-id"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }
}
