use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::domain::bot_config::BotConfig;

/// Operator-facing view of [`BotConfig`]. Credentials are redacted; the API
/// URL and channel id are identifiers rather than credentials and pass through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedBotConfig {
    pub id: String,
    pub workspace_name: String,
    pub search_limit: u32,
    pub enable_voting: bool,
    pub apache_answer_api_url: String,
    pub apache_answer_api_key: String,
    pub apache_answer_api_key_configured: bool,
    pub slack_bot_token: String,
    pub slack_bot_token_configured: bool,
    pub slack_app_token: String,
    pub slack_app_token_configured: bool,
    pub slack_channel_id: String,
    pub slack_signing_secret: String,
    pub slack_signing_secret_configured: bool,
    pub encrypted: bool,
    pub persisted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl RedactedBotConfig {
    pub fn new(config: &BotConfig, persisted: bool) -> Self {
        Self {
            id: config.id.0.clone(),
            workspace_name: config.workspace_name.clone(),
            search_limit: config.search_limit,
            enable_voting: config.enable_voting,
            apache_answer_api_url: config.apache_answer_api_url.expose_secret().to_string(),
            apache_answer_api_key: redact_secret(&config.apache_answer_api_key),
            apache_answer_api_key_configured: is_configured(&config.apache_answer_api_key),
            slack_bot_token: redact_secret(&config.slack_bot_token),
            slack_bot_token_configured: is_configured(&config.slack_bot_token),
            slack_app_token: redact_secret(&config.slack_app_token),
            slack_app_token_configured: is_configured(&config.slack_app_token),
            slack_channel_id: config.slack_channel_id.expose_secret().to_string(),
            slack_signing_secret: redact_secret(&config.slack_signing_secret),
            slack_signing_secret_configured: is_configured(&config.slack_signing_secret),
            encrypted: config.is_encrypted(),
            persisted,
            created_at: config.created_at.to_rfc3339(),
            updated_at: config.updated_at.to_rfc3339(),
        }
    }
}

pub fn is_configured(secret: &SecretString) -> bool {
    !secret.expose_secret().trim().is_empty()
}

/// Empty stays empty; Slack tokens keep their type prefix (`xoxb-`, `xapp-`).
pub fn redact_secret(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        if prefix.len() <= 5 && prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return format!("{prefix}-***");
        }
    }

    "<redacted>".to_string()
}
