use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use answerbot_core::domain::bot_config::{
    BotConfigDefaults, BotConfigUpdate, SEARCH_LIMIT_MAX, SEARCH_LIMIT_MIN,
};
use answerbot_core::errors::{ApplicationError, DomainError, InterfaceError};
use answerbot_core::secrets::RedactedBotConfig;
use answerbot_db::repositories::BotConfigRepository;

#[derive(Clone)]
pub struct ApiState {
    repository: Arc<dyn BotConfigRepository>,
    defaults: BotConfigDefaults,
}

impl ApiState {
    pub fn new(repository: Arc<dyn BotConfigRepository>, defaults: BotConfigDefaults) -> Self {
        Self { repository, defaults }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/bot/config", get(get_config).patch(update_config).put(update_config))
        .with_state(state)
}

/// Request body for `PATCH`/`PUT /api/bot/config`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BotConfigPayload {
    pub workspace_name: Option<String>,
    pub search_limit: Option<i64>,
    pub enable_voting: Option<bool>,
    pub apache_answer_api_url: Option<String>,
    pub apache_answer_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_channel_id: Option<String>,
    pub slack_signing_secret: Option<String>,
}

impl BotConfigPayload {
    pub fn into_update(self) -> Result<BotConfigUpdate, DomainError> {
        let search_limit = match self.search_limit {
            Some(value) => Some(validate_search_limit(value)?),
            None => None,
        };

        Ok(BotConfigUpdate {
            workspace_name: self.workspace_name,
            search_limit,
            enable_voting: self.enable_voting,
            apache_answer_api_url: self.apache_answer_api_url.map(SecretString::from),
            apache_answer_api_key: self.apache_answer_api_key.map(SecretString::from),
            slack_bot_token: self.slack_bot_token.map(SecretString::from),
            slack_app_token: self.slack_app_token.map(SecretString::from),
            slack_channel_id: self.slack_channel_id.map(SecretString::from),
            slack_signing_secret: self.slack_signing_secret.map(SecretString::from),
        })
    }
}

fn validate_search_limit(value: i64) -> Result<u32, DomainError> {
    u32::try_from(value)
        .ok()
        .filter(|limit| (SEARCH_LIMIT_MIN..=SEARCH_LIMIT_MAX).contains(limit))
        .ok_or_else(|| DomainError::search_limit_out_of_range(value))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub detail: Option<String>,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        match &value {
            ApplicationError::Domain(_) => warn!(
                event_name = "api.bot_config.rejected",
                correlation_id = %correlation_id,
                error = %value,
                "bot configuration request rejected"
            ),
            _ => error!(
                event_name = "api.bot_config.failed",
                correlation_id = %correlation_id,
                error = %value,
                "bot configuration request failed"
            ),
        }
        Self(value.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, Some(message.clone()))
            }
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn get_config(State(state): State<ApiState>) -> Result<Json<RedactedBotConfig>, ApiError> {
    let stored = state.repository.get().await.map_err(ApplicationError::from)?;

    let view = match stored {
        Some(config) => RedactedBotConfig::new(&config, true),
        None => RedactedBotConfig::new(&state.defaults.as_config(), false),
    };
    Ok(Json(view))
}

pub async fn update_config(
    State(state): State<ApiState>,
    payload: Result<Json<BotConfigPayload>, JsonRejection>,
) -> Result<Json<RedactedBotConfig>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        ApplicationError::from(DomainError::InvariantViolation(rejection.body_text()))
    })?;
    let update = payload.into_update().map_err(ApplicationError::from)?;

    let config = state.repository.update(update).await.map_err(ApplicationError::from)?;
    info!(
        event_name = "api.bot_config.updated",
        config_id = %config.id.0,
        "bot configuration updated"
    );

    Ok(Json(RedactedBotConfig::new(&config, true)))
}
