use std::sync::Arc;

use answerbot_core::config::{AppConfig, ConfigError, LoadOptions};
use answerbot_core::domain::bot_config::BotConfigDefaults;
use answerbot_core::secrets::FieldCipher;
use answerbot_db::repositories::SqlBotConfigRepository;
use answerbot_db::{connect_with_config, migrations, DbPool};
use axum::Router;
use thiserror::Error;
use tracing::info;

use crate::{api, health};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub bot_config: Arc<SqlBotConfigRepository>,
}

impl Application {
    /// Health probe plus the bot configuration API on a single listener.
    pub fn router(&self) -> Router {
        let state = api::ApiState::new(self.bot_config.clone(), self.bot_config.defaults().clone());
        health::router(self.db_pool.clone()).merge(api::router(state))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("encryption self-test failed for the configured instance id")]
    EncryptionUnavailable,
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
        "database migrations applied"
    );

    let cipher = FieldCipher::new(config.encryption_instance_id());
    if !cipher.test_round_trip(&FieldCipher::generate_salt()) {
        return Err(BootstrapError::EncryptionUnavailable);
    }
    info!(
        event_name = "system.bootstrap.encryption_ready",
        correlation_id = "bootstrap",
        explicit_instance_id = config.encryption.instance_id.is_some(),
        "field encryption self-test passed"
    );

    let bot_config = Arc::new(
        SqlBotConfigRepository::new(db_pool.clone(), cipher)
            .with_defaults(BotConfigDefaults::default()),
    );

    Ok(Application { config, db_pool, bot_config })
}

#[cfg(test)]
mod tests {
    use answerbot_core::config::{ConfigOverrides, LoadOptions};
    use answerbot_core::domain::bot_config::BotConfigUpdate;
    use answerbot_db::repositories::BotConfigRepository;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use secrecy::{ExposeSecret, SecretString};
    use tower::ServiceExt;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn options(database_url: &str, instance_id: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                encryption_instance_id: instance_id.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    fn database_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}?mode=rwc", dir.path().join("answerbot.db").display())
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_url() {
        let result = bootstrap(options("postgres://localhost/answerbot", None)).await;

        let error = result.err().expect("bootstrap should fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_serves_bot_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(&database_url(&dir), Some("bootstrap-instance")))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'bot_config'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("bot_config table lookup");
        assert_eq!(table_count, 1);

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("health response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router()
            .oneshot(
                Request::builder().uri("/api/bot/config").body(Body::empty()).expect("request"),
            )
            .await
            .expect("config response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(body["persisted"], false);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn restart_with_same_instance_id_reads_back_secrets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = database_url(&dir);

        let first = bootstrap(options(&url, Some("stable-instance"))).await.expect("first boot");
        first
            .bot_config
            .update(BotConfigUpdate {
                slack_app_token: Some(SecretString::from("xapp-restart".to_string())),
                ..BotConfigUpdate::default()
            })
            .await
            .expect("update");
        first.db_pool.close().await;

        let second = bootstrap(options(&url, Some("stable-instance"))).await.expect("second boot");
        let loaded = second.bot_config.get().await.expect("get").expect("record");
        assert_eq!(loaded.slack_app_token.expose_secret(), "xapp-restart");
        second.db_pool.close().await;

        let foreign = bootstrap(options(&url, Some("other-instance"))).await.expect("third boot");
        assert!(foreign.bot_config.get().await.is_err());
        foreign.db_pool.close().await;
    }
}
