use answerbot_db::DbPool;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub bot_config: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let bot_config = bot_config_check(&state.db_pool).await;
    let ready = database.status == "ready" && bot_config.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "answerbot-server runtime initialized".to_string(),
        },
        database,
        bot_config,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            warn!(
                event_name = "system.health.database_degraded",
                error = %error,
                "health check database query failed"
            );
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// An absent record is still ready: `GET /api/bot/config` serves defaults.
async fn bot_config_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bot_config").fetch_one(pool).await {
        Ok(0) => HealthCheck {
            status: "ready",
            detail: "no bot configuration stored yet; serving defaults".to_string(),
        },
        Ok(_) => HealthCheck { status: "ready", detail: "bot configuration stored".to_string() },
        Err(error) => {
            warn!(
                event_name = "system.health.bot_config_degraded",
                error = %error,
                "health check could not read bot_config"
            );
            HealthCheck {
                status: "degraded",
                detail: format!("bot_config table unavailable: {error}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use answerbot_db::{connect_with_settings, migrations, DbPool};
    use axum::{extract::State, http::StatusCode, Json};

    use crate::health::{health, HealthState};

    async fn pool() -> DbPool {
        connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect")
    }

    #[tokio::test]
    async fn health_is_ready_on_migrated_database_without_a_record() {
        let pool = pool().await;
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.bot_config.status, "ready");
        assert!(payload.bot_config.detail.contains("serving defaults"));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_reports_stored_bot_configuration() {
        let pool = pool().await;
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO bot_config (id, workspace_name, created_at, updated_at)
             VALUES ('cfg-1', 'Docs', '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("insert record");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.bot_config.detail, "bot configuration stored");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_is_degraded_before_migrations() {
        let pool = pool().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.bot_config.status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = pool().await;
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.bot_config.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
