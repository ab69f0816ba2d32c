use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};

use answerbot_core::domain::bot_config::{
    BotConfig, BotConfigDefaults, BotConfigId, BotConfigUpdate, SensitiveField, StoredBotConfig,
};
use answerbot_core::secrets::{BotConfigMapper, FieldCipher};

use super::{BotConfigRepository, RepositoryError};
use crate::DbPool;

const SELECT_FIRST_ROW: &str = "SELECT id, workspace_name, search_limit, enable_voting,
        apache_answer_api_url_encrypted, apache_answer_api_key_encrypted,
        slack_bot_token_encrypted, slack_app_token_encrypted,
        slack_channel_id_encrypted, slack_signing_secret_encrypted,
        encryption_salt, created_at, updated_at
 FROM bot_config
 ORDER BY created_at ASC
 LIMIT 1";

pub struct SqlBotConfigRepository {
    pool: DbPool,
    cipher: FieldCipher,
    defaults: BotConfigDefaults,
}

impl SqlBotConfigRepository {
    pub fn new(pool: DbPool, cipher: FieldCipher) -> Self {
        Self { pool, cipher, defaults: BotConfigDefaults::default() }
    }

    pub fn with_defaults(mut self, defaults: BotConfigDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &BotConfigDefaults {
        &self.defaults
    }

    fn decrypt(&self, row: &StoredBotConfig) -> Result<BotConfig, RepositoryError> {
        BotConfigMapper::new(&self.cipher).to_application_shape(row).map_err(|error| {
            warn!(
                event_name = "bot_config.decrypt_failed",
                config_id = %row.id.0,
                error = %error,
                "stored bot configuration could not be decrypted"
            );
            RepositoryError::from(error)
        })
    }
}

/// Builds a brand-new row for `update` (defaults fill unset fields).
pub(crate) fn plan_create(
    cipher: &FieldCipher,
    defaults: &BotConfigDefaults,
    update: BotConfigUpdate,
    now: DateTime<Utc>,
) -> Result<StoredBotConfig, RepositoryError> {
    plan_create_with_salt(cipher, defaults, update, FieldCipher::generate_salt(), now)
}

fn plan_create_with_salt(
    cipher: &FieldCipher,
    defaults: &BotConfigDefaults,
    update: BotConfigUpdate,
    salt: String,
    now: DateTime<Utc>,
) -> Result<StoredBotConfig, RepositoryError> {
    if !cipher.test_round_trip(&salt) {
        return Err(RepositoryError::EncryptionUnavailable);
    }

    let update = update.merged_over(defaults.as_update());
    let patch = BotConfigMapper::new(cipher).to_storage_shape(&update, &salt)?;
    Ok(StoredBotConfig::from_patch(BotConfigId::generate(), patch, now))
}

/// Merges `update` into `existing`.
///
/// A salted row keeps its salt and only the supplied fields are re-encrypted.
/// A legacy row without a salt is upgraded: a new salt is assigned and every
/// sensitive column is encrypted, including the ones `update` leaves alone.
pub(crate) fn plan_update(
    cipher: &FieldCipher,
    mut existing: StoredBotConfig,
    update: BotConfigUpdate,
    now: DateTime<Utc>,
) -> Result<StoredBotConfig, RepositoryError> {
    let mapper = BotConfigMapper::new(cipher);

    let patch = match existing.encryption_salt.clone() {
        Some(salt) => mapper.to_storage_shape(&update, &salt)?,
        None => {
            let salt = FieldCipher::generate_salt();
            if !cipher.test_round_trip(&salt) {
                return Err(RepositoryError::EncryptionUnavailable);
            }

            let mut upgraded = update;
            for field in SensitiveField::ALL {
                if upgraded.secret(field).is_none() {
                    let plaintext = existing.stored(field).to_string();
                    upgraded.set_secret(field, SecretString::from(plaintext));
                }
            }

            info!(
                event_name = "bot_config.legacy_upgrade",
                config_id = %existing.id.0,
                "assigning encryption salt to legacy bot configuration"
            );
            mapper.to_storage_shape(&upgraded, &salt)?
        }
    };

    existing.apply_patch(patch, now);
    Ok(existing)
}

fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid {column} `{value}`: {error}")))
}

fn row_to_stored(row: &sqlx::sqlite::SqliteRow) -> Result<StoredBotConfig, RepositoryError> {
    let sensitive = |column: &str| -> Result<String, RepositoryError> {
        let value: Option<String> = row.try_get(column).map_err(decode_err)?;
        Ok(value.unwrap_or_default())
    };

    let search_limit: i64 = row.try_get("search_limit").map_err(decode_err)?;
    let search_limit = u32::try_from(search_limit)
        .map_err(|_| RepositoryError::Decode(format!("invalid search_limit `{search_limit}`")))?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(StoredBotConfig {
        id: BotConfigId(row.try_get("id").map_err(decode_err)?),
        workspace_name: row.try_get("workspace_name").map_err(decode_err)?,
        search_limit,
        enable_voting: row.try_get("enable_voting").map_err(decode_err)?,
        apache_answer_api_url: sensitive(SensitiveField::ApacheAnswerApiUrl.column())?,
        apache_answer_api_key: sensitive(SensitiveField::ApacheAnswerApiKey.column())?,
        slack_bot_token: sensitive(SensitiveField::SlackBotToken.column())?,
        slack_app_token: sensitive(SensitiveField::SlackAppToken.column())?,
        slack_channel_id: sensitive(SensitiveField::SlackChannelId.column())?,
        slack_signing_secret: sensitive(SensitiveField::SlackSigningSecret.column())?,
        encryption_salt: row.try_get("encryption_salt").map_err(decode_err)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

async fn fetch_first(conn: &mut SqliteConnection) -> Result<Option<StoredBotConfig>, RepositoryError> {
    let row = sqlx::query(SELECT_FIRST_ROW).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_stored).transpose()
}

async fn insert_row(conn: &mut SqliteConnection, row: &StoredBotConfig) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO bot_config (id, workspace_name, search_limit, enable_voting,
                                 apache_answer_api_url_encrypted, apache_answer_api_key_encrypted,
                                 slack_bot_token_encrypted, slack_app_token_encrypted,
                                 slack_channel_id_encrypted, slack_signing_secret_encrypted,
                                 encryption_salt, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id.0)
    .bind(&row.workspace_name)
    .bind(i64::from(row.search_limit))
    .bind(row.enable_voting)
    .bind(&row.apache_answer_api_url)
    .bind(&row.apache_answer_api_key)
    .bind(&row.slack_bot_token)
    .bind(&row.slack_app_token)
    .bind(&row.slack_channel_id)
    .bind(&row.slack_signing_secret)
    .bind(&row.encryption_salt)
    .bind(row.created_at.to_rfc3339())
    .bind(row.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn write_row(conn: &mut SqliteConnection, row: &StoredBotConfig) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE bot_config SET
             workspace_name = ?,
             search_limit = ?,
             enable_voting = ?,
             apache_answer_api_url_encrypted = ?,
             apache_answer_api_key_encrypted = ?,
             slack_bot_token_encrypted = ?,
             slack_app_token_encrypted = ?,
             slack_channel_id_encrypted = ?,
             slack_signing_secret_encrypted = ?,
             encryption_salt = ?,
             updated_at = ?
         WHERE id = ?",
    )
    .bind(&row.workspace_name)
    .bind(i64::from(row.search_limit))
    .bind(row.enable_voting)
    .bind(&row.apache_answer_api_url)
    .bind(&row.apache_answer_api_key)
    .bind(&row.slack_bot_token)
    .bind(&row.slack_app_token)
    .bind(&row.slack_channel_id)
    .bind(&row.slack_signing_secret)
    .bind(&row.encryption_salt)
    .bind(row.updated_at.to_rfc3339())
    .bind(&row.id.0)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl BotConfigRepository for SqlBotConfigRepository {
    async fn get(&self) -> Result<Option<BotConfig>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match fetch_first(&mut conn).await? {
            Some(row) => Ok(Some(self.decrypt(&row)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, update: BotConfigUpdate) -> Result<BotConfig, RepositoryError> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        if fetch_first(&mut tx).await?.is_some() {
            return Err(RepositoryError::AlreadyExists);
        }

        let row = plan_create(&self.cipher, &self.defaults, update, Utc::now())?;
        let config = self.decrypt(&row)?;
        insert_row(&mut tx, &row).await?;
        tx.commit().await?;
        info!(
            event_name = "bot_config.created",
            config_id = %row.id.0,
            "bot configuration created"
        );

        Ok(config)
    }

    async fn update(&self, update: BotConfigUpdate) -> Result<BotConfig, RepositoryError> {
        // IMMEDIATE takes the write lock up front, so the read below cannot go
        // stale before the merged row is written back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let (row, created) = match fetch_first(&mut tx).await? {
            None => (plan_create(&self.cipher, &self.defaults, update, Utc::now())?, true),
            Some(existing) => (plan_update(&self.cipher, existing, update, Utc::now())?, false),
        };

        // The merged row must decrypt under this instance before it is written;
        // returning early drops `tx`, which rolls the transaction back.
        let config = self.decrypt(&row)?;
        if created {
            insert_row(&mut tx, &row).await?;
        } else {
            write_row(&mut tx, &row).await?;
        }

        tx.commit().await?;
        let event_name = if created { "bot_config.created" } else { "bot_config.updated" };
        info!(
            event_name,
            config_id = %row.id.0,
            "bot configuration saved"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::{ExposeSecret, SecretString};
    use sqlx::Row;

    use answerbot_core::domain::bot_config::{
        BotConfigDefaults, BotConfigUpdate, SensitiveField, StoredBotConfig,
    };
    use answerbot_core::secrets::{ConfigurationError, FieldCipher};

    use super::{fetch_first, plan_create_with_salt, SqlBotConfigRepository};
    use crate::repositories::{BotConfigRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn cipher() -> FieldCipher {
        FieldCipher::new(SecretString::from("sql-repository-test".to_string()))
    }

    fn secret(value: &str) -> Option<SecretString> {
        Some(SecretString::from(value.to_string()))
    }

    async fn row_count(pool: &sqlx::SqlitePool) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bot_config")
            .fetch_one(pool)
            .await
            .expect("count rows")
    }

    async fn stored_column(pool: &sqlx::SqlitePool, column: &str) -> Option<String> {
        sqlx::query(&format!("SELECT {column} AS value FROM bot_config"))
            .fetch_one(pool)
            .await
            .expect("read column")
            .get::<Option<String>, _>("value")
    }

    async fn insert_legacy_row(pool: &sqlx::SqlitePool) {
        sqlx::query(
            "INSERT INTO bot_config (id, workspace_name, search_limit, enable_voting,
                                     apache_answer_api_url_encrypted, apache_answer_api_key_encrypted,
                                     slack_bot_token_encrypted, slack_app_token_encrypted,
                                     slack_channel_id_encrypted, slack_signing_secret_encrypted,
                                     encryption_salt, created_at, updated_at)
             VALUES ('legacy-1', 'Legacy', 7, 0, 'https://legacy.example', 'answer-key',
                     'xoxb-legacy', 'xapp-legacy', 'C123', 'signing-legacy', NULL,
                     '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        )
        .execute(pool)
        .await
        .expect("insert legacy row");
    }

    #[tokio::test]
    async fn get_returns_none_when_no_record_exists() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool, cipher());

        assert!(repo.get().await.expect("get").is_none());
    }

    #[tokio::test]
    async fn create_then_get_returns_plaintext_view() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());

        let created = repo
            .create(BotConfigUpdate {
                apache_answer_api_url: secret("https://x.example"),
                slack_bot_token: secret("xoxb-AAA"),
                search_limit: Some(10),
                enable_voting: Some(true),
                ..BotConfigUpdate::default()
            })
            .await
            .expect("create");

        let loaded = repo.get().await.expect("get").expect("record exists");
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.apache_answer_api_url.expose_secret(), "https://x.example");
        assert_eq!(loaded.slack_bot_token.expose_secret(), "xoxb-AAA");
        assert_eq!(loaded.search_limit, 10);
        assert!(loaded.enable_voting);
        assert!(loaded.encryption_salt.as_deref().is_some_and(|salt| !salt.is_empty()));

        let stored_token = stored_column(&pool, "slack_bot_token_encrypted").await;
        assert!(stored_token.as_deref().is_some_and(|value| value != "xoxb-AAA"));
        let stored_url = stored_column(&pool, "apache_answer_api_url_encrypted").await;
        assert!(stored_url.as_deref().is_some_and(|value| !value.contains("x.example")));
    }

    #[tokio::test]
    async fn first_update_creates_a_single_record_from_defaults() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());

        let first = repo
            .update(BotConfigUpdate { slack_bot_token: secret("xoxb-1"), ..Default::default() })
            .await
            .expect("first update");
        let second = repo
            .update(BotConfigUpdate { workspace_name: Some("Docs".to_string()), ..Default::default() })
            .await
            .expect("second update");

        assert_eq!(row_count(&pool).await, 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.search_limit, BotConfigDefaults::default().search_limit);
        assert_eq!(first.workspace_name, BotConfigDefaults::default().workspace_name);
        assert_eq!(second.workspace_name, "Docs");
        assert_eq!(second.slack_bot_token.expose_secret(), "xoxb-1");
    }

    #[tokio::test]
    async fn partial_update_changes_only_supplied_fields() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());

        let created = repo
            .create(BotConfigUpdate {
                workspace_name: Some("Docs".to_string()),
                apache_answer_api_url: secret("https://x.example"),
                apache_answer_api_key: secret("answer-key"),
                slack_bot_token: secret("xoxb-AAA"),
                slack_signing_secret: secret("signing"),
                search_limit: Some(10),
                enable_voting: Some(true),
                ..BotConfigUpdate::default()
            })
            .await
            .expect("create");
        let stored_before = stored_column(&pool, "slack_bot_token_encrypted").await;

        let updated = repo
            .update(BotConfigUpdate { search_limit: Some(25), ..BotConfigUpdate::default() })
            .await
            .expect("update");

        assert_eq!(updated.search_limit, 25);
        assert_eq!(updated.workspace_name, "Docs");
        assert!(updated.enable_voting);
        assert_eq!(updated.encryption_salt, created.encryption_salt);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.apache_answer_api_url.expose_secret(), "https://x.example");
        assert_eq!(updated.apache_answer_api_key.expose_secret(), "answer-key");
        assert_eq!(updated.slack_bot_token.expose_secret(), "xoxb-AAA");
        assert_eq!(updated.slack_signing_secret.expose_secret(), "signing");
        assert_eq!(stored_column(&pool, "slack_bot_token_encrypted").await, stored_before);
    }

    #[tokio::test]
    async fn update_can_clear_a_secret() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());
        repo.create(BotConfigUpdate { slack_app_token: secret("xapp-1"), ..Default::default() })
            .await
            .expect("create");

        let updated = repo
            .update(BotConfigUpdate { slack_app_token: secret(""), ..Default::default() })
            .await
            .expect("update");

        assert_eq!(updated.slack_app_token.expose_secret(), "");
        assert_eq!(stored_column(&pool, "slack_app_token_encrypted").await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn legacy_row_is_returned_as_stored() {
        let pool = setup().await;
        insert_legacy_row(&pool).await;
        let repo = SqlBotConfigRepository::new(pool, cipher());

        let loaded = repo.get().await.expect("get").expect("legacy row");

        assert!(loaded.encryption_salt.is_none());
        assert_eq!(loaded.workspace_name, "Legacy");
        assert_eq!(loaded.search_limit, 7);
        assert!(!loaded.enable_voting);
        assert_eq!(loaded.slack_bot_token.expose_secret(), "xoxb-legacy");
        assert_eq!(loaded.apache_answer_api_url.expose_secret(), "https://legacy.example");
    }

    #[tokio::test]
    async fn first_update_of_legacy_row_encrypts_every_sensitive_column() {
        let pool = setup().await;
        insert_legacy_row(&pool).await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());

        let updated = repo
            .update(BotConfigUpdate { slack_bot_token: secret("xoxb-new"), ..Default::default() })
            .await
            .expect("upgrade");

        assert!(updated.encryption_salt.is_some());
        assert_eq!(updated.slack_bot_token.expose_secret(), "xoxb-new");
        assert_eq!(updated.slack_app_token.expose_secret(), "xapp-legacy");
        assert_eq!(updated.slack_channel_id.expose_secret(), "C123");
        assert_eq!(updated.apache_answer_api_key.expose_secret(), "answer-key");

        for field in SensitiveField::ALL {
            let stored = stored_column(&pool, field.column()).await.unwrap_or_default();
            assert!(
                !["xoxb-new", "xapp-legacy", "C123", "answer-key", "signing-legacy"]
                    .contains(&stored.as_str()),
                "{} still holds plaintext",
                field.column()
            );
        }

        let reloaded = repo.get().await.expect("get").expect("row");
        assert_eq!(reloaded.slack_signing_secret.expose_secret(), "signing-legacy");
        assert_eq!(reloaded.apache_answer_api_url.expose_secret(), "https://legacy.example");
    }

    #[tokio::test]
    async fn get_surfaces_configuration_error_for_foreign_instance() {
        let pool = setup().await;
        SqlBotConfigRepository::new(pool.clone(), cipher())
            .create(BotConfigUpdate { slack_bot_token: secret("xoxb-AAA"), ..Default::default() })
            .await
            .expect("create");

        let moved = FieldCipher::new(SecretString::from("another-deployment".to_string()));
        let error = SqlBotConfigRepository::new(pool, moved).get().await.expect_err("must fail");

        assert!(matches!(
            error,
            RepositoryError::Configuration(ConfigurationError::Decrypt { .. })
        ));
    }

    async fn stored_row(pool: &sqlx::SqlitePool) -> StoredBotConfig {
        let mut conn = pool.acquire().await.expect("acquire");
        fetch_first(&mut conn).await.expect("fetch").expect("row")
    }

    #[tokio::test]
    async fn foreign_instance_update_is_rolled_back() {
        let pool = setup().await;
        let owner = SqlBotConfigRepository::new(pool.clone(), cipher());
        owner
            .create(BotConfigUpdate { slack_bot_token: secret("xoxb-AAA"), ..Default::default() })
            .await
            .expect("create");
        let before = stored_row(&pool).await;

        let moved = FieldCipher::new(SecretString::from("another-deployment".to_string()));
        let error = SqlBotConfigRepository::new(pool.clone(), moved)
            .update(BotConfigUpdate { slack_app_token: secret("xapp-B"), ..Default::default() })
            .await
            .expect_err("update under a foreign key must fail");

        assert!(matches!(
            error,
            RepositoryError::Configuration(ConfigurationError::Decrypt { .. })
        ));
        assert_eq!(stored_row(&pool).await, before);

        let loaded = owner.get().await.expect("owner can still read").expect("row");
        assert_eq!(loaded.slack_bot_token.expose_secret(), "xoxb-AAA");
        assert_eq!(loaded.slack_app_token.expose_secret(), "");
    }

    #[tokio::test]
    async fn create_rejects_a_second_record() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());
        repo.create(BotConfigUpdate::default()).await.expect("first create");

        let second = repo.create(BotConfigUpdate::default()).await;

        assert!(matches!(second, Err(RepositoryError::AlreadyExists)));
        assert_eq!(row_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_fields() {
        let pool = setup().await;
        let repo = SqlBotConfigRepository::new(pool.clone(), cipher());
        repo.create(BotConfigUpdate::default()).await.expect("create");

        let (left, right) = tokio::join!(
            repo.update(BotConfigUpdate { search_limit: Some(30), ..Default::default() }),
            repo.update(BotConfigUpdate { slack_channel_id: secret("C999"), ..Default::default() }),
        );
        left.expect("left update");
        right.expect("right update");

        let loaded = repo.get().await.expect("get").expect("row");
        assert_eq!(loaded.search_limit, 30);
        assert_eq!(loaded.slack_channel_id.expose_secret(), "C999");
        assert_eq!(row_count(&pool).await, 1);
    }

    #[test]
    fn create_refuses_salt_that_fails_self_test() {
        let result = plan_create_with_salt(
            &cipher(),
            &BotConfigDefaults::default(),
            BotConfigUpdate::default(),
            String::new(),
            Utc::now(),
        );

        assert!(matches!(result, Err(RepositoryError::EncryptionUnavailable)));
    }
}
