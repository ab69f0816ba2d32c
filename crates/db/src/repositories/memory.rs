use chrono::Utc;
use tokio::sync::RwLock;

use answerbot_core::domain::bot_config::{
    BotConfig, BotConfigDefaults, BotConfigUpdate, StoredBotConfig,
};
use answerbot_core::secrets::{BotConfigMapper, FieldCipher};

use super::bot_config::{plan_create, plan_update};
use super::{BotConfigRepository, RepositoryError};

/// Process-local store with the same encryption semantics as the SQL repository.
pub struct InMemoryBotConfigRepository {
    row: RwLock<Option<StoredBotConfig>>,
    cipher: FieldCipher,
    defaults: BotConfigDefaults,
}

impl InMemoryBotConfigRepository {
    pub fn new(cipher: FieldCipher) -> Self {
        Self { row: RwLock::new(None), cipher, defaults: BotConfigDefaults::default() }
    }

    /// Seeds the store with an already-stored row, e.g. a legacy plaintext one.
    pub fn with_row(cipher: FieldCipher, row: StoredBotConfig) -> Self {
        Self { row: RwLock::new(Some(row)), cipher, defaults: BotConfigDefaults::default() }
    }

    pub async fn stored(&self) -> Option<StoredBotConfig> {
        self.row.read().await.clone()
    }
}

#[async_trait::async_trait]
impl BotConfigRepository for InMemoryBotConfigRepository {
    async fn get(&self) -> Result<Option<BotConfig>, RepositoryError> {
        let row = self.row.read().await;
        let mapper = BotConfigMapper::new(&self.cipher);
        Ok(row.as_ref().map(|row| mapper.to_application_shape(row)).transpose()?)
    }

    async fn create(&self, update: BotConfigUpdate) -> Result<BotConfig, RepositoryError> {
        let mut slot = self.row.write().await;
        if slot.is_some() {
            return Err(RepositoryError::AlreadyExists);
        }

        let row = plan_create(&self.cipher, &self.defaults, update, Utc::now())?;
        let config = BotConfigMapper::new(&self.cipher).to_application_shape(&row)?;
        *slot = Some(row);
        Ok(config)
    }

    async fn update(&self, update: BotConfigUpdate) -> Result<BotConfig, RepositoryError> {
        let mut slot = self.row.write().await;

        // Work on a copy so a failure leaves the stored row untouched.
        let row = match slot.clone() {
            None => plan_create(&self.cipher, &self.defaults, update, Utc::now())?,
            Some(existing) => plan_update(&self.cipher, existing, update, Utc::now())?,
        };

        let config = BotConfigMapper::new(&self.cipher).to_application_shape(&row)?;
        *slot = Some(row);
        Ok(config)
    }
}
