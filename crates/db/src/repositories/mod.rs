use async_trait::async_trait;
use thiserror::Error;

use answerbot_core::domain::bot_config::{BotConfig, BotConfigUpdate};
use answerbot_core::errors::ApplicationError;
use answerbot_core::secrets::ConfigurationError;

pub mod bot_config;
pub mod memory;

pub use bot_config::SqlBotConfigRepository;
pub use memory::InMemoryBotConfigRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("bot configuration already exists")]
    AlreadyExists,
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("encryption self-test failed; refusing to persist a record that could not be read back")]
    EncryptionUnavailable,
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => Self::Persistence(message),
            RepositoryError::AlreadyExists => {
                Self::Persistence(RepositoryError::AlreadyExists.to_string())
            }
            RepositoryError::Configuration(error) => Self::Configuration(error.to_string()),
            RepositoryError::EncryptionUnavailable => {
                Self::EncryptionUnavailable(RepositoryError::EncryptionUnavailable.to_string())
            }
        }
    }
}

/// Access to the singleton bot configuration record.
///
/// Implementations encrypt sensitive fields before they are written and
/// decrypt them after they are read; callers only ever see [`BotConfig`].
#[async_trait]
pub trait BotConfigRepository: Send + Sync {
    /// Returns `None` when no record has been created yet.
    async fn get(&self) -> Result<Option<BotConfig>, RepositoryError>;

    /// Creates the record under a freshly generated salt.
    async fn create(&self, update: BotConfigUpdate) -> Result<BotConfig, RepositoryError>;

    /// Merges `update` into the record, creating it from defaults first if needed.
    async fn update(&self, update: BotConfigUpdate) -> Result<BotConfig, RepositoryError>;
}
