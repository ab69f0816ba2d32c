pub mod config;
pub mod domain;
pub mod errors;
pub mod secrets;

pub use domain::bot_config::{
    BotConfig, BotConfigDefaults, BotConfigId, BotConfigUpdate, SensitiveField, StoredBotConfig,
    StoredBotConfigPatch,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use secrets::{
    BotConfigMapper, CipherError, ConfigurationError, FieldCipher, RedactedBotConfig,
};
