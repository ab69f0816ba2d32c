use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use super::cipher::{CipherError, FieldCipher};
use crate::domain::bot_config::{
    BotConfig, BotConfigUpdate, SensitiveField, StoredBotConfig, StoredBotConfigPatch,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("an encryption salt is required to store sensitive fields")]
    MissingSalt,
    #[error("could not encrypt `{}`: {source}", .field.column())]
    Encrypt { field: SensitiveField, source: CipherError },
    #[error("could not decrypt `{}`: {source}", .field.column())]
    Decrypt { field: SensitiveField, source: CipherError },
}

/// Translates between [`BotConfig`] and its encrypted storage row.
#[derive(Clone, Copy, Debug)]
pub struct BotConfigMapper<'a> {
    cipher: &'a FieldCipher,
}

impl<'a> BotConfigMapper<'a> {
    pub fn new(cipher: &'a FieldCipher) -> Self {
        Self { cipher }
    }

    /// Encrypts the sensitive fields present in `update` under `salt`.
    /// Fields absent from `update` stay absent from the patch.
    pub fn to_storage_shape(
        &self,
        update: &BotConfigUpdate,
        salt: &str,
    ) -> Result<StoredBotConfigPatch, ConfigurationError> {
        if salt.trim().is_empty() {
            return Err(ConfigurationError::MissingSalt);
        }

        let mut secrets = Vec::new();
        for field in SensitiveField::ALL {
            let Some(value) = update.secret(field) else {
                continue;
            };
            let ciphertext = self
                .cipher
                .encrypt(value.expose_secret(), salt)
                .map_err(|source| ConfigurationError::Encrypt { field, source })?;
            secrets.push((field, ciphertext));
        }

        Ok(StoredBotConfigPatch {
            workspace_name: update.workspace_name.clone(),
            search_limit: update.search_limit,
            enable_voting: update.enable_voting,
            secrets,
            encryption_salt: Some(salt.to_string()),
        })
    }

    /// Decrypts a stored row. Rows without a salt predate encryption and
    /// their sensitive columns are returned as stored.
    pub fn to_application_shape(
        &self,
        row: &StoredBotConfig,
    ) -> Result<BotConfig, ConfigurationError> {
        let reveal = |field: SensitiveField| -> Result<SecretString, ConfigurationError> {
            let stored = row.stored(field);
            match row.encryption_salt.as_deref() {
                Some(salt) => self
                    .cipher
                    .decrypt(stored, salt)
                    .map(SecretString::from)
                    .map_err(|source| ConfigurationError::Decrypt { field, source }),
                None => Ok(SecretString::from(stored.to_string())),
            }
        };

        Ok(BotConfig {
            id: row.id.clone(),
            workspace_name: row.workspace_name.clone(),
            search_limit: row.search_limit,
            enable_voting: row.enable_voting,
            apache_answer_api_url: reveal(SensitiveField::ApacheAnswerApiUrl)?,
            apache_answer_api_key: reveal(SensitiveField::ApacheAnswerApiKey)?,
            slack_bot_token: reveal(SensitiveField::SlackBotToken)?,
            slack_app_token: reveal(SensitiveField::SlackAppToken)?,
            slack_channel_id: reveal(SensitiveField::SlackChannelId)?,
            slack_signing_secret: reveal(SensitiveField::SlackSigningSecret)?,
            encryption_salt: row.encryption_salt.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
