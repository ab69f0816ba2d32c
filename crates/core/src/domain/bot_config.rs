use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub const SEARCH_LIMIT_MIN: u32 = 1;
pub const SEARCH_LIMIT_MAX: u32 = 50;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotConfigId(pub String);

impl BotConfigId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Sensitive columns. These are only ever persisted as ciphertext (or as
/// plaintext on rows written before encryption was introduced).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensitiveField {
    ApacheAnswerApiUrl,
    ApacheAnswerApiKey,
    SlackBotToken,
    SlackAppToken,
    SlackChannelId,
    SlackSigningSecret,
}

impl SensitiveField {
    pub const ALL: [SensitiveField; 6] = [
        SensitiveField::ApacheAnswerApiUrl,
        SensitiveField::ApacheAnswerApiKey,
        SensitiveField::SlackBotToken,
        SensitiveField::SlackAppToken,
        SensitiveField::SlackChannelId,
        SensitiveField::SlackSigningSecret,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Self::ApacheAnswerApiUrl => "apache_answer_api_url_encrypted",
            Self::ApacheAnswerApiKey => "apache_answer_api_key_encrypted",
            Self::SlackBotToken => "slack_bot_token_encrypted",
            Self::SlackAppToken => "slack_app_token_encrypted",
            Self::SlackChannelId => "slack_channel_id_encrypted",
            Self::SlackSigningSecret => "slack_signing_secret_encrypted",
        }
    }
}

/// Decrypted, application-facing view of the singleton configuration record.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub id: BotConfigId,
    pub workspace_name: String,
    pub search_limit: u32,
    pub enable_voting: bool,
    pub apache_answer_api_url: SecretString,
    pub apache_answer_api_key: SecretString,
    pub slack_bot_token: SecretString,
    pub slack_app_token: SecretString,
    pub slack_channel_id: SecretString,
    pub slack_signing_secret: SecretString,
    pub encryption_salt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BotConfig {
    pub fn secret(&self, field: SensitiveField) -> &SecretString {
        match field {
            SensitiveField::ApacheAnswerApiUrl => &self.apache_answer_api_url,
            SensitiveField::ApacheAnswerApiKey => &self.apache_answer_api_key,
            SensitiveField::SlackBotToken => &self.slack_bot_token,
            SensitiveField::SlackAppToken => &self.slack_app_token,
            SensitiveField::SlackChannelId => &self.slack_channel_id,
            SensitiveField::SlackSigningSecret => &self.slack_signing_secret,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_salt.is_some()
    }
}

/// Partial update. `None` leaves a field untouched; `Some("")` clears a secret.
#[derive(Clone, Debug, Default)]
pub struct BotConfigUpdate {
    pub workspace_name: Option<String>,
    pub search_limit: Option<u32>,
    pub enable_voting: Option<bool>,
    pub apache_answer_api_url: Option<SecretString>,
    pub apache_answer_api_key: Option<SecretString>,
    pub slack_bot_token: Option<SecretString>,
    pub slack_app_token: Option<SecretString>,
    pub slack_channel_id: Option<SecretString>,
    pub slack_signing_secret: Option<SecretString>,
}

impl BotConfigUpdate {
    pub fn secret(&self, field: SensitiveField) -> Option<&SecretString> {
        match field {
            SensitiveField::ApacheAnswerApiUrl => self.apache_answer_api_url.as_ref(),
            SensitiveField::ApacheAnswerApiKey => self.apache_answer_api_key.as_ref(),
            SensitiveField::SlackBotToken => self.slack_bot_token.as_ref(),
            SensitiveField::SlackAppToken => self.slack_app_token.as_ref(),
            SensitiveField::SlackChannelId => self.slack_channel_id.as_ref(),
            SensitiveField::SlackSigningSecret => self.slack_signing_secret.as_ref(),
        }
    }

    pub fn set_secret(&mut self, field: SensitiveField, value: SecretString) {
        let slot = match field {
            SensitiveField::ApacheAnswerApiUrl => &mut self.apache_answer_api_url,
            SensitiveField::ApacheAnswerApiKey => &mut self.apache_answer_api_key,
            SensitiveField::SlackBotToken => &mut self.slack_bot_token,
            SensitiveField::SlackAppToken => &mut self.slack_app_token,
            SensitiveField::SlackChannelId => &mut self.slack_channel_id,
            SensitiveField::SlackSigningSecret => &mut self.slack_signing_secret,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        self.workspace_name.is_none()
            && self.search_limit.is_none()
            && self.enable_voting.is_none()
            && SensitiveField::ALL.iter().all(|field| self.secret(*field).is_none())
    }

    /// Fields of `self` win; anything unset is taken from `base`.
    pub fn merged_over(self, base: BotConfigUpdate) -> BotConfigUpdate {
        BotConfigUpdate {
            workspace_name: self.workspace_name.or(base.workspace_name),
            search_limit: self.search_limit.or(base.search_limit),
            enable_voting: self.enable_voting.or(base.enable_voting),
            apache_answer_api_url: self.apache_answer_api_url.or(base.apache_answer_api_url),
            apache_answer_api_key: self.apache_answer_api_key.or(base.apache_answer_api_key),
            slack_bot_token: self.slack_bot_token.or(base.slack_bot_token),
            slack_app_token: self.slack_app_token.or(base.slack_app_token),
            slack_channel_id: self.slack_channel_id.or(base.slack_channel_id),
            slack_signing_secret: self.slack_signing_secret.or(base.slack_signing_secret),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotConfigDefaults {
    pub workspace_name: String,
    pub search_limit: u32,
    pub enable_voting: bool,
}

impl Default for BotConfigDefaults {
    fn default() -> Self {
        Self { workspace_name: "Apache Answer".to_string(), search_limit: 5, enable_voting: true }
    }
}

impl BotConfigDefaults {
    /// A fully populated update used to seed the record on first write.
    pub fn as_update(&self) -> BotConfigUpdate {
        let mut update = BotConfigUpdate {
            workspace_name: Some(self.workspace_name.clone()),
            search_limit: Some(self.search_limit),
            enable_voting: Some(self.enable_voting),
            ..BotConfigUpdate::default()
        };
        for field in SensitiveField::ALL {
            update.set_secret(field, SecretString::from(String::new()));
        }
        update
    }

    /// Unpersisted view returned when no record exists yet.
    pub fn as_config(&self) -> BotConfig {
        let now = Utc::now();
        let empty = || SecretString::from(String::new());
        BotConfig {
            id: BotConfigId("default".to_string()),
            workspace_name: self.workspace_name.clone(),
            search_limit: self.search_limit,
            enable_voting: self.enable_voting,
            apache_answer_api_url: empty(),
            apache_answer_api_key: empty(),
            slack_bot_token: empty(),
            slack_app_token: empty(),
            slack_channel_id: empty(),
            slack_signing_secret: empty(),
            encryption_salt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage-facing row. Sensitive values are opaque: ciphertext under
/// `encryption_salt`, or legacy plaintext when the salt is absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBotConfig {
    pub id: BotConfigId,
    pub workspace_name: String,
    pub search_limit: u32,
    pub enable_voting: bool,
    pub apache_answer_api_url: String,
    pub apache_answer_api_key: String,
    pub slack_bot_token: String,
    pub slack_app_token: String,
    pub slack_channel_id: String,
    pub slack_signing_secret: String,
    pub encryption_salt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredBotConfig {
    pub fn stored(&self, field: SensitiveField) -> &str {
        match field {
            SensitiveField::ApacheAnswerApiUrl => &self.apache_answer_api_url,
            SensitiveField::ApacheAnswerApiKey => &self.apache_answer_api_key,
            SensitiveField::SlackBotToken => &self.slack_bot_token,
            SensitiveField::SlackAppToken => &self.slack_app_token,
            SensitiveField::SlackChannelId => &self.slack_channel_id,
            SensitiveField::SlackSigningSecret => &self.slack_signing_secret,
        }
    }

    fn stored_mut(&mut self, field: SensitiveField) -> &mut String {
        match field {
            SensitiveField::ApacheAnswerApiUrl => &mut self.apache_answer_api_url,
            SensitiveField::ApacheAnswerApiKey => &mut self.apache_answer_api_key,
            SensitiveField::SlackBotToken => &mut self.slack_bot_token,
            SensitiveField::SlackAppToken => &mut self.slack_app_token,
            SensitiveField::SlackChannelId => &mut self.slack_channel_id,
            SensitiveField::SlackSigningSecret => &mut self.slack_signing_secret,
        }
    }

    /// Builds a full row from a storage patch, filling gaps with empty values.
    pub fn from_patch(id: BotConfigId, patch: StoredBotConfigPatch, now: DateTime<Utc>) -> Self {
        let mut row = Self {
            id,
            workspace_name: String::new(),
            search_limit: BotConfigDefaults::default().search_limit,
            enable_voting: false,
            apache_answer_api_url: String::new(),
            apache_answer_api_key: String::new(),
            slack_bot_token: String::new(),
            slack_app_token: String::new(),
            slack_channel_id: String::new(),
            slack_signing_secret: String::new(),
            encryption_salt: None,
            created_at: now,
            updated_at: now,
        };
        row.apply_patch(patch, now);
        row
    }

    /// Merges a partial storage patch into this row and refreshes `updated_at`.
    pub fn apply_patch(&mut self, patch: StoredBotConfigPatch, now: DateTime<Utc>) {
        if let Some(workspace_name) = patch.workspace_name {
            self.workspace_name = workspace_name;
        }
        if let Some(search_limit) = patch.search_limit {
            self.search_limit = search_limit;
        }
        if let Some(enable_voting) = patch.enable_voting {
            self.enable_voting = enable_voting;
        }
        for (field, value) in patch.secrets {
            *self.stored_mut(field) = value;
        }
        if let Some(salt) = patch.encryption_salt {
            self.encryption_salt = Some(salt);
        }
        self.updated_at = now;
    }
}

/// Partial storage row produced from a [`BotConfigUpdate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredBotConfigPatch {
    pub workspace_name: Option<String>,
    pub search_limit: Option<u32>,
    pub enable_voting: Option<bool>,
    pub secrets: Vec<(SensitiveField, String)>,
    pub encryption_salt: Option<String>,
}

impl StoredBotConfigPatch {
    pub fn secret(&self, field: SensitiveField) -> Option<&str> {
        self.secrets
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, value)| value.as_str())
    }
}
