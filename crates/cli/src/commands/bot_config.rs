use answerbot_core::config::{AppConfig, LoadOptions};
use answerbot_core::domain::bot_config::BotConfigDefaults;
use answerbot_core::secrets::{FieldCipher, RedactedBotConfig};
use answerbot_db::connect_with_config;
use answerbot_db::repositories::{BotConfigRepository, RepositoryError, SqlBotConfigRepository};

use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY, EXIT_ENCRYPTION,
    EXIT_REPOSITORY,
};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "bot-config",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let runtime = match current_thread_runtime("bot-config") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;
        let cipher = FieldCipher::new(config.encryption_instance_id());
        let repository = SqlBotConfigRepository::new(pool.clone(), cipher);
        let loaded = repository.get().await;
        pool.close().await;

        match loaded {
            Ok(Some(stored)) => Ok(RedactedBotConfig::new(&stored, true)),
            Ok(None) => {
                Ok(RedactedBotConfig::new(&BotConfigDefaults::default().as_config(), false))
            }
            Err(RepositoryError::Configuration(error)) => {
                Err(("decryption", error.to_string(), EXIT_ENCRYPTION))
            }
            Err(error) => Err(("repository", error.to_string(), EXIT_REPOSITORY)),
        }
    });

    match result {
        Ok(view) => match serde_json::to_string_pretty(&view) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure(
                "bot-config",
                "serialization",
                error.to_string(),
                EXIT_REPOSITORY,
            ),
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("bot-config", error_class, message, exit_code)
        }
    }
}
