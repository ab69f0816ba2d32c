pub mod bot_config;
