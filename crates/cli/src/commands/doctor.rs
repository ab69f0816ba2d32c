use answerbot_core::config::{AppConfig, LoadOptions};
use answerbot_core::secrets::FieldCipher;
use answerbot_db::repositories::{BotConfigRepository, RepositoryError, SqlBotConfigRepository};
use answerbot_db::{connect_with_config, DbPool};
use serde::Serialize;

use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY, EXIT_ENCRYPTION,
    EXIT_REPOSITORY,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
    #[serde(skip)]
    exit_code: u8,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into(), exit_code: 0 }
    }

    fn fail(name: &'static str, details: impl Into<String>, exit_code: u8) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into(), exit_code }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: format!("skipped because {reason}"),
            exit_code: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    /// Exit code of the first failing check, or 0.
    fn exit_code(&self) -> u8 {
        self.checks.iter().find(|check| check.status == CheckStatus::Fail).map_or(0, |check| {
            check.exit_code
        })
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_code();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_encryption(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string(), EXIT_CONFIG));
            for name in ["encryption_self_test", "database_connectivity", "bot_config_readable"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_encryption(config: &AppConfig) -> DoctorCheck {
    let cipher = FieldCipher::new(config.encryption_instance_id());
    let source = if config.encryption.instance_id.is_some() {
        "configured encryption.instance_id"
    } else {
        "instance id derived from database.url"
    };

    if cipher.test_round_trip(&FieldCipher::generate_salt()) {
        DoctorCheck::pass("encryption_self_test", format!("round trip succeeded using {source}"))
    } else {
        DoctorCheck::fail(
            "encryption_self_test",
            format!("round trip failed using {source}"),
            EXIT_ENCRYPTION,
        )
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime("doctor") {
        Ok(runtime) => runtime,
        Err(failure) => {
            return vec![
                DoctorCheck::fail("database_connectivity", failure.output, failure.exit_code),
                DoctorCheck::skipped("bot_config_readable", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                        EXIT_DB_CONNECTIVITY,
                    ),
                    DoctorCheck::skipped("bot_config_readable", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::pass("database_connectivity", "database connection established"),
            check_bot_config(config, pool.clone()).await,
        ];
        pool.close().await;
        checks
    })
}

async fn check_bot_config(config: &AppConfig, pool: DbPool) -> DoctorCheck {
    let repository =
        SqlBotConfigRepository::new(pool, FieldCipher::new(config.encryption_instance_id()));

    match repository.get().await {
        Ok(None) => DoctorCheck::pass("bot_config_readable", "no bot configuration stored yet"),
        Ok(Some(stored)) if stored.is_encrypted() => {
            DoctorCheck::pass("bot_config_readable", "stored bot configuration decrypts")
        }
        Ok(Some(_)) => DoctorCheck::pass(
            "bot_config_readable",
            "stored bot configuration is plaintext; it will be encrypted on the next update",
        ),
        Err(RepositoryError::Configuration(error)) => DoctorCheck::fail(
            "bot_config_readable",
            format!("{error}; check that encryption.instance_id matches the one used to write it"),
            EXIT_ENCRYPTION,
        ),
        Err(RepositoryError::Database(error)) => DoctorCheck::fail(
            "bot_config_readable",
            format!("{error}; run `answerbot migrate` if the schema is missing"),
            EXIT_REPOSITORY,
        ),
        Err(error) => DoctorCheck::fail("bot_config_readable", error.to_string(), EXIT_REPOSITORY),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
